//! HTTP JSON surface for conclave
//!
//! Exposes chat turns plus profile, session and knowledge set management
//! over an Axum router.

pub mod error;
pub mod protocol;
pub mod routes;
pub mod server;

pub use server::{GatewayServer, GatewayState};
