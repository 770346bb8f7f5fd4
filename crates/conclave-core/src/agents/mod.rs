//! Agent profiles and the agents built from them
//!
//! Profiles are loaded into a registry backed by a profile store. The factory
//! turns a profile into one of three agent variants, and the task router
//! resolves a manager's delegation hints against registered profiles.

pub mod factory;
pub mod profile;
pub mod registry;
pub mod router;
pub mod store;

pub use factory::{AgentFactory, AgentHandle, AgentReply};
pub use profile::{AgentVariant, DelegationStrategy, Profile};
pub use registry::{Persona, ProfileRegistry};
pub use router::{Route, RouteKind, TaskRouter};
pub use store::{MemoryProfileStore, ProfileStore, YamlProfileStore};
