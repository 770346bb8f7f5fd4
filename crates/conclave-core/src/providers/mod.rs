//! Multi-provider LLM abstraction layer
//!
//! Supports Anthropic, OpenAI, and any OpenAI-compatible endpoint (Ollama
//! included). Providers implement the [`LlmProvider`] trait and are handed
//! out by the [`ModelHub`].

pub mod anthropic;
pub mod hub;
pub mod openai;
pub mod openai_compat;
pub mod types;

pub use hub::{ModelHub, ProviderEndpoint};
pub use types::{ChatMessage, ChatResponse, ChatRole, LlmProvider, Sampling};
