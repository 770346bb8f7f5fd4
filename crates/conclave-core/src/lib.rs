//! conclave-core - profile-driven agents and the delegating manager
//!
//! This crate provides:
//! - Agent profiles, their registry and durable profile stores
//! - An agent factory building conversation, RAG and manager agents
//! - The manager's decompose / delegate / execute / aggregate cycle
//! - The text protocol manager responses are rendered in
//! - Session history with a token budget
//! - Model providers behind an explicit model hub

pub mod agents;
pub mod chat;
pub mod context;
pub mod error;
pub mod formatter;
pub mod orchestrator;
pub mod providers;
pub mod retrieval;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use agents::{
    AgentFactory, AgentHandle, AgentVariant, DelegationStrategy, Profile, ProfileRegistry,
    ProfileStore, YamlProfileStore,
};
pub use chat::ChatService;
pub use error::{ConclaveError, Result};
pub use formatter::ResponseFormatter;
pub use orchestrator::{ManagerOrchestrator, ManagerRun, OrchestratorConfig, Task, TaskStatus};
pub use providers::{LlmProvider, ModelHub, ProviderEndpoint};
pub use retrieval::{NoRetriever, Passage, Retriever};
pub use session::{MemorySessionBackend, SessionBackend, SessionStore};
pub use types::{ChatRequest, ChatResponse, Message, Sender, SessionInfo};
