//! Error taxonomy for the orchestration core

use thiserror::Error;

/// Errors surfaced by the core.
///
/// Errors raised inside a single delegated task never escape as a value of
/// this type; the orchestrator turns them into a failed task record instead.
#[derive(Debug, Error)]
pub enum ConclaveError {
    /// Bad profile data. Never partially applied.
    #[error("validation error: {0}")]
    Validation(String),

    /// Delete blocked because something still references the target
    #[error("'{name}' is in use: {reason}")]
    InUse { name: String, reason: String },

    #[error("unknown agent variant '{0}'")]
    UnknownAgentVariant(String),

    /// The manager's plan could not be parsed. Fatal for that manager run only.
    #[error("could not parse the task plan: {0}")]
    Decomposition(String),

    #[error("task execution failed: {0}")]
    TaskExecution(String),

    #[error("timeout")]
    Timeout,

    #[error("session '{0}' not found")]
    SessionNotFound(String),

    /// A turn is already running on this session
    #[error("session '{0}' is busy with another turn")]
    SessionBusy(String),

    #[error("profile '{0}' not found")]
    ProfileNotFound(String),

    #[error("knowledge set '{0}' not found")]
    KnowledgeSetNotFound(String),

    #[error("'{0}' already exists")]
    Conflict(String),

    #[error("model provider error: {0}")]
    Provider(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("turn cancelled")]
    Cancelled,
}

impl ConclaveError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn in_use(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InUse {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an infrastructure error coming from a store or backend.
    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{:#}", err))
    }

    /// Wrap an infrastructure error coming from a model provider.
    pub fn provider(err: anyhow::Error) -> Self {
        Self::Provider(format!("{:#}", err))
    }

    /// True for the "entity does not exist" family
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound(_) | Self::ProfileNotFound(_) | Self::KnowledgeSetNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ConclaveError>;
