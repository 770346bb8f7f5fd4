//! Shared types for conclave-core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::orchestrator::Task;

/// Who wrote a message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Agent,
}

/// A single entry of a session's history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub text: String,
    pub sender: Sender,
    /// The manager's task list, when the message came out of a manager run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<Task>>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: Sender::User,
            tasks: None,
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: Sender::Agent,
            tasks: None,
        }
    }

    pub fn with_tasks(mut self, tasks: Vec<Task>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn is_user(&self) -> bool {
        self.sender == Sender::User
    }
}

/// Session metadata (no messages)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    pub session_id: String,
    pub profile_name: String,
    pub created_at: DateTime<Utc>,
}

/// Inbound chat turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub text: String,
    /// Required only when `session_id` is absent
    #[serde(default)]
    pub profile_name: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ChatRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            profile_name: None,
            session_id: None,
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile_name = Some(profile.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Outbound chat turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let user = Message::user("hi");
        assert!(user.is_user());
        assert!(user.tasks.is_none());

        let agent = Message::agent("hello");
        assert_eq!(agent.sender, Sender::Agent);
        assert!(!agent.is_user());
    }

    #[test]
    fn test_chat_request_optional_fields() {
        let req: ChatRequest = serde_json::from_str(r#"{"text":"hello"}"#).unwrap();
        assert_eq!(req.text, "hello");
        assert!(req.profile_name.is_none());
        assert!(req.session_id.is_none());

        let req: ChatRequest =
            serde_json::from_str(r#"{"text":"x","profile_name":"manager","session_id":"s1"}"#)
                .unwrap();
        assert_eq!(req.profile_name.as_deref(), Some("manager"));
        assert_eq!(req.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_message_payload_skipped_when_absent() {
        let json = serde_json::to_string(&Message::agent("ok")).unwrap();
        assert!(!json.contains("tasks"));
        assert!(json.contains("\"sender\":\"agent\""));
    }
}
