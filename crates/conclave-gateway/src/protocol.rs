//! JSON bodies of the HTTP surface

use serde::{Deserialize, Serialize};

use conclave_core::{Message, Profile, SessionInfo, Task};
use conclave_knowledge::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, KnowledgeSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

/// `{"status": "success", "message": ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusBody {
    pub status: String,
    pub message: String,
}

impl StatusBody {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilesList {
    pub profiles: Vec<ProfileSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileBody {
    pub name: String,
    pub description: String,
    pub config: Profile,
}

impl From<Profile> for ProfileBody {
    fn from(profile: Profile) -> Self {
        Self {
            name: profile.name.clone(),
            description: profile.description.clone(),
            config: profile,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileUpdated {
    pub status: String,
    pub message: String,
    pub profile: ProfileBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsList {
    pub sessions: Vec<SessionInfo>,
}

/// One history entry as the display layer reads it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub text: String,
    #[serde(rename = "isUser")]
    pub is_user: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<Task>>,
}

impl From<Message> for HistoryMessage {
    fn from(message: Message) -> Self {
        Self {
            is_user: message.is_user(),
            text: message.text,
            tasks: message.tasks,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryBody {
    pub messages: Vec<HistoryMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSetCreate {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Only the description of a knowledge set can change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSetUpdate {
    #[serde(default)]
    pub name: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSetsList {
    pub knowledge_sets: Vec<KnowledgeSet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentUpload {
    #[serde(default)]
    pub title: String,
    pub text: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentAdded {
    pub status: String,
    pub message: String,
    pub total_documents: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_message_uses_is_user_key() {
        let json = serde_json::to_value(HistoryMessage::from(Message::user("hi"))).unwrap();
        assert_eq!(json, serde_json::json!({"text": "hi", "isUser": true}));
    }

    #[test]
    fn test_document_upload_defaults() {
        let upload: DocumentUpload = serde_json::from_str(r#"{"text":"body"}"#).unwrap();
        assert_eq!(upload.chunk_size, 1000);
        assert_eq!(upload.chunk_overlap, 200);
        assert_eq!(upload.title, "");
    }
}
