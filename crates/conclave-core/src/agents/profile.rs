//! Agent profile — defines an agent's identity, model, behavior and memory

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ConclaveError, Result};

/// Name of the reserved profile that can never be deleted
pub const DEFAULT_PROFILE: &str = "default";

/// Result count used by RAG agents when the profile does not set one
pub const DEFAULT_RETRIEVAL_K: usize = 4;

/// A profile defines a distinct agent persona with its own model,
/// behavior settings, memory budget and knowledge sets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub memory: MemorySettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base: Option<KnowledgeBaseSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSettings {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_top_p() -> f32 {
    1.0
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            provider: String::new(),
            name: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSettings {
    /// Variant tag, parsed by the agent factory
    #[serde(rename = "type", default)]
    pub agent_type: String,
    #[serde(default = "default_persona")]
    pub persona: String,
    #[serde(default)]
    pub tools: Vec<String>,
    // Manager-only settings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_agents: Vec<String>,
    #[serde(default)]
    pub delegation_strategy: DelegationStrategy,
    #[serde(default = "default_true")]
    pub show_thinking: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_agent: Option<String>,
    // RAG-only settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_k: Option<usize>,
}

fn default_persona() -> String {
    "You are a helpful assistant.".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            agent_type: String::new(),
            persona: default_persona(),
            tools: Vec::new(),
            available_agents: Vec::new(),
            delegation_strategy: DelegationStrategy::default(),
            show_thinking: true,
            fallback_agent: None,
            retrieval_k: None,
        }
    }
}

/// How a manager picks the agent for each subtask
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DelegationStrategy {
    /// Exact name, then description substring
    #[default]
    Automatic,
    /// Exact name only
    Specified,
}

impl fmt::Display for DelegationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Automatic => write!(f, "automatic"),
            Self::Specified => write!(f, "specified"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemorySettings {
    #[serde(rename = "type", default = "default_memory_type")]
    pub memory_type: String,
    #[serde(default = "default_max_token_limit")]
    pub max_token_limit: usize,
}

fn default_memory_type() -> String {
    "buffer".to_string()
}

fn default_max_token_limit() -> usize {
    2000
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            memory_type: default_memory_type(),
            max_token_limit: default_max_token_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct KnowledgeBaseSettings {
    #[serde(default)]
    pub collections: Vec<CollectionRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionRef {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// The closed set of agent variants a profile can describe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentVariant {
    Conversation,
    Rag,
    Manager,
}

impl FromStr for AgentVariant {
    type Err = ConclaveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "conversation" => Ok(Self::Conversation),
            "rag" => Ok(Self::Rag),
            "manager" => Ok(Self::Manager),
            _ => Err(ConclaveError::UnknownAgentVariant(s.to_string())),
        }
    }
}

impl fmt::Display for AgentVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conversation => write!(f, "conversation"),
            Self::Rag => write!(f, "rag"),
            Self::Manager => write!(f, "manager"),
        }
    }
}

impl Profile {
    /// A conversation profile with default settings
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            model: ModelSettings {
                provider: "ollama".to_string(),
                name: "llama3.2".to_string(),
                ..ModelSettings::default()
            },
            agent: AgentSettings {
                agent_type: AgentVariant::Conversation.to_string(),
                ..AgentSettings::default()
            },
            memory: MemorySettings::default(),
            knowledge_base: None,
        }
    }

    pub fn variant(&self) -> Result<AgentVariant> {
        self.agent.agent_type.parse()
    }

    pub fn is_manager(&self) -> bool {
        matches!(self.variant(), Ok(AgentVariant::Manager))
    }

    /// Every profile name this one points at (available agents, then fallback)
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.agent
            .available_agents
            .iter()
            .map(String::as_str)
            .chain(self.agent.fallback_agent.as_deref())
    }

    pub fn references_profile(&self, name: &str) -> bool {
        self.references().any(|r| r == name)
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.knowledge_base
            .as_ref()
            .map(|kb| kb.collections.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn uses_collection(&self, collection: &str) -> bool {
        self.knowledge_base
            .as_ref()
            .is_some_and(|kb| kb.collections.iter().any(|c| c.name == collection))
    }

    pub fn retrieval_k(&self) -> usize {
        self.agent.retrieval_k.unwrap_or(DEFAULT_RETRIEVAL_K)
    }

    /// Checks that only need the profile itself (no registry state).
    pub fn check_fields(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ConclaveError::validation("profile name is required"));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConclaveError::validation(format!(
                "profile name '{}' may only contain letters, digits, '-' and '_'",
                self.name
            )));
        }
        if self.description.trim().is_empty() {
            return Err(ConclaveError::validation("description is required"));
        }
        if self.model.provider.trim().is_empty() {
            return Err(ConclaveError::validation("model.provider is required"));
        }
        if self.model.name.trim().is_empty() {
            return Err(ConclaveError::validation("model.name is required"));
        }
        if self.agent.agent_type.trim().is_empty() {
            return Err(ConclaveError::validation("agent.type is required"));
        }
        if self.memory.max_token_limit == 0 {
            return Err(ConclaveError::validation(
                "memory.max_token_limit must be positive",
            ));
        }
        if self.is_manager() {
            if self.agent.available_agents.iter().any(|a| a == &self.name) {
                return Err(ConclaveError::validation(format!(
                    "manager '{}' cannot list itself in available_agents",
                    self.name
                )));
            }
            if self.agent.fallback_agent.as_deref() == Some(self.name.as_str()) {
                return Err(ConclaveError::validation(format!(
                    "manager '{}' cannot be its own fallback_agent",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Profile {
        let mut p = Profile::new("manager", "Delegates work");
        p.agent.agent_type = "manager".to_string();
        p.agent.available_agents = vec!["default".to_string(), "rag".to_string()];
        p.agent.fallback_agent = Some("default".to_string());
        p
    }

    #[test]
    fn test_profile_new() {
        let profile = Profile::new("default", "General assistant");
        assert_eq!(profile.name, "default");
        assert_eq!(profile.variant().unwrap(), AgentVariant::Conversation);
        assert_eq!(profile.retrieval_k(), DEFAULT_RETRIEVAL_K);
        assert!(profile.check_fields().is_ok());
    }

    #[test]
    fn test_variant_parsing() {
        assert_eq!("RAG".parse::<AgentVariant>().unwrap(), AgentVariant::Rag);
        assert_eq!(" manager ".parse::<AgentVariant>().unwrap(), AgentVariant::Manager);
        let err = "wizard".parse::<AgentVariant>().unwrap_err();
        assert!(matches!(err, ConclaveError::UnknownAgentVariant(v) if v == "wizard"));
    }

    #[test]
    fn test_yaml_document_fields() {
        let yaml = r#"
name: researcher
description: Answers from the docs
model:
  provider: openai
  name: gpt-4o
  temperature: 0.2
  max_tokens: 2048
  top_p: 0.9
agent:
  type: rag
  persona: You answer from documents.
  tools: []
  retrieval_k: 6
memory:
  type: buffer
  max_token_limit: 4000
knowledge_base:
  collections:
    - name: handbook
      description: Employee handbook
"#;
        let profile: Profile = serde_yml::from_str(yaml).unwrap();
        assert_eq!(profile.model.provider, "openai");
        assert_eq!(profile.model.max_tokens, 2048);
        assert_eq!(profile.variant().unwrap(), AgentVariant::Rag);
        assert_eq!(profile.retrieval_k(), 6);
        assert_eq!(profile.memory.max_token_limit, 4000);
        assert_eq!(profile.collection_names(), vec!["handbook".to_string()]);
        assert!(profile.uses_collection("handbook"));
        assert!(!profile.uses_collection("wiki"));
    }

    #[test]
    fn test_defaults_applied() {
        let json = r#"{"name":"x","description":"d","model":{"provider":"ollama","name":"llama3"},"agent":{"type":"manager"}}"#;
        let profile: Profile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.model.temperature, 0.7);
        assert_eq!(profile.agent.delegation_strategy, DelegationStrategy::Automatic);
        assert!(profile.agent.show_thinking);
        assert_eq!(profile.memory.max_token_limit, 2000);
        assert_eq!(profile.agent.persona, "You are a helpful assistant.");
    }

    #[test]
    fn test_delegation_strategy_serde() {
        let s: DelegationStrategy = serde_json::from_str("\"specified\"").unwrap();
        assert_eq!(s, DelegationStrategy::Specified);
        assert_eq!(
            serde_json::to_string(&DelegationStrategy::Automatic).unwrap(),
            "\"automatic\""
        );
    }

    #[test]
    fn test_missing_required_fields() {
        let mut p = Profile::new("x", "desc");
        p.model.provider.clear();
        assert!(matches!(p.check_fields(), Err(ConclaveError::Validation(_))));

        let mut p = Profile::new("x", "desc");
        p.agent.agent_type.clear();
        assert!(matches!(p.check_fields(), Err(ConclaveError::Validation(_))));

        let p = Profile::new("", "desc");
        assert!(matches!(p.check_fields(), Err(ConclaveError::Validation(_))));

        let p = Profile::new("../etc", "desc");
        assert!(matches!(p.check_fields(), Err(ConclaveError::Validation(_))));
    }

    #[test]
    fn test_manager_cannot_reference_itself() {
        let mut p = manager();
        p.agent.available_agents.push("manager".to_string());
        assert!(p.check_fields().is_err());

        let mut p = manager();
        p.agent.fallback_agent = Some("manager".to_string());
        assert!(p.check_fields().is_err());

        assert!(manager().check_fields().is_ok());
    }

    #[test]
    fn test_references() {
        let p = manager();
        let refs: Vec<&str> = p.references().collect();
        assert_eq!(refs, vec!["default", "rag", "default"]);
        assert!(p.references_profile("rag"));
        assert!(!p.references_profile("writer"));
    }
}
