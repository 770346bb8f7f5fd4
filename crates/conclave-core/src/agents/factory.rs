//! Agent factory — turns a profile into a runnable agent

use futures_util::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, warn};

use super::profile::{AgentVariant, Profile};
use super::registry::ProfileRegistry;
use crate::context::{build_system_prompt, history_messages};
use crate::error::Result;
use crate::formatter::ResponseFormatter;
use crate::orchestrator::{ManagerOrchestrator, OrchestratorConfig, Task, TaskContext};
use crate::providers::{ChatMessage, ModelHub};
use crate::retrieval::Retriever;

/// What an agent produced for one turn
#[derive(Debug, Clone, PartialEq)]
pub struct AgentReply {
    pub text: String,
    /// Set by manager agents
    pub tasks: Option<Vec<Task>>,
}

impl AgentReply {
    fn text(text: String) -> Self {
        Self { text, tasks: None }
    }
}

/// Persona + history + new text into one model call
pub struct ConversationAgent {
    profile: Profile,
    hub: Arc<ModelHub>,
}

impl ConversationAgent {
    async fn respond(&self, ctx: &TaskContext, text: &str) -> Result<AgentReply> {
        let system = build_system_prompt(&self.profile.agent.persona, &[]);
        let mut messages = history_messages(&ctx.history);
        messages.push(ChatMessage::user(text));
        let reply = ctx
            .guard(self.hub.complete(&self.profile.model, &messages, &system))
            .await?;
        Ok(AgentReply::text(reply))
    }
}

/// Conversation agent that first pulls passages from its knowledge sets
pub struct RagAgent {
    profile: Profile,
    hub: Arc<ModelHub>,
    retriever: Arc<dyn Retriever>,
}

impl RagAgent {
    async fn respond(&self, ctx: &TaskContext, text: &str) -> Result<AgentReply> {
        let collections = self.profile.collection_names();
        let k = self.profile.retrieval_k();

        let passages = if collections.is_empty() {
            debug!("RagAgent '{}': no knowledge sets assigned", self.profile.name);
            Vec::new()
        } else {
            match self.retriever.retrieve(text, &collections, k).await {
                Ok(passages) => {
                    debug!(
                        "RagAgent '{}': retrieved {} passages from {:?}",
                        self.profile.name,
                        passages.len(),
                        collections
                    );
                    passages
                }
                Err(e) => {
                    warn!(
                        "RagAgent '{}': retrieval failed, answering without context: {:#}",
                        self.profile.name, e
                    );
                    Vec::new()
                }
            }
        };

        let system = build_system_prompt(&self.profile.agent.persona, &passages);
        let mut messages = history_messages(&ctx.history);
        messages.push(ChatMessage::user(text));
        let reply = ctx
            .guard(self.hub.complete(&self.profile.model, &messages, &system))
            .await?;
        Ok(AgentReply::text(reply))
    }
}

/// A runnable agent of one of the three variants
pub enum AgentHandle {
    Conversation(ConversationAgent),
    Rag(RagAgent),
    Manager(ManagerOrchestrator),
}

impl AgentHandle {
    pub fn variant(&self) -> AgentVariant {
        match self {
            Self::Conversation(_) => AgentVariant::Conversation,
            Self::Rag(_) => AgentVariant::Rag,
            Self::Manager(_) => AgentVariant::Manager,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Conversation(a) => &a.profile.name,
            Self::Rag(a) => &a.profile.name,
            Self::Manager(m) => &m.profile().name,
        }
    }

    /// Answer `text` in the given context. Boxed because managers call back
    /// into other agents.
    pub fn respond<'a>(&'a self, ctx: &'a TaskContext, text: &'a str) -> BoxFuture<'a, Result<AgentReply>> {
        Box::pin(async move {
            match self {
                Self::Conversation(agent) => agent.respond(ctx, text).await,
                Self::Rag(agent) => agent.respond(ctx, text).await,
                Self::Manager(orchestrator) => {
                    let run = orchestrator.run(text, ctx).await?;
                    Ok(AgentReply {
                        text: ResponseFormatter::format(&run),
                        tasks: Some(run.tasks),
                    })
                }
            }
        })
    }
}

/// Builds agents. Owns the shared services every agent needs.
pub struct AgentFactory {
    hub: Arc<ModelHub>,
    registry: Arc<ProfileRegistry>,
    retriever: Arc<dyn Retriever>,
    config: OrchestratorConfig,
}

impl AgentFactory {
    pub fn new(
        hub: Arc<ModelHub>,
        registry: Arc<ProfileRegistry>,
        retriever: Arc<dyn Retriever>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            hub,
            registry,
            retriever,
            config,
        }
    }

    pub fn hub(&self) -> &ModelHub {
        &self.hub
    }

    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn build(self: &Arc<Self>, profile: &Profile) -> Result<AgentHandle> {
        let variant = profile.variant()?;
        debug!("AgentFactory: building {} agent '{}'", variant, profile.name);
        Ok(match variant {
            AgentVariant::Conversation => AgentHandle::Conversation(ConversationAgent {
                profile: profile.clone(),
                hub: self.hub.clone(),
            }),
            AgentVariant::Rag => AgentHandle::Rag(RagAgent {
                profile: profile.clone(),
                hub: self.hub.clone(),
                retriever: self.retriever.clone(),
            }),
            AgentVariant::Manager => {
                AgentHandle::Manager(ManagerOrchestrator::new(self.clone(), profile.clone()))
            }
        })
    }
}
