//! One user turn, from request to stored history

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::agents::factory::AgentFactory;
use crate::agents::registry::ProfileRegistry;
use crate::error::{ConclaveError, Result};
use crate::orchestrator::TaskContext;
use crate::session::SessionStore;
use crate::types::{ChatRequest, ChatResponse, Message};

/// Prefix of the agent message stored when a manager cannot plan
pub const PLAN_FAILURE_PREFIX: &str = "I was unable to plan this request";

/// Prefix of the agent message stored when an agent errors out
pub const AGENT_FAILURE_PREFIX: &str = "Sorry, I couldn't complete that request";

pub struct ChatService {
    registry: Arc<ProfileRegistry>,
    sessions: Arc<SessionStore>,
    factory: Arc<AgentFactory>,
}

impl ChatService {
    pub fn new(
        registry: Arc<ProfileRegistry>,
        sessions: Arc<SessionStore>,
        factory: Arc<AgentFactory>,
    ) -> Self {
        Self {
            registry,
            sessions,
            factory,
        }
    }

    pub fn registry(&self) -> &Arc<ProfileRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.chat_with_cancel(request, CancellationToken::new()).await
    }

    /// Run one turn. Cancelling `cancel` abandons in-flight work and stores
    /// nothing.
    pub async fn chat_with_cancel(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatResponse> {
        if request.text.trim().is_empty() {
            return Err(ConclaveError::validation("text is required"));
        }

        // Resolve the profile: from the session if one is given
        let profile_name = match request.session_id.as_deref() {
            Some(id) => self.sessions.info(id).await?.profile_name,
            None => request
                .profile_name
                .clone()
                .filter(|p| !p.trim().is_empty())
                .ok_or_else(|| {
                    ConclaveError::validation("profile_name is required without a session_id")
                })?,
        };
        let profile = self.registry.get(&profile_name).await?;
        let agent = self.factory.build(&profile)?;

        let created = request.session_id.is_none();
        let session_id = match request.session_id {
            Some(id) => id,
            None => self.sessions.create(&profile.name).await?,
        };

        let _turn = self.sessions.begin_turn(&session_id)?;
        let history = self.sessions.history(&session_id).await?;
        let ctx = TaskContext::root(history, cancel.clone());

        info!(
            "Chat: session {} turn with '{}' ({})",
            session_id,
            profile.name,
            agent.variant()
        );

        let outcome = agent.respond(&ctx, &request.text).await;
        if cancel.is_cancelled() || matches!(outcome, Err(ConclaveError::Cancelled)) {
            warn!("Chat: turn on session {} cancelled", session_id);
            if created {
                self.discard(&session_id).await;
            }
            return Err(ConclaveError::Cancelled);
        }

        let reply = match outcome {
            Ok(reply) => {
                let message = Message::agent(reply.text);
                match reply.tasks {
                    Some(tasks) => message.with_tasks(tasks),
                    None => message,
                }
            }
            Err(ConclaveError::Decomposition(reason)) => {
                warn!("Chat: '{}' could not plan: {}", profile.name, reason);
                Message::agent(format!("{}: {}", PLAN_FAILURE_PREFIX, reason))
            }
            Err(e) => {
                error!("Chat: '{}' failed: {}", profile.name, e);
                Message::agent(format!("{}: {}", AGENT_FAILURE_PREFIX, e))
            }
        };

        let response = reply.text.clone();
        self.sessions
            .append_turn(&session_id, Message::user(request.text), reply)
            .await?;

        Ok(ChatResponse {
            response,
            session_id,
        })
    }

    /// Drop a session created for a turn that never completed
    async fn discard(&self, session_id: &str) {
        if let Err(e) = self.sessions.delete(session_id).await {
            warn!("Chat: could not remove empty session {}: {}", session_id, e);
        }
    }
}
