//! Per-session message history bound to one profile

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::agents::registry::ProfileRegistry;
use crate::error::{ConclaveError, Result};
use crate::types::{Message, SessionInfo};

/// Default token budget when the bound profile has gone away
pub const DEFAULT_MAX_TOKEN_LIMIT: usize = 2000;

/// Rough token count: one token per four characters, rounded up
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Durable key-value storage for sessions
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn create(&self, info: &SessionInfo) -> anyhow::Result<()>;

    async fn info(&self, session_id: &str) -> anyhow::Result<Option<SessionInfo>>;

    async fn list(&self) -> anyhow::Result<Vec<SessionInfo>>;

    /// The stored message list, or None for an unknown session
    async fn messages(&self, session_id: &str) -> anyhow::Result<Option<Vec<Message>>>;

    /// Replace the stored message list
    async fn set_messages(&self, session_id: &str, messages: &[Message]) -> anyhow::Result<()>;

    /// Returns false if the session did not exist
    async fn delete(&self, session_id: &str) -> anyhow::Result<bool>;
}

/// Process-local backend
#[derive(Default)]
pub struct MemorySessionBackend {
    sessions: RwLock<HashMap<String, (SessionInfo, Vec<Message>)>>,
}

impl MemorySessionBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionBackend for MemorySessionBackend {
    async fn create(&self, info: &SessionInfo) -> anyhow::Result<()> {
        self.sessions
            .write()
            .await
            .insert(info.session_id.clone(), (info.clone(), Vec::new()));
        Ok(())
    }

    async fn info(&self, session_id: &str) -> anyhow::Result<Option<SessionInfo>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|(info, _)| info.clone()))
    }

    async fn list(&self) -> anyhow::Result<Vec<SessionInfo>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .map(|(info, _)| info.clone())
            .collect())
    }

    async fn messages(&self, session_id: &str) -> anyhow::Result<Option<Vec<Message>>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|(_, messages)| messages.clone()))
    }

    async fn set_messages(&self, session_id: &str, messages: &[Message]) -> anyhow::Result<()> {
        let mut sessions = self.sessions.write().await;
        let (_, stored) = sessions
            .get_mut(session_id)
            .ok_or_else(|| anyhow::anyhow!("session '{}' does not exist", session_id))?;
        *stored = messages.to_vec();
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> anyhow::Result<bool> {
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }
}

/// Held for the duration of one turn; releases the session on drop
#[derive(Debug)]
pub struct TurnGuard {
    session_id: String,
    busy: Arc<Mutex<HashSet<String>>>,
}

impl TurnGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.busy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.session_id);
    }
}

/// Owns all sessions. Appends are bounded by the bound profile's
/// `memory.max_token_limit`.
pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    registry: Arc<ProfileRegistry>,
    default_limit: usize,
    busy: Arc<Mutex<HashSet<String>>>,
    writes: tokio::sync::Mutex<()>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn SessionBackend>, registry: Arc<ProfileRegistry>) -> Self {
        Self {
            backend,
            registry,
            default_limit: DEFAULT_MAX_TOKEN_LIMIT,
            busy: Arc::new(Mutex::new(HashSet::new())),
            writes: tokio::sync::Mutex::new(()),
        }
    }

    /// Budget used when a session's profile is no longer registered
    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit.max(1);
        self
    }

    /// Start a new session bound to an existing profile
    pub async fn create(&self, profile_name: &str) -> Result<String> {
        if !self.registry.contains(profile_name).await {
            return Err(ConclaveError::ProfileNotFound(profile_name.to_string()));
        }
        let info = SessionInfo {
            session_id: uuid::Uuid::new_v4().to_string(),
            profile_name: profile_name.to_string(),
            created_at: Utc::now(),
        };
        self.backend
            .create(&info)
            .await
            .map_err(ConclaveError::storage)?;
        info!(
            "Created session {} for profile '{}'",
            info.session_id, profile_name
        );
        Ok(info.session_id)
    }

    pub async fn info(&self, session_id: &str) -> Result<SessionInfo> {
        self.backend
            .info(session_id)
            .await
            .map_err(ConclaveError::storage)?
            .ok_or_else(|| ConclaveError::SessionNotFound(session_id.to_string()))
    }

    /// All sessions, newest first
    pub async fn list(&self) -> Result<Vec<SessionInfo>> {
        let mut sessions = self.backend.list().await.map_err(ConclaveError::storage)?;
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    pub async fn history(&self, session_id: &str) -> Result<Vec<Message>> {
        self.backend
            .messages(session_id)
            .await
            .map_err(ConclaveError::storage)?
            .ok_or_else(|| ConclaveError::SessionNotFound(session_id.to_string()))
    }

    pub async fn append(&self, session_id: &str, message: Message) -> Result<()> {
        self.append_all(session_id, vec![message]).await
    }

    /// Record one complete turn
    pub async fn append_turn(&self, session_id: &str, user: Message, agent: Message) -> Result<()> {
        self.append_all(session_id, vec![user, agent]).await
    }

    pub async fn delete(&self, session_id: &str) -> Result<()> {
        let _write = self.writes.lock().await;
        let removed = self
            .backend
            .delete(session_id)
            .await
            .map_err(ConclaveError::storage)?;
        if !removed {
            return Err(ConclaveError::SessionNotFound(session_id.to_string()));
        }
        info!("Deleted session {}", session_id);
        Ok(())
    }

    /// Claim the session for one turn. A second claim while the first guard
    /// is alive fails with `SessionBusy`.
    pub fn begin_turn(&self, session_id: &str) -> Result<TurnGuard> {
        let mut busy = self.busy.lock().unwrap_or_else(|e| e.into_inner());
        if !busy.insert(session_id.to_string()) {
            return Err(ConclaveError::SessionBusy(session_id.to_string()));
        }
        Ok(TurnGuard {
            session_id: session_id.to_string(),
            busy: self.busy.clone(),
        })
    }

    async fn append_all(&self, session_id: &str, new: Vec<Message>) -> Result<()> {
        let _write = self.writes.lock().await;
        let info = self.info(session_id).await?;
        let limit = self
            .registry
            .find(&info.profile_name)
            .await
            .map(|p| p.memory.max_token_limit)
            .unwrap_or(self.default_limit);

        let mut messages = self.history(session_id).await?;
        messages.extend(new);
        let evicted = evict_to_budget(&mut messages, limit);
        if evicted > 0 {
            debug!(
                "Session {}: evicted {} oldest messages (limit {} tokens)",
                session_id, evicted, limit
            );
        }

        self.backend
            .set_messages(session_id, &messages)
            .await
            .map_err(ConclaveError::storage)
    }
}

/// Drop messages oldest first until the estimate fits `limit`, always keeping
/// the final two. Returns the number removed.
fn evict_to_budget(messages: &mut Vec<Message>, limit: usize) -> usize {
    let mut total: usize = messages.iter().map(|m| estimate_tokens(&m.text)).sum();
    let mut evict = 0;
    while total > limit && messages.len() - evict > 2 {
        total -= estimate_tokens(&messages[evict].text);
        evict += 1;
    }
    messages.drain(..evict);
    evict
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::profile::Profile;

    async fn store_with_limit(limit: usize) -> SessionStore {
        let registry = Arc::new(ProfileRegistry::in_memory());
        let mut profile = Profile::new("default", "General");
        profile.memory.max_token_limit = limit;
        registry.register(profile).await.unwrap();
        SessionStore::new(Arc::new(MemorySessionBackend::new()), registry)
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        // counted in characters, not bytes
        assert_eq!(estimate_tokens("éééé"), 1);
    }

    #[tokio::test]
    async fn test_create_and_history() {
        let store = store_with_limit(2000).await;
        let id = store.create("default").await.unwrap();
        assert!(store.history(&id).await.unwrap().is_empty());

        store
            .append_turn(&id, Message::user("hi"), Message::agent("hello"))
            .await
            .unwrap();
        let history = store.history(&id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].is_user());
        assert_eq!(history[1].text, "hello");

        let info = store.info(&id).await.unwrap();
        assert_eq!(info.profile_name, "default");
    }

    #[tokio::test]
    async fn test_unknown_session_and_profile() {
        let store = store_with_limit(2000).await;
        assert!(matches!(
            store.history("missing").await,
            Err(ConclaveError::SessionNotFound(_))
        ));
        assert!(matches!(
            store.append("missing", Message::user("x")).await,
            Err(ConclaveError::SessionNotFound(_))
        ));
        assert!(matches!(
            store.delete("missing").await,
            Err(ConclaveError::SessionNotFound(_))
        ));
        assert!(matches!(
            store.create("ghost").await,
            Err(ConclaveError::ProfileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_eviction_is_oldest_first() {
        // 40 chars = 10 tokens per message
        let store = store_with_limit(30).await;
        let id = store.create("default").await.unwrap();
        let text = |c: char| c.to_string().repeat(40);

        store
            .append_turn(&id, Message::user(text('a')), Message::agent(text('b')))
            .await
            .unwrap();
        store
            .append_turn(&id, Message::user(text('c')), Message::agent(text('d')))
            .await
            .unwrap();

        let history = store.history(&id).await.unwrap();
        let firsts: Vec<char> = history
            .iter()
            .map(|m| m.text.chars().next().unwrap())
            .collect();
        assert_eq!(firsts, vec!['b', 'c', 'd']);
    }

    #[tokio::test]
    async fn test_eviction_keeps_final_pair() {
        let store = store_with_limit(1).await;
        let id = store.create("default").await.unwrap();
        store
            .append_turn(&id, Message::user("x".repeat(400)), Message::agent("y".repeat(400)))
            .await
            .unwrap();
        store
            .append_turn(&id, Message::user("z".repeat(400)), Message::agent("w".repeat(400)))
            .await
            .unwrap();

        let history = store.history(&id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].text.starts_with('z'));
        assert!(history[1].text.starts_with('w'));
    }

    #[tokio::test]
    async fn test_busy_session_rejected() {
        let store = store_with_limit(2000).await;
        let id = store.create("default").await.unwrap();

        let guard = store.begin_turn(&id).unwrap();
        assert_eq!(guard.session_id(), id);
        assert!(matches!(
            store.begin_turn(&id),
            Err(ConclaveError::SessionBusy(_))
        ));
        drop(guard);
        assert!(store.begin_turn(&id).is_ok());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let store = store_with_limit(2000).await;
        let a = store.create("default").await.unwrap();
        let b = store.create("default").await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 2);

        store.delete(&a).await.unwrap();
        let remaining = store.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].session_id, b);
    }

    #[test]
    fn test_evict_to_budget_under_limit_is_noop() {
        let mut messages = vec![Message::user("hi"), Message::agent("there")];
        assert_eq!(evict_to_budget(&mut messages, 100), 0);
        assert_eq!(messages.len(), 2);
    }
}
