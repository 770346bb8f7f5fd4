//! SQLite layer: knowledge set metadata and durable session history

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use conclave_core::session::SessionBackend;
use conclave_core::{Message, Sender, SessionInfo};

/// Stored knowledge set metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSetRecord {
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// SQLite database wrapper (thread-safe via Arc<Mutex>)
pub struct KnowledgeDb {
    conn: Arc<Mutex<Connection>>,
}

impl KnowledgeDb {
    /// Open (or create) the database file and its schema
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path.as_ref()).context("Failed to open SQLite database")?;
        info!("Initializing knowledge database at {:?}", path.as_ref());
        Self::init(conn)
    }

    /// Database that lives only as long as this value
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS knowledge_sets (
                name TEXT PRIMARY KEY,
                description TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                profile_name TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS session_messages (
                session_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                sender TEXT NOT NULL,
                text TEXT NOT NULL,
                tasks TEXT,
                PRIMARY KEY (session_id, position),
                FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_created ON sessions(created_at);",
        )
        .context("Failed to initialize schema")?;

        debug!("Database schema initialized successfully");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(|poisoned| {
                warn!("Database mutex was poisoned, recovering");
                poisoned.into_inner()
            });
            f(&mut conn)
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    /// Insert a knowledge set; returns false if the name is taken
    pub async fn insert_knowledge_set(&self, name: &str, description: &str) -> Result<bool> {
        let name = name.to_owned();
        let description = description.to_owned();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO knowledge_sets (name, description, created_at)
                 VALUES (?1, ?2, ?3)",
                params![&name, &description, Utc::now().to_rfc3339()],
            )?;
            debug!("Insert knowledge set '{}': {}", name, inserted == 1);
            Ok(inserted == 1)
        })
        .await
    }

    pub async fn get_knowledge_set(&self, name: &str) -> Result<Option<KnowledgeSetRecord>> {
        let name = name.to_owned();
        self.with_conn(move |conn| {
            let record = conn
                .query_row(
                    "SELECT name, description, created_at FROM knowledge_sets WHERE name = ?1",
                    params![&name],
                    Self::row_to_knowledge_set,
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    /// All knowledge sets, by name
    pub async fn list_knowledge_sets(&self) -> Result<Vec<KnowledgeSetRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, description, created_at FROM knowledge_sets ORDER BY name",
            )?;
            let records = stmt
                .query_map([], Self::row_to_knowledge_set)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }

    /// Returns false if no such set exists
    pub async fn update_knowledge_set(&self, name: &str, description: &str) -> Result<bool> {
        let name = name.to_owned();
        let description = description.to_owned();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE knowledge_sets SET description = ?2 WHERE name = ?1",
                params![&name, &description],
            )?;
            Ok(updated == 1)
        })
        .await
    }

    /// Returns false if no such set exists
    pub async fn delete_knowledge_set(&self, name: &str) -> Result<bool> {
        let name = name.to_owned();
        self.with_conn(move |conn| {
            let deleted = conn.execute("DELETE FROM knowledge_sets WHERE name = ?1", params![&name])?;
            Ok(deleted == 1)
        })
        .await
    }

    fn row_to_knowledge_set(row: &rusqlite::Row) -> rusqlite::Result<KnowledgeSetRecord> {
        Ok(KnowledgeSetRecord {
            name: row.get(0)?,
            description: row.get(1)?,
            created_at: row.get::<_, String>(2)?.parse().unwrap_or_else(|_| Utc::now()),
        })
    }

    pub async fn insert_session(&self, info: &SessionInfo) -> Result<()> {
        let info = info.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, profile_name, created_at) VALUES (?1, ?2, ?3)",
                params![&info.session_id, &info.profile_name, info.created_at.to_rfc3339()],
            )?;
            debug!("Inserted session {}", info.session_id);
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<SessionInfo>> {
        let id = id.to_owned();
        self.with_conn(move |conn| {
            let info = conn
                .query_row(
                    "SELECT id, profile_name, created_at FROM sessions WHERE id = ?1",
                    params![&id],
                    Self::row_to_session,
                )
                .optional()?;
            Ok(info)
        })
        .await
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, profile_name, created_at FROM sessions ORDER BY created_at DESC",
            )?;
            let sessions = stmt
                .query_map([], Self::row_to_session)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(sessions)
        })
        .await
    }

    /// Messages in order, or None if the session does not exist
    pub async fn get_messages(&self, id: &str) -> Result<Option<Vec<Message>>> {
        let id = id.to_owned();
        self.with_conn(move |conn| {
            let exists = conn
                .query_row("SELECT 1 FROM sessions WHERE id = ?1", params![&id], |_| Ok(()))
                .optional()?
                .is_some();
            if !exists {
                return Ok(None);
            }

            let mut stmt = conn.prepare(
                "SELECT sender, text, tasks FROM session_messages
                 WHERE session_id = ?1 ORDER BY position",
            )?;
            let messages = stmt
                .query_map(params![&id], Self::row_to_message)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(messages))
        })
        .await
    }

    /// Replace a session's messages in one transaction
    pub async fn replace_messages(&self, id: &str, messages: &[Message]) -> Result<()> {
        let id = id.to_owned();
        let rows = messages
            .iter()
            .map(|m| -> Result<(&'static str, String, Option<String>)> {
                let tasks = m.tasks.as_ref().map(serde_json::to_string).transpose()?;
                Ok((sender_tag(m.sender), m.text.clone(), tasks))
            })
            .collect::<Result<Vec<_>>>()?;

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM session_messages WHERE session_id = ?1", params![&id])?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO session_messages (session_id, position, sender, text, tasks)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for (position, (sender, text, tasks)) in rows.iter().enumerate() {
                    stmt.execute(params![&id, position as i64, sender, text, tasks])?;
                }
            }
            tx.commit()?;
            debug!("Stored {} messages for session {}", rows.len(), id);
            Ok(())
        })
        .await
    }

    /// Returns false if the session did not exist
    pub async fn delete_session(&self, id: &str) -> Result<bool> {
        let id = id.to_owned();
        self.with_conn(move |conn| {
            let deleted = conn.execute("DELETE FROM sessions WHERE id = ?1", params![&id])?;
            Ok(deleted == 1)
        })
        .await
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<SessionInfo> {
        Ok(SessionInfo {
            session_id: row.get(0)?,
            profile_name: row.get(1)?,
            created_at: row.get::<_, String>(2)?.parse().unwrap_or_else(|_| Utc::now()),
        })
    }

    fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
        let sender: String = row.get(0)?;
        let tasks_str: Option<String> = row.get(2)?;
        let tasks = tasks_str
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
            })?;

        Ok(Message {
            text: row.get(1)?,
            sender: if sender == "user" { Sender::User } else { Sender::Agent },
            tasks,
        })
    }
}

fn sender_tag(sender: Sender) -> &'static str {
    match sender {
        Sender::User => "user",
        Sender::Agent => "agent",
    }
}

/// `SessionBackend` over the knowledge database
pub struct SqliteSessionBackend {
    db: Arc<KnowledgeDb>,
}

impl SqliteSessionBackend {
    pub fn new(db: Arc<KnowledgeDb>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionBackend for SqliteSessionBackend {
    async fn create(&self, info: &SessionInfo) -> Result<()> {
        self.db.insert_session(info).await
    }

    async fn info(&self, session_id: &str) -> Result<Option<SessionInfo>> {
        self.db.get_session(session_id).await
    }

    async fn list(&self) -> Result<Vec<SessionInfo>> {
        self.db.list_sessions().await
    }

    async fn messages(&self, session_id: &str) -> Result<Option<Vec<Message>>> {
        self.db.get_messages(session_id).await
    }

    async fn set_messages(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        self.db.replace_messages(session_id, messages).await
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        self.db.delete_session(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::Task;
    use tempfile::TempDir;

    fn session(id: &str, profile: &str) -> SessionInfo {
        SessionInfo {
            session_id: id.to_string(),
            profile_name: profile.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_knowledge_set_operations() -> Result<()> {
        let db = KnowledgeDb::in_memory()?;

        assert!(db.insert_knowledge_set("policies", "HR policies").await?);
        assert!(!db.insert_knowledge_set("policies", "again").await?);
        assert!(db.insert_knowledge_set("manuals", "Product manuals").await?);

        let names: Vec<_> = db
            .list_knowledge_sets()
            .await?
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["manuals", "policies"]);

        assert!(db.update_knowledge_set("policies", "Updated").await?);
        assert_eq!(
            db.get_knowledge_set("policies").await?.unwrap().description,
            "Updated"
        );
        assert!(!db.update_knowledge_set("ghost", "x").await?);

        assert!(db.delete_knowledge_set("policies").await?);
        assert!(!db.delete_knowledge_set("policies").await?);
        assert!(db.get_knowledge_set("policies").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_session_messages_roundtrip() -> Result<()> {
        let db = KnowledgeDb::in_memory()?;
        db.insert_session(&session("s1", "default")).await?;

        assert_eq!(db.get_messages("s1").await?, Some(vec![]));
        assert_eq!(db.get_messages("nope").await?, None);

        let mut task = Task::planned(1, "Lookup", "find it", "rag");
        task.succeed("rag", "found");
        let messages = vec![
            Message::user("hi"),
            Message::agent("hello").with_tasks(vec![task]),
        ];
        db.replace_messages("s1", &messages).await?;
        assert_eq!(db.get_messages("s1").await?.unwrap(), messages);

        // Replacing drops the old rows
        db.replace_messages("s1", &messages[1..]).await?;
        assert_eq!(db.get_messages("s1").await?.unwrap().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_session_cascades() -> Result<()> {
        let db = KnowledgeDb::in_memory()?;
        db.insert_session(&session("s1", "default")).await?;
        db.replace_messages("s1", &[Message::user("hi")]).await?;

        assert!(db.delete_session("s1").await?);
        assert!(!db.delete_session("s1").await?);
        assert!(db.get_session("s1").await?.is_none());

        // Recreating the id starts from an empty history
        db.insert_session(&session("s1", "default")).await?;
        assert_eq!(db.get_messages("s1").await?, Some(vec![]));
        Ok(())
    }

    #[tokio::test]
    async fn test_backend_survives_reopen() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("data").join("conclave.db");
        {
            let backend = SqliteSessionBackend::new(Arc::new(KnowledgeDb::new(&path)?));
            backend.create(&session("s1", "manager")).await?;
            backend.set_messages("s1", &[Message::user("remember me")]).await?;
        }

        let backend = SqliteSessionBackend::new(Arc::new(KnowledgeDb::new(&path)?));
        let sessions = backend.list().await?;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].profile_name, "manager");
        assert_eq!(
            backend.messages("s1").await?.unwrap(),
            vec![Message::user("remember me")]
        );
        Ok(())
    }
}
