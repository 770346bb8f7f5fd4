//! Knowledge sets: named document collections that RAG profiles search

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use conclave_core::{ConclaveError, Passage, ProfileRegistry, Result, Retriever};

use crate::chunk::split_text;
use crate::index::PassageIndex;
use crate::loader::{DocumentFormat, load_document};
use crate::sqlite::{KnowledgeDb, KnowledgeSetRecord};

const MAX_NAME_LEN: usize = 64;

/// A knowledge set as reported to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSet {
    pub name: String,
    pub description: String,
    /// Indexed passages, not source files
    pub document_count: usize,
    pub created_at: DateTime<Utc>,
    pub assigned_profiles: Vec<String>,
}

/// Knowledge set metadata in SQLite plus their passages in Tantivy
pub struct KnowledgeBase {
    db: Arc<KnowledgeDb>,
    index: Arc<PassageIndex>,
    registry: Arc<ProfileRegistry>,
}

impl KnowledgeBase {
    pub fn new(db: Arc<KnowledgeDb>, index: Arc<PassageIndex>, registry: Arc<ProfileRegistry>) -> Self {
        Self {
            db,
            index,
            registry,
        }
    }

    /// Open `<data_dir>/conclave.db` and `<data_dir>/index`
    pub fn open(data_dir: &Path, registry: Arc<ProfileRegistry>) -> anyhow::Result<Self> {
        info!("Opening knowledge base in {}", data_dir.display());
        let db = KnowledgeDb::new(data_dir.join("conclave.db")).context("Failed to open database")?;
        let index = PassageIndex::open(data_dir.join("index")).context("Failed to open index")?;
        Ok(Self::new(Arc::new(db), Arc::new(index), registry))
    }

    /// Shared database handle, also used for session storage
    pub fn db(&self) -> Arc<KnowledgeDb> {
        self.db.clone()
    }

    pub async fn create(&self, name: &str, description: &str) -> Result<KnowledgeSet> {
        validate_name(name)?;
        let inserted = self
            .db
            .insert_knowledge_set(name, description)
            .await
            .map_err(ConclaveError::storage)?;
        if !inserted {
            return Err(ConclaveError::Conflict(format!("knowledge set '{}'", name)));
        }
        info!("Created knowledge set '{}'", name);
        self.get(name).await
    }

    pub async fn get(&self, name: &str) -> Result<KnowledgeSet> {
        let record = self
            .db
            .get_knowledge_set(name)
            .await
            .map_err(ConclaveError::storage)?
            .ok_or_else(|| ConclaveError::KnowledgeSetNotFound(name.to_string()))?;
        self.describe(record).await
    }

    pub async fn list(&self) -> Result<Vec<KnowledgeSet>> {
        let records = self
            .db
            .list_knowledge_sets()
            .await
            .map_err(ConclaveError::storage)?;
        let mut sets = Vec::with_capacity(records.len());
        for record in records {
            sets.push(self.describe(record).await?);
        }
        Ok(sets)
    }

    /// Only the description can change; the name is the collection key
    pub async fn update(&self, name: &str, description: &str) -> Result<KnowledgeSet> {
        let updated = self
            .db
            .update_knowledge_set(name, description)
            .await
            .map_err(ConclaveError::storage)?;
        if !updated {
            return Err(ConclaveError::KnowledgeSetNotFound(name.to_string()));
        }
        self.get(name).await
    }

    /// Delete a set and its passages. Refused while any profile uses it.
    pub async fn delete(&self, name: &str) -> Result<()> {
        if self
            .db
            .get_knowledge_set(name)
            .await
            .map_err(ConclaveError::storage)?
            .is_none()
        {
            return Err(ConclaveError::KnowledgeSetNotFound(name.to_string()));
        }

        let assigned = self.registry.profiles_using_collection(name).await;
        if let Some(first) = assigned.first() {
            return Err(ConclaveError::in_use(
                name,
                format!("assigned to profile '{}'", first),
            ));
        }

        let index = self.index.clone();
        let collection = name.to_string();
        tokio::task::spawn_blocking(move || index.delete_collection(&collection))
            .await
            .context("spawn_blocking task panicked")
            .and_then(|r| r)
            .map_err(ConclaveError::storage)?;
        self.db
            .delete_knowledge_set(name)
            .await
            .map_err(ConclaveError::storage)?;

        info!("Deleted knowledge set '{}'", name);
        Ok(())
    }

    /// Chunk a text document into a set; returns the number of passages added
    pub async fn add_document(
        &self,
        name: &str,
        title: &str,
        text: &str,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<usize> {
        if text.trim().is_empty() {
            return Err(ConclaveError::validation("document text is empty"));
        }
        if chunk_size == 0 {
            return Err(ConclaveError::validation("chunk_size must be positive"));
        }
        if chunk_overlap >= chunk_size {
            return Err(ConclaveError::validation(
                "chunk_overlap must be smaller than chunk_size",
            ));
        }
        if self
            .db
            .get_knowledge_set(name)
            .await
            .map_err(ConclaveError::storage)?
            .is_none()
        {
            return Err(ConclaveError::KnowledgeSetNotFound(name.to_string()));
        }

        let chunks = split_text(text, chunk_size, chunk_overlap);
        let index = self.index.clone();
        let collection = name.to_string();
        let source = title.to_string();
        let added = tokio::task::spawn_blocking(move || index.add_passages(&collection, &source, &chunks))
            .await
            .context("spawn_blocking task panicked")
            .and_then(|r| r)
            .map_err(ConclaveError::storage)?;

        info!("Added '{}' to knowledge set '{}' as {} passages", title, name, added);
        Ok(added)
    }

    /// Load an uploaded file by its extension, then index it like
    /// [`add_document`](Self::add_document) under the file name
    pub async fn add_file(
        &self,
        name: &str,
        file_name: &str,
        bytes: Vec<u8>,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<usize> {
        if self
            .db
            .get_knowledge_set(name)
            .await
            .map_err(ConclaveError::storage)?
            .is_none()
        {
            return Err(ConclaveError::KnowledgeSetNotFound(name.to_string()));
        }
        DocumentFormat::from_file_name(file_name)?;

        let owned_name = file_name.to_string();
        let text = tokio::task::spawn_blocking(move || load_document(&owned_name, &bytes))
            .await
            .map_err(|e| {
                ConclaveError::validation(format!("could not read '{}': {}", file_name, e))
            })??;

        self.add_document(name, file_name, &text, chunk_size, chunk_overlap)
            .await
    }

    async fn describe(&self, record: KnowledgeSetRecord) -> Result<KnowledgeSet> {
        let document_count = self.index.count(&record.name).map_err(ConclaveError::storage)?;
        let assigned_profiles = self.registry.profiles_using_collection(&record.name).await;
        Ok(KnowledgeSet {
            name: record.name,
            description: record.description,
            document_count,
            created_at: record.created_at,
            assigned_profiles,
        })
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(ConclaveError::validation(format!(
            "knowledge set name must be 1 to {} characters",
            MAX_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConclaveError::validation(format!(
            "knowledge set name '{}' may only contain letters, digits, '-' and '_'",
            name
        )));
    }
    Ok(())
}

#[async_trait]
impl Retriever for KnowledgeBase {
    async fn retrieve(&self, query: &str, collections: &[String], k: usize) -> anyhow::Result<Vec<Passage>> {
        let index = self.index.clone();
        let query = query.to_string();
        let collections = collections.to_vec();
        let passages = tokio::task::spawn_blocking(move || index.search(&query, &collections, k))
            .await
            .context("spawn_blocking task panicked")??;
        debug!("Retrieved {} passages", passages.len());
        Ok(passages)
    }
}
