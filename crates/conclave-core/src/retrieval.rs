//! Retrieval seam used by RAG agents

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One ranked text passage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub collection: String,
    /// Title of the document the passage was cut from
    pub source: String,
    pub score: f32,
}

/// Given a query and a result count, return up to `k` ranked passages drawn
/// only from the named collections.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, collections: &[String], k: usize) -> Result<Vec<Passage>>;
}

/// Retriever with no documents at all
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRetriever;

#[async_trait]
impl Retriever for NoRetriever {
    async fn retrieve(&self, _query: &str, _collections: &[String], _k: usize) -> Result<Vec<Passage>> {
        Ok(Vec::new())
    }
}
