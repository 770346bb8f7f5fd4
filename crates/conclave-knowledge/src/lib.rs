//! Knowledge and persistence layer for conclave
//!
//! This crate provides:
//! - SQLite storage for knowledge set metadata and session history
//! - A Tantivy passage index partitioned by knowledge set
//! - Document loading by file extension and chunking
//! - `KnowledgeBase`, the retriever RAG agents search

pub mod chunk;
pub mod index;
pub mod knowledge;
pub mod loader;
pub mod sqlite;

// Re-export main types
pub use chunk::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, split_text};
pub use index::PassageIndex;
pub use knowledge::{KnowledgeBase, KnowledgeSet};
pub use loader::{DocumentFormat, SUPPORTED_EXTENSIONS, load_document};
pub use sqlite::{KnowledgeDb, KnowledgeSetRecord, SqliteSessionBackend};
