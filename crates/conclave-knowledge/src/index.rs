//! Tantivy passage index, partitioned by collection

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Mutex;
use tantivy::{
    collector::{Count, TopDocs},
    query::{BooleanQuery, Occur, Query, QueryParser, TermQuery},
    schema::*,
    Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use conclave_core::Passage;

/// Full-text index of document passages.
///
/// Every passage belongs to exactly one collection (knowledge set); searches
/// only ever see the collections they name.
pub struct PassageIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    id_field: Field,
    collection_field: Field,
    source_field: Field,
    content_field: Field,
}

impl PassageIndex {
    /// Create or open an index directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Initializing passage index at {:?}", path.as_ref());
        std::fs::create_dir_all(path.as_ref())?;

        let schema = Self::schema();
        let index = if path.as_ref().join("meta.json").exists() {
            Index::open_in_dir(path.as_ref())?
        } else {
            Index::create_in_dir(path.as_ref(), schema)?
        };
        Self::from_index(index)
    }

    /// Index held in RAM
    pub fn in_memory() -> Result<Self> {
        Self::from_index(Index::create_in_ram(Self::schema()))
    }

    fn schema() -> Schema {
        let mut builder = Schema::builder();
        builder.add_text_field("id", STRING | STORED);
        builder.add_text_field("collection", STRING | STORED);
        builder.add_text_field("source", STRING | STORED);
        builder.add_text_field("content", TEXT | STORED);
        builder.build()
    }

    fn from_index(index: Index) -> Result<Self> {
        let schema = index.schema();
        let field = |name: &str| {
            schema
                .get_field(name)
                .with_context(|| format!("Index schema has no '{}' field", name))
        };
        let id_field = field("id")?;
        let collection_field = field("collection")?;
        let source_field = field("source")?;
        let content_field = field("content")?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        // 50MB heap size for writer
        let writer = index
            .writer(50_000_000)
            .context("Failed to create index writer")?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            id_field,
            collection_field,
            source_field,
            content_field,
        })
    }

    /// Commit pending writes and make them visible to searches
    fn commit(&self, writer: &mut IndexWriter) -> Result<()> {
        writer.commit().context("Failed to commit index")?;
        self.reader.reload().context("Failed to reload index reader")?;
        Ok(())
    }

    fn lock_writer(&self) -> std::sync::MutexGuard<'_, IndexWriter> {
        self.writer.lock().unwrap_or_else(|poisoned| {
            warn!("Index writer mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Add passages cut from one document; returns how many were indexed
    pub fn add_passages(&self, collection: &str, source: &str, passages: &[String]) -> Result<usize> {
        let mut writer = self.lock_writer();
        for text in passages {
            let mut doc = TantivyDocument::default();
            doc.add_text(self.id_field, Uuid::new_v4().to_string());
            doc.add_text(self.collection_field, collection);
            doc.add_text(self.source_field, source);
            doc.add_text(self.content_field, text);
            writer.add_document(doc)?;
        }
        self.commit(&mut writer)?;

        debug!(
            "Indexed {} passages from '{}' into '{}'",
            passages.len(),
            source,
            collection
        );
        Ok(passages.len())
    }

    /// Top `k` passages for `query`, drawn only from `collections`
    pub fn search(&self, query: &str, collections: &[String], k: usize) -> Result<Vec<Passage>> {
        if collections.is_empty() || k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        // User text is not query syntax; tolerate stray operators
        let parser = QueryParser::for_index(&self.index, vec![self.content_field]);
        let (text_query, errors) = parser.parse_query_lenient(query);
        if !errors.is_empty() {
            debug!("Lenient parse of '{}' dropped {} fragments", query, errors.len());
        }

        let scope: Vec<(Occur, Box<dyn Query>)> = collections
            .iter()
            .map(|c| (Occur::Should, self.collection_term(c)))
            .collect();
        let combined = BooleanQuery::new(vec![
            (Occur::Must, text_query),
            (Occur::Must, Box::new(BooleanQuery::new(scope)) as Box<dyn Query>),
        ]);

        let searcher = self.reader.searcher();
        let top_docs = searcher.search(&combined, &TopDocs::with_limit(k))?;

        let mut passages = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let text_of = |field: Field| {
                doc.get_first(field)
                    .and_then(|v: &OwnedValue| v.as_str())
                    .unwrap_or("")
                    .to_string()
            };
            passages.push(Passage {
                text: text_of(self.content_field),
                collection: text_of(self.collection_field),
                source: text_of(self.source_field),
                score,
            });
        }

        debug!(
            "Search for '{}' in {:?} returned {} passages",
            query,
            collections,
            passages.len()
        );
        Ok(passages)
    }

    /// Number of passages stored in a collection
    pub fn count(&self, collection: &str) -> Result<usize> {
        let searcher = self.reader.searcher();
        Ok(searcher.search(&self.collection_term(collection), &Count)?)
    }

    /// Drop every passage of a collection
    pub fn delete_collection(&self, collection: &str) -> Result<()> {
        let mut writer = self.lock_writer();
        writer.delete_term(Term::from_field_text(self.collection_field, collection));
        self.commit(&mut writer)?;
        info!("Deleted passages of collection '{}'", collection);
        Ok(())
    }

    fn collection_term(&self, collection: &str) -> Box<dyn Query> {
        Box::new(TermQuery::new(
            Term::from_field_text(self.collection_field, collection),
            IndexRecordOption::Basic,
        ))
    }
}
