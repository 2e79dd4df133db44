//! Document store capability contract and in-memory implementation.
//!
//! The pipeline treats the persistent document store as a plain keyed
//! collection: `get`, `put`, `delete`, and `list` with a simple filter.
//! The storage engine behind it is an external collaborator.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Document, SourceType};

/// Filter for [`DocumentStore::list`].
#[derive(Debug, Clone, Default)]
pub struct DocumentQuery {
    pub ticker: Option<String>,
    pub source_type: Option<SourceType>,
    pub published_after: Option<DateTime<Utc>>,
}

impl DocumentQuery {
    pub fn for_ticker(ticker: &str) -> Self {
        Self {
            ticker: Some(ticker.to_string()),
            ..Self::default()
        }
    }

    fn matches(&self, doc: &Document) -> bool {
        if let Some(ref t) = self.ticker {
            if doc.ticker.as_deref() != Some(t.as_str()) {
                return false;
            }
        }
        if let Some(st) = self.source_type {
            if doc.source_type != st {
                return false;
            }
        }
        if let Some(after) = self.published_after {
            if doc.published_at < after {
                return false;
            }
        }
        true
    }
}

/// Keyed document persistence used by the pipeline.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store a document, replacing any previous version under the same id.
    async fn put(&self, doc: Document) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Document>>;

    async fn delete(&self, id: &str) -> Result<()>;

    /// List documents matching the filter, most recent first.
    async fn list(&self, query: &DocumentQuery) -> Result<Vec<Document>>;
}

/// In-memory [`DocumentStore`] for tests and local use.
pub struct InMemoryDocumentStore {
    docs: RwLock<HashMap<String, Document>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn put(&self, doc: Document) -> Result<()> {
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        docs.insert(doc.id.clone(), doc);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        Ok(docs.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        docs.remove(id);
        Ok(())
    }

    async fn list(&self, query: &DocumentQuery) -> Result<Vec<Document>> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        let mut matching: Vec<Document> = docs.values().filter(|d| query.matches(d)).cloned().collect();
        matching.sort_by(|a, b| b.published_at.cmp(&a.published_at).then(a.id.cmp(&b.id)));
        Ok(matching)
    }
}
