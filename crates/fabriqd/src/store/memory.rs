//! In-memory document store.
//!
//! Collections are plain JSON arrays, loaded once from a seed file at
//! startup. Reads are the only operations that exist; concurrent access
//! needs no locking because nothing ever mutates after load.

use super::{filter, pipeline, DocumentStore, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: HashMap<String, Vec<Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load collections from a JSON seed file shaped
    /// `{"products": [...], "orders": [...], ...}`.
    pub fn from_seed_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let root: HashMap<String, Vec<Value>> = serde_json::from_str(&text)?;
        let total: usize = root.values().map(Vec::len).sum();
        info!(
            collections = root.len(),
            documents = total,
            "loaded store seed from {}",
            path.display()
        );
        Ok(Self { collections: root })
    }

    /// Insert documents into a collection (test and seed construction).
    pub fn insert_many(&mut self, collection: &str, docs: Vec<Value>) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .extend(docs);
    }

    pub fn collection_count(&self) -> usize {
        self.collections.len()
    }

    fn collection(&self, name: &str) -> Result<&[Value], StoreError> {
        self.collections
            .get(name)
            .map(|v| v.as_slice())
            .ok_or_else(|| StoreError::UnknownCollection(name.to_string()))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(
        &self,
        collection: &str,
        filter_doc: &Value,
        projection: Option<&Value>,
        limit: usize,
    ) -> Result<Vec<Value>, StoreError> {
        let docs = self.collection(collection)?;
        let mut out: Vec<Value> = docs
            .iter()
            .filter(|d| filter::matches(d, filter_doc))
            .take(limit)
            .cloned()
            .collect();

        if let Some(projection) = projection {
            if projection.as_object().map(|o| !o.is_empty()).unwrap_or(false) {
                out = pipeline::run(
                    out,
                    &[serde_json::json!({ "$project": projection })],
                    &self.collections,
                )?;
            }
        }
        Ok(out)
    }

    async fn count_documents(
        &self,
        collection: &str,
        filter_doc: &Value,
    ) -> Result<u64, StoreError> {
        let docs = self.collection(collection)?;
        Ok(docs.iter().filter(|d| filter::matches(d, filter_doc)).count() as u64)
    }

    async fn aggregate(
        &self,
        collection: &str,
        stages: &[Value],
    ) -> Result<Vec<Value>, StoreError> {
        let docs = self.collection(collection)?.to_vec();
        pipeline::run(docs, stages, &self.collections)
    }
}
