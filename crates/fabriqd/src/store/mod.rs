//! Read-only document store seam.
//!
//! The pipeline never owns a database connection; it is handed a
//! [`DocumentStore`] at construction time and issues exactly three read
//! operations through it. [`MemoryStore`] is the in-process implementation
//! used by the daemon and the test suite; a production deployment points
//! the same trait at the storefront's real document database.

mod filter;
mod memory;
mod pipeline;

pub use filter::{compare_values, lookup_path, matches};
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown collection '{0}'")]
    UnknownCollection(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// The narrow read interface the executor dispatches to.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Filtered, optionally projected read, capped at `limit` documents.
    async fn find(
        &self,
        collection: &str,
        filter: &Value,
        projection: Option<&Value>,
        limit: usize,
    ) -> Result<Vec<Value>, StoreError>;

    /// Count documents matching the filter.
    async fn count_documents(&self, collection: &str, filter: &Value) -> Result<u64, StoreError>;

    /// Run an aggregation pipeline.
    async fn aggregate(&self, collection: &str, pipeline: &[Value])
        -> Result<Vec<Value>, StoreError>;
}
