//! Vector index backends.
//!
//! The [`IndexBackend`] trait is the storage seam of the pipeline: schema
//! management, id-keyed upsert, and nearest-neighbour search. Backends:
//!
//! | Backend | Purpose |
//! |---------|---------|
//! | [`AzureSearchIndex`] | Azure AI Search REST API |
//! | [`InMemoryIndex`] | tests and offline runs |
//!
//! Implementations must overwrite a record whose id already exists.

pub mod azure;
pub mod memory;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::models::{IndexRecord, SearchHit};

pub use azure::AzureSearchIndex;
pub use memory::InMemoryIndex;

/// Shape of the diary index.
///
/// Fields: `id` (key, filterable), `content` (searchable, analyzed),
/// `content_vector` (dense vector of `dimensions`), `metadata` (searchable).
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSchema {
    pub name: String,
    pub dimensions: usize,
    pub analyzer: String,
    pub vector_profile: String,
}

/// Per-record outcome of an upsert batch.
#[derive(Debug)]
pub struct UpsertOutcome {
    pub id: String,
    pub result: Result<(), PipelineError>,
}

#[async_trait]
pub trait IndexBackend: Send + Sync {
    /// Vector dimension of the existing index `name`, or `None` if the index
    /// does not exist.
    async fn vector_dimensions(&self, name: &str) -> Result<Option<usize>, PipelineError>;

    /// Create the index described by `schema`.
    async fn create_index(&self, schema: &IndexSchema) -> Result<(), PipelineError>;

    /// Insert or overwrite each record by id. A whole-batch failure is an
    /// `Err`; per-record rejections are reported in the outcomes.
    async fn upsert(
        &self,
        index: &str,
        records: &[IndexRecord],
    ) -> Result<Vec<UpsertOutcome>, PipelineError>;

    /// The `k` records nearest to `vector`, best first.
    async fn vector_search(
        &self,
        index: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>, PipelineError>;
}
