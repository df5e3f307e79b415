//! In-memory [`IndexBackend`] for tests and offline runs.
//!
//! Records live in a `HashMap` keyed by index name and record id behind a
//! `std::sync::RwLock`. Vector search is brute-force cosine similarity.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::models::{IndexRecord, SearchHit};

use super::{IndexBackend, IndexSchema, UpsertOutcome};

struct StoredIndex {
    schema: IndexSchema,
    records: HashMap<String, IndexRecord>,
}

#[derive(Default)]
pub struct InMemoryIndex {
    indexes: RwLock<HashMap<String, StoredIndex>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record in `index`, sorted by id.
    pub fn records(&self, index: &str) -> Vec<IndexRecord> {
        let indexes = self.indexes.read().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<IndexRecord> = indexes
            .get(index)
            .map(|stored| stored.records.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub fn schema(&self, index: &str) -> Option<IndexSchema> {
        let indexes = self.indexes.read().unwrap_or_else(PoisonError::into_inner);
        indexes.get(index).map(|stored| stored.schema.clone())
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

fn missing_index(name: &str) -> PipelineError {
    PipelineError::IndexService {
        message: format!("index '{}' does not exist", name),
        retryable: false,
    }
}

#[async_trait]
impl IndexBackend for InMemoryIndex {
    async fn vector_dimensions(&self, name: &str) -> Result<Option<usize>, PipelineError> {
        let indexes = self.indexes.read().unwrap_or_else(PoisonError::into_inner);
        Ok(indexes.get(name).map(|stored| stored.schema.dimensions))
    }

    async fn create_index(&self, schema: &IndexSchema) -> Result<(), PipelineError> {
        let mut indexes = self.indexes.write().unwrap_or_else(PoisonError::into_inner);
        indexes
            .entry(schema.name.clone())
            .or_insert_with(|| StoredIndex {
                schema: schema.clone(),
                records: HashMap::new(),
            });
        Ok(())
    }

    async fn upsert(
        &self,
        index: &str,
        records: &[IndexRecord],
    ) -> Result<Vec<UpsertOutcome>, PipelineError> {
        let mut indexes = self.indexes.write().unwrap_or_else(PoisonError::into_inner);
        let stored = indexes.get_mut(index).ok_or_else(|| missing_index(index))?;
        let dims = stored.schema.dimensions;

        Ok(records
            .iter()
            .map(|record| {
                let result = if record.content_vector.len() != dims {
                    Err(PipelineError::IndexService {
                        message: format!(
                            "vector for '{}' has {} dimensions, index expects {}",
                            record.id,
                            record.content_vector.len(),
                            dims
                        ),
                        retryable: false,
                    })
                } else {
                    stored.records.insert(record.id.clone(), record.clone());
                    Ok(())
                };
                UpsertOutcome {
                    id: record.id.clone(),
                    result,
                }
            })
            .collect())
    }

    async fn vector_search(
        &self,
        index: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>, PipelineError> {
        let indexes = self.indexes.read().unwrap_or_else(PoisonError::into_inner);
        let stored = indexes.get(index).ok_or_else(|| missing_index(index))?;

        let mut hits: Vec<SearchHit> = stored
            .records
            .values()
            .map(|record| SearchHit {
                id: record.id.clone(),
                content: record.content.clone(),
                metadata: record.metadata.clone(),
                score: cosine_similarity(vector, &record.content_vector) as f64,
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }
}
