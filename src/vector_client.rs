//! Embedding plus vector index, behind one client.
//!
//! [`VectorIndexClient`] owns the diary index schema. It learns the
//! embedding dimension by embedding a probe string, creates the index when
//! it is missing, and refuses to write into an index whose vector size
//! differs from what the model produces.
//!
//! # Upload
//!
//! ```text
//! docs ──dedupe──▶ embed (batches, per-doc fallback) ──▶ upsert (batches)
//!                        │                                    │
//!                        └── failed ids ──▶ UploadReport ◀────┘
//! ```
//!
//! Each stage keeps going past per-record failures; fatal errors
//! ([`PipelineError::is_fatal`]) abort the call.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use crate::config::IndexConfig;
use crate::embedding::{Embedder, PROBE_TEXT};
use crate::error::{PipelineError, Service};
use crate::index::{IndexBackend, IndexSchema};
use crate::models::{DiaryDocument, IndexRecord, SearchHit, UploadReport};
use crate::retry::RetryPolicy;

const DEFAULT_EMBED_BATCH: usize = 16;

pub struct VectorIndexClient {
    embedder: Arc<dyn Embedder>,
    backend: Arc<dyn IndexBackend>,
    index_name: String,
    analyzer: String,
    vector_profile: String,
    embed_batch_size: usize,
    upsert_batch_size: usize,
    retry: RetryPolicy,
    dimensions: OnceLock<usize>,
}

impl VectorIndexClient {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        backend: Arc<dyn IndexBackend>,
        config: &IndexConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            embedder,
            backend,
            index_name: config.name.clone(),
            analyzer: config.analyzer.clone(),
            vector_profile: config.profile.clone(),
            embed_batch_size: DEFAULT_EMBED_BATCH,
            upsert_batch_size: config.batch_size.max(1),
            retry,
            dimensions: OnceLock::new(),
        }
    }

    /// Number of texts sent per embedding request.
    pub fn with_embedding_batch(mut self, size: usize) -> Self {
        self.embed_batch_size = size.max(1);
        self
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Vector dimension established by [`ensure_index`](Self::ensure_index).
    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions.get().copied()
    }

    /// Make sure the index exists with the model's vector dimension.
    ///
    /// Embeds [`PROBE_TEXT`] to learn the dimension, creates the index if it
    /// is missing, and fails with [`PipelineError::DimensionMismatch`] if an
    /// existing index stores vectors of another size.
    pub async fn ensure_index(&self) -> Result<usize, PipelineError> {
        let expected = self.embed(PROBE_TEXT).await?.len();
        if expected == 0 {
            return Err(PipelineError::service(
                Service::Embedding,
                format!("model {} returned an empty vector", self.embedder.model_name()),
                false,
            ));
        }

        let existing = self
            .retry
            .run("read index schema", || {
                self.backend.vector_dimensions(&self.index_name)
            })
            .await?;

        match existing {
            Some(existing) if existing != expected => {
                return Err(PipelineError::DimensionMismatch {
                    index: self.index_name.clone(),
                    existing,
                    expected,
                });
            }
            Some(_) => {
                tracing::debug!(index = %self.index_name, dimensions = expected, "index exists");
            }
            None => {
                let schema = IndexSchema {
                    name: self.index_name.clone(),
                    dimensions: expected,
                    analyzer: self.analyzer.clone(),
                    vector_profile: self.vector_profile.clone(),
                };
                self.retry
                    .run("create index", || self.backend.create_index(&schema))
                    .await?;
                tracing::info!(index = %self.index_name, dimensions = expected, "index created");
            }
        }

        let stored = *self.dimensions.get_or_init(|| expected);
        if stored != expected {
            return Err(PipelineError::DimensionMismatch {
                index: self.index_name.clone(),
                existing: stored,
                expected,
            });
        }
        Ok(expected)
    }

    /// Embed one text, retrying transient failures.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let input = [text.to_string()];
        let mut vectors = self
            .retry
            .run("embed", || self.embedder.embed_batch(&input))
            .await?;
        vectors.pop().ok_or_else(|| {
            PipelineError::service(Service::Embedding, "no embedding returned", false)
        })
    }

    /// Embed and upsert `docs`, overwriting records with the same id.
    ///
    /// Duplicate ids within `docs` collapse to the last occurrence. Per-record
    /// failures are listed in the report; ids already written stay written.
    pub async fn upload(&self, docs: &[DiaryDocument]) -> Result<UploadReport, PipelineError> {
        let dims = self.dimensions().ok_or(PipelineError::IndexNotReady)?;
        let mut report = UploadReport::default();
        let docs = collapse_duplicates(docs);
        if docs.is_empty() {
            return Ok(report);
        }

        let mut records = Vec::with_capacity(docs.len());
        for chunk in docs.chunks(self.embed_batch_size) {
            for (doc, vector) in self.embed_chunk(chunk, &mut report).await? {
                if vector.len() != dims {
                    report.failed.push((
                        doc.id.clone(),
                        PipelineError::service(
                            Service::Embedding,
                            format!(
                                "embedding for '{}' has {} dimensions, index expects {}",
                                doc.id,
                                vector.len(),
                                dims
                            ),
                            false,
                        ),
                    ));
                    continue;
                }
                records.push(IndexRecord {
                    id: doc.id.clone(),
                    content: doc.text.clone(),
                    content_vector: vector,
                    metadata: doc.metadata.clone(),
                });
            }
        }

        for batch in records.chunks(self.upsert_batch_size) {
            self.upsert_batch(batch, &mut report).await?;
        }

        tracing::info!(
            index = %self.index_name,
            written = report.written.len(),
            failed = report.failed.len(),
            "upload finished"
        );
        Ok(report)
    }

    /// The `k` records nearest to `query`.
    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<SearchHit>, PipelineError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embed(query).await?;
        self.retry
            .run("vector search", || {
                self.backend.vector_search(&self.index_name, &vector, k)
            })
            .await
    }

    /// Embed one chunk; on a non-fatal batch failure fall back to one
    /// request per document so a single bad text fails alone.
    async fn embed_chunk<'d>(
        &self,
        chunk: &[&'d DiaryDocument],
        report: &mut UploadReport,
    ) -> Result<Vec<(&'d DiaryDocument, Vec<f32>)>, PipelineError> {
        let texts: Vec<String> = chunk.iter().map(|d| d.text.clone()).collect();
        let batch_err = match self
            .retry
            .run("embed batch", || self.embedder.embed_batch(&texts))
            .await
        {
            Ok(vectors) if vectors.len() == chunk.len() => {
                return Ok(chunk.iter().copied().zip(vectors).collect())
            }
            Ok(vectors) => PipelineError::service(
                Service::Embedding,
                format!(
                    "model {} returned {} vectors for {} texts",
                    self.embedder.model_name(),
                    vectors.len(),
                    chunk.len()
                ),
                false,
            ),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => err,
        };

        if chunk.len() == 1 {
            report.failed.push((chunk[0].id.clone(), batch_err));
            return Ok(Vec::new());
        }

        tracing::warn!(
            size = chunk.len(),
            error = %batch_err,
            "embedding batch failed, embedding documents one by one"
        );
        let mut embedded = Vec::with_capacity(chunk.len());
        for doc in chunk {
            match self.embed(&doc.text).await {
                Ok(vector) => embedded.push((*doc, vector)),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::warn!(id = %doc.id, error = %err, "embedding failed");
                    report.failed.push((doc.id.clone(), err));
                }
            }
        }
        Ok(embedded)
    }

    /// Upsert one batch. Records rejected with a transient status are
    /// resubmitted on their own until the retry budget runs out.
    async fn upsert_batch(
        &self,
        batch: &[IndexRecord],
        report: &mut UploadReport,
    ) -> Result<(), PipelineError> {
        let mut pending: Vec<IndexRecord> = batch.to_vec();
        let mut attempt = 0;

        loop {
            let outcomes = match self.backend.upsert(&self.index_name, &pending).await {
                Ok(outcomes) => outcomes,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    self.back_off(attempt, pending.len(), &err).await;
                    continue;
                }
                Err(err) => {
                    tracing::warn!(size = pending.len(), error = %err, "upsert batch failed");
                    for record in &pending {
                        report.failed.push((record.id.clone(), err.clone()));
                    }
                    return Ok(());
                }
            };

            let mut reported = HashSet::new();
            let mut resubmit = HashSet::new();
            let mut last_transient = None;
            for outcome in outcomes {
                reported.insert(outcome.id.clone());
                match outcome.result {
                    Ok(()) => report.written.push(outcome.id),
                    Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                        resubmit.insert(outcome.id);
                        last_transient = Some(err);
                    }
                    Err(err) => {
                        tracing::warn!(id = %outcome.id, error = %err, "record rejected");
                        report.failed.push((outcome.id, err));
                    }
                }
            }
            for record in pending.iter().filter(|r| !reported.contains(&r.id)) {
                report.failed.push((
                    record.id.clone(),
                    PipelineError::service(
                        Service::Index,
                        format!("no status returned for '{}'", record.id),
                        false,
                    ),
                ));
            }

            match last_transient {
                Some(err) if !resubmit.is_empty() => {
                    pending.retain(|r| resubmit.contains(&r.id));
                    attempt += 1;
                    self.back_off(attempt, pending.len(), &err).await;
                }
                _ => return Ok(()),
            }
        }
    }

    async fn back_off(&self, attempt: u32, records: usize, err: &PipelineError) {
        let delay = self.retry.delay_for(attempt);
        tracing::warn!(
            attempt,
            records,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient upsert failure, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Keep one document per id: the last occurrence, at the first position.
fn collapse_duplicates(docs: &[DiaryDocument]) -> Vec<&DiaryDocument> {
    let mut position: HashMap<&str, usize> = HashMap::new();
    let mut unique: Vec<&DiaryDocument> = Vec::with_capacity(docs.len());
    for doc in docs {
        match position.get(doc.id.as_str()) {
            Some(&i) => unique[i] = doc,
            None => {
                position.insert(doc.id.as_str(), unique.len());
                unique.push(doc);
            }
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{InMemoryIndex, UpsertOutcome};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Character-histogram embedder. Texts containing `poison` fail.
    struct HistogramEmbedder {
        dims: usize,
        calls: AtomicUsize,
    }

    impl HistogramEmbedder {
        fn new(dims: usize) -> Self {
            Self {
                dims,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for HistogramEmbedder {
        fn model_name(&self) -> &str {
            "histogram"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if texts.iter().any(|t| t.contains("poison")) {
                return Err(PipelineError::EmbeddingService {
                    message: "content rejected".into(),
                    retryable: false,
                });
            }
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; self.dims];
                    for b in t.bytes() {
                        v[b as usize % self.dims] += 1.0;
                    }
                    v
                })
                .collect())
        }
    }

    /// Rejects `flaky` with a 503 the first time it is seen.
    struct FlakyIndex {
        inner: InMemoryIndex,
        rejected: Mutex<bool>,
    }

    #[async_trait]
    impl IndexBackend for FlakyIndex {
        async fn vector_dimensions(&self, name: &str) -> Result<Option<usize>, PipelineError> {
            self.inner.vector_dimensions(name).await
        }

        async fn create_index(&self, schema: &IndexSchema) -> Result<(), PipelineError> {
            self.inner.create_index(schema).await
        }

        async fn upsert(
            &self,
            index: &str,
            records: &[IndexRecord],
        ) -> Result<Vec<UpsertOutcome>, PipelineError> {
            let reject = {
                let mut rejected = self.rejected.lock().unwrap();
                let first = !*rejected && records.iter().any(|r| r.id == "flaky");
                if first {
                    *rejected = true;
                }
                first
            };
            let (flaky, rest): (Vec<IndexRecord>, Vec<IndexRecord>) =
                records.iter().cloned().partition(|r| reject && r.id == "flaky");
            let mut outcomes = self.inner.upsert(index, &rest).await?;
            outcomes.extend(flaky.into_iter().map(|r| UpsertOutcome {
                id: r.id,
                result: Err(PipelineError::IndexService {
                    message: "HTTP 503".into(),
                    retryable: true,
                }),
            }));
            Ok(outcomes)
        }

        async fn vector_search(
            &self,
            index: &str,
            vector: &[f32],
            k: usize,
        ) -> Result<Vec<SearchHit>, PipelineError> {
            self.inner.vector_search(index, vector, k).await
        }
    }

    fn doc(id: &str, text: &str) -> DiaryDocument {
        DiaryDocument {
            id: id.into(),
            text: text.into(),
            metadata: "{}".into(),
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(2, Duration::ZERO, Duration::ZERO)
    }

    fn client(
        embedder: Arc<dyn Embedder>,
        backend: Arc<dyn IndexBackend>,
    ) -> VectorIndexClient {
        VectorIndexClient::new(embedder, backend, &IndexConfig::default(), fast_retry())
    }

    #[tokio::test]
    async fn upload_requires_ensure_index() {
        let index = Arc::new(InMemoryIndex::new());
        let client = client(Arc::new(HistogramEmbedder::new(4)), index);
        let err = client.upload(&[doc("d1", "a")]).await.unwrap_err();
        assert_eq!(err, PipelineError::IndexNotReady);
    }

    #[tokio::test]
    async fn ensure_index_creates_with_probe_dimension() {
        let index = Arc::new(InMemoryIndex::new());
        let client = client(Arc::new(HistogramEmbedder::new(6)), index.clone());
        assert_eq!(client.ensure_index().await.unwrap(), 6);
        assert_eq!(client.ensure_index().await.unwrap(), 6);

        let schema = index.schema("diary-vector").unwrap();
        assert_eq!(schema.dimensions, 6);
        assert_eq!(schema.analyzer, "ja.microsoft");
        assert_eq!(schema.vector_profile, "myHnswProfile");
    }

    #[tokio::test]
    async fn existing_index_with_other_dimension_is_refused() {
        let index = Arc::new(InMemoryIndex::new());
        index
            .create_index(&IndexSchema {
                name: "diary-vector".into(),
                dimensions: 5,
                analyzer: "ja.microsoft".into(),
                vector_profile: "myHnswProfile".into(),
            })
            .await
            .unwrap();

        let client = client(Arc::new(HistogramEmbedder::new(3)), index.clone());
        let err = client.ensure_index().await.unwrap_err();
        assert_eq!(
            err,
            PipelineError::DimensionMismatch {
                index: "diary-vector".into(),
                existing: 5,
                expected: 3,
            }
        );
        assert!(client.upload(&[doc("d1", "x")]).await.is_err());
        assert!(index.records("diary-vector").is_empty());
    }

    #[tokio::test]
    async fn reupload_overwrites_by_id() {
        let index = Arc::new(InMemoryIndex::new());
        let client = client(Arc::new(HistogramEmbedder::new(4)), index.clone());
        client.ensure_index().await.unwrap();

        client.upload(&[doc("d1", "A")]).await.unwrap();
        client.upload(&[doc("d1", "B")]).await.unwrap();

        let records = index.records("diary-vector");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "B");
    }

    #[tokio::test]
    async fn failed_batch_falls_back_to_single_documents() {
        let index = Arc::new(InMemoryIndex::new());
        let embedder = Arc::new(HistogramEmbedder::new(4));
        let client = client(embedder.clone(), index.clone()).with_embedding_batch(8);
        client.ensure_index().await.unwrap();

        let report = client
            .upload(&[doc("a", "fine"), doc("b", "poison pill"), doc("c", "also fine")])
            .await
            .unwrap();

        assert_eq!(report.written, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "b");
        // probe + batch + three singles
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 5);
        assert_eq!(index.records("diary-vector").len(), 2);
    }

    /// Returns a vector for the first text only.
    struct ShortEmbedder(HistogramEmbedder);

    #[async_trait]
    impl Embedder for ShortEmbedder {
        fn model_name(&self) -> &str {
            "short"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
            let mut vectors = self.0.embed_batch(texts).await?;
            vectors.truncate(1);
            Ok(vectors)
        }
    }

    #[tokio::test]
    async fn short_batch_response_falls_back_to_single_documents() {
        let index = Arc::new(InMemoryIndex::new());
        let embedder = Arc::new(ShortEmbedder(HistogramEmbedder::new(4)));
        let client = client(embedder.clone(), index.clone()).with_embedding_batch(8);
        client.ensure_index().await.unwrap();

        let report = client
            .upload(&[doc("a", "one"), doc("b", "two"), doc("c", "three")])
            .await
            .unwrap();

        assert_eq!(report.written_count(), 3);
        assert!(report.failed.is_empty());
        // dimension check + short batch + three singles
        assert_eq!(embedder.0.calls.load(Ordering::SeqCst), 5);
        assert_eq!(index.records("diary-vector").len(), 3);
    }

    #[tokio::test]
    async fn duplicate_ids_collapse_to_last() {
        let index = Arc::new(InMemoryIndex::new());
        let client = client(Arc::new(HistogramEmbedder::new(4)), index.clone());
        client.ensure_index().await.unwrap();

        let report = client
            .upload(&[doc("d1", "old"), doc("d2", "other"), doc("d1", "new")])
            .await
            .unwrap();
        assert_eq!(report.written_count(), 2);
        let records = index.records("diary-vector");
        assert_eq!(records[0].content, "new");
    }

    #[tokio::test]
    async fn transient_record_rejection_is_resubmitted() {
        let backend = Arc::new(FlakyIndex {
            inner: InMemoryIndex::new(),
            rejected: Mutex::new(false),
        });
        let client = client(Arc::new(HistogramEmbedder::new(4)), backend.clone());
        client.ensure_index().await.unwrap();

        let report = client
            .upload(&[doc("steady", "one"), doc("flaky", "two")])
            .await
            .unwrap();
        assert!(report.failed.is_empty());
        assert_eq!(report.written_count(), 2);
        assert_eq!(backend.inner.records("diary-vector").len(), 2);
    }

    #[tokio::test]
    async fn search_returns_nearest_first() {
        let index = Arc::new(InMemoryIndex::new());
        let client = client(Arc::new(HistogramEmbedder::new(4)), index);
        client.ensure_index().await.unwrap();
        client
            .upload(&[doc("fruit", "apple"), doc("animal", "zebra")])
            .await
            .unwrap();

        let hits = client.similarity_search("apple", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "fruit");
        assert!(client.similarity_search("apple", 0).await.unwrap().is_empty());
    }

    #[test]
    fn collapse_keeps_first_position() {
        let docs = [doc("a", "1"), doc("b", "2"), doc("a", "3")];
        let unique = collapse_duplicates(&docs);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].text, "3");
        assert_eq!(unique[1].id, "b");
    }
}
