//! Incremental sync from a document source into the vector index.
//!
//! One run:
//!
//! 1. list every file in the source,
//! 2. keep the files modified inside the [`SyncWindow`],
//! 3. fetch each kept file,
//! 4. upload the fetched documents through [`VectorIndexClient`],
//! 5. report a [`SyncSummary`].
//!
//! Per-file failures are counted and the run goes on. Fatal errors
//! (access denied, bad configuration, index dimension mismatch) end the run
//! with `Err`. A cancellation flag is checked before every fetch and before
//! the upload; once it is raised nothing more is fetched or written.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;

use crate::config::SyncConfig;
use crate::error::PipelineError;
use crate::models::{SourceFile, SyncSummary};
use crate::source::DocumentSource;
use crate::vector_client::VectorIndexClient;

/// Whether a file modified exactly `days` ago is inside the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Exclusive,
    Inclusive,
}

/// How far back an incremental sync looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub days: u32,
    pub boundary: Boundary,
}

impl SyncWindow {
    /// Files modified less than `days` ago.
    pub fn days(days: u32) -> Self {
        Self {
            days,
            boundary: Boundary::Exclusive,
        }
    }

    pub fn inclusive(mut self) -> Self {
        self.boundary = Boundary::Inclusive;
        self
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        let window = Self::days(config.window_days);
        if config.inclusive_boundary {
            window.inclusive()
        } else {
            window
        }
    }

    /// Files with a modification time in the future count as inside.
    pub fn contains(&self, now: DateTime<Utc>, modified: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(modified);
        let span = Duration::days(i64::from(self.days));
        match self.boundary {
            Boundary::Exclusive => age < span,
            Boundary::Inclusive => age <= span,
        }
    }
}

pub struct SyncOrchestrator {
    source: Arc<dyn DocumentSource>,
    client: VectorIndexClient,
    cancel: Option<watch::Receiver<bool>>,
}

impl SyncOrchestrator {
    pub fn new(source: Arc<dyn DocumentSource>, client: VectorIndexClient) -> Self {
        Self {
            source,
            client,
            cancel: None,
        }
    }

    /// Stop the run once `flag` becomes `true`.
    pub fn with_cancellation(mut self, flag: watch::Receiver<bool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn client(&self) -> &VectorIndexClient {
        &self.client
    }

    /// Sync files modified inside `window`, measured from now.
    pub async fn sync_recent(&self, window: SyncWindow) -> Result<SyncSummary, PipelineError> {
        self.sync_recent_at(Utc::now(), window).await
    }

    /// Sync files modified inside `window`, measured from `now`.
    pub async fn sync_recent_at(
        &self,
        now: DateTime<Utc>,
        window: SyncWindow,
    ) -> Result<SyncSummary, PipelineError> {
        tracing::info!(
            source = self.source.name(),
            days = window.days,
            boundary = ?window.boundary,
            "starting incremental sync"
        );
        self.run(|file| window.contains(now, file.modified_time))
            .await
    }

    /// Sync every file in the source.
    pub async fn sync_all(&self) -> Result<SyncSummary, PipelineError> {
        tracing::info!(source = self.source.name(), "starting full sync");
        self.run(|_| true).await
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    async fn run<F>(&self, in_window: F) -> Result<SyncSummary, PipelineError>
    where
        F: Fn(&SourceFile) -> bool,
    {
        let mut summary = SyncSummary::default();

        let files = self.source.list().await?;
        summary.considered = files.len();
        let (selected, skipped): (Vec<SourceFile>, Vec<SourceFile>) =
            files.into_iter().partition(|f| in_window(f));
        summary.skipped = skipped.len();
        tracing::info!(
            considered = summary.considered,
            selected = selected.len(),
            skipped = summary.skipped,
            "listed source files"
        );

        let mut documents = Vec::with_capacity(selected.len());
        for file in &selected {
            if self.is_cancelled() {
                tracing::warn!(fetched = documents.len(), "sync cancelled before fetch");
                summary.cancelled = true;
                return Ok(summary);
            }
            match self.source.get(&file.id).await {
                Ok(doc) => {
                    tracing::debug!(id = %file.id, name = %file.name, bytes = doc.text.len(), "fetched");
                    documents.push(doc);
                }
                Err(err) if err.is_fatal() => {
                    tracing::error!(id = %file.id, error = %err, "aborting sync");
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(id = %file.id, name = %file.name, error = %err, "fetch failed");
                    summary.record_failure(&file.id, &err);
                }
            }
        }

        if documents.is_empty() {
            tracing::info!("nothing to upload");
            return Ok(summary);
        }
        if self.is_cancelled() {
            tracing::warn!(fetched = documents.len(), "sync cancelled before upload");
            summary.cancelled = true;
            return Ok(summary);
        }

        if self.client.dimensions().is_none() {
            self.client.ensure_index().await?;
        }
        let report = self.client.upload(&documents).await?;
        summary.uploaded = report.written_count();
        for (id, err) in &report.failed {
            summary.record_failure(id, err);
        }

        tracing::info!(
            uploaded = summary.uploaded,
            failed = summary.failed,
            skipped = summary.skipped,
            "sync finished"
        );
        Ok(summary)
    }
}
