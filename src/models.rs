//! Core data models used throughout the pipeline.
//!
//! These types represent the files, documents, and index records that flow
//! from a document source into the vector index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// A file as listed by a document source. Read-only from our side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub created_time: DateTime<Utc>,
    pub modified_time: DateTime<Utc>,
}

impl SourceFile {
    /// Source attributes serialized as the document's metadata string.
    pub fn metadata_json(&self) -> String {
        serde_json::json!({
            "name": self.name,
            "mimeType": self.mime_type,
            "createdTime": self.created_time.to_rfc3339(),
            "modifiedTime": self.modified_time.to_rfc3339(),
        })
        .to_string()
    }
}

/// Normalized plain-text diary entry, ready to be embedded.
#[derive(Debug, Clone, PartialEq)]
pub struct DiaryDocument {
    /// Mirrors [`SourceFile::id`].
    pub id: String,
    pub text: String,
    pub metadata: String,
}

/// A record in the remote vector index, keyed by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: String,
    pub content: String,
    pub content_vector: Vec<f32>,
    pub metadata: String,
}

/// A similarity-search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub metadata: String,
    pub score: f64,
}

/// Outcome of one upload call. Written ids stay written even when others fail.
#[derive(Debug, Default)]
pub struct UploadReport {
    pub written: Vec<String>,
    pub failed: Vec<(String, PipelineError)>,
}

impl UploadReport {
    pub fn written_count(&self) -> usize {
        self.written.len()
    }
}

/// Counts reported by a sync run.
///
/// For a run that was not cancelled,
/// `considered == skipped + uploaded + failed`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SyncSummary {
    /// Files listed by the source.
    pub considered: usize,
    /// Records written to the index.
    pub uploaded: usize,
    /// Files outside the sync window.
    pub skipped: usize,
    /// Files whose fetch or upload failed.
    pub failed: usize,
    /// `(id, reason)` for every failed file.
    pub failures: Vec<(String, String)>,
    pub cancelled: bool,
}

impl SyncSummary {
    pub(crate) fn record_failure(&mut self, id: &str, err: &PipelineError) {
        self.failed += 1;
        self.failures.push((id.to_string(), err.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn source_file_parses_drive_json() {
        let json = r#"{
            "id": "1AbC",
            "name": "2024-05-01.txt",
            "mimeType": "text/plain",
            "createdTime": "2024-05-01T09:00:00.000Z",
            "modifiedTime": "2024-05-02T10:30:00.123Z"
        }"#;
        let file: SourceFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.id, "1AbC");
        assert_eq!(file.mime_type, "text/plain");
        assert_eq!(
            file.created_time,
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn metadata_json_carries_source_attributes() {
        let file = SourceFile {
            id: "x".into(),
            name: "note.txt".into(),
            mime_type: "text/plain".into(),
            created_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            modified_time: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        };
        let meta: serde_json::Value = serde_json::from_str(&file.metadata_json()).unwrap();
        assert_eq!(meta["name"], "note.txt");
        assert_eq!(meta["mimeType"], "text/plain");
        assert!(meta["modifiedTime"].as_str().unwrap().starts_with("2024-01-02"));
    }
}
