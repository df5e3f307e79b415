//! Local directory document source.
//!
//! Walks a directory of diary files (by default `**/*.txt` and `**/*.docx`)
//! and serves them through the same [`DocumentSource`] interface as Drive.
//! File ids are the SHA-256 hex digest of the path relative to the root, so
//! re-uploading the same directory overwrites instead of duplicating.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::config::LocalConfig;
use crate::error::PipelineError;
use crate::models::{DiaryDocument, SourceFile};
use crate::normalize::{TextNormalizer, MIME_DOCX};

use super::{decode_utf8, DocumentSource};

pub struct LocalDirectorySource {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    normalizer: TextNormalizer,
    /// Entries from the most recent scan, keyed by id.
    entries: RwLock<HashMap<String, LocalEntry>>,
}

#[derive(Clone)]
struct LocalEntry {
    file: SourceFile,
    path: PathBuf,
    relative: String,
}

impl LocalDirectorySource {
    pub fn new(root: impl Into<PathBuf>, config: &LocalConfig) -> Result<Self, PipelineError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(PipelineError::Config(format!(
                "diary directory does not exist: {}",
                root.display()
            )));
        }
        Ok(Self {
            root,
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&config.exclude_globs)?,
            normalizer: TextNormalizer::new(),
            entries: RwLock::new(HashMap::new()),
        })
    }

    fn scan(&self) -> Result<Vec<LocalEntry>, PipelineError> {
        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.root) {
            let entry = entry.map_err(|e| PipelineError::SourceService {
                message: e.to_string(),
                retryable: false,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path
                .strip_prefix(&self.root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");

            if self.exclude.is_match(&relative) || !self.include.is_match(&relative) {
                continue;
            }

            entries.push(LocalEntry {
                file: describe(path, &relative)?,
                path: path.to_path_buf(),
                relative,
            });
        }
        entries.sort_by(|a, b| a.relative.cmp(&b.relative));

        let by_id = entries
            .iter()
            .map(|e| (e.file.id.clone(), e.clone()))
            .collect();
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = by_id;
        Ok(entries)
    }

    fn cached(&self, id: &str) -> Option<LocalEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Look `id` up in the last scan, rescanning once on a miss.
    fn find(&self, id: &str) -> Result<LocalEntry, PipelineError> {
        if let Some(entry) = self.cached(id) {
            return Ok(entry);
        }
        self.scan()?;
        self.cached(id)
            .ok_or_else(|| PipelineError::NotFound { id: id.to_string() })
    }
}

/// Stable id for a file at `relative` under the root.
pub fn local_file_id(relative: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(relative.as_bytes());
    hex::encode(hasher.finalize())
}

fn detect_mime(relative: &str) -> &'static str {
    match relative.rsplit('.').next().map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("docx") => MIME_DOCX,
        Some("md") => "text/markdown",
        _ => "text/plain",
    }
}

fn describe(path: &Path, relative: &str) -> Result<SourceFile, PipelineError> {
    let meta = std::fs::metadata(path).map_err(|e| io_error(relative, e))?;
    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let created = meta.created().unwrap_or(modified);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(SourceFile {
        id: local_file_id(relative),
        name,
        mime_type: detect_mime(relative).to_string(),
        created_time: DateTime::<Utc>::from(created),
        modified_time: DateTime::<Utc>::from(modified),
    })
}

fn io_error(relative: &str, err: std::io::Error) -> PipelineError {
    match err.kind() {
        std::io::ErrorKind::NotFound => PipelineError::NotFound {
            id: relative.to_string(),
        },
        std::io::ErrorKind::PermissionDenied => PipelineError::Access {
            service: "filesystem".to_string(),
            message: format!("{}: {}", relative, err),
        },
        _ => PipelineError::SourceService {
            message: format!("{}: {}", relative, err),
            retryable: false,
        },
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, PipelineError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| PipelineError::Config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| PipelineError::Config(e.to_string()))
}

#[async_trait]
impl DocumentSource for LocalDirectorySource {
    fn name(&self) -> &str {
        "local"
    }

    async fn list(&self) -> Result<Vec<SourceFile>, PipelineError> {
        Ok(self.scan()?.into_iter().map(|e| e.file).collect())
    }

    async fn get(&self, id: &str) -> Result<DiaryDocument, PipelineError> {
        let entry = self.find(id)?;
        let bytes = std::fs::read(&entry.path).map_err(|e| io_error(&entry.relative, e))?;
        let text = if entry.file.mime_type == MIME_DOCX {
            self.normalizer.normalize(&bytes)?
        } else {
            decode_utf8(id, bytes)?
        };

        let mut metadata: serde_json::Value =
            serde_json::from_str(&entry.file.metadata_json()).unwrap_or_default();
        metadata["source"] = serde_json::Value::String(entry.path.display().to_string());

        Ok(DiaryDocument {
            id: entry.file.id,
            text,
            metadata: metadata.to_string(),
        })
    }
}
