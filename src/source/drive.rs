//! Google Drive document source.
//!
//! Lists the files of one Drive folder through the Drive v3 REST API and
//! downloads their text. Requests carry a bearer access token; minting that
//! token (service account, OAuth) happens outside this program.
//!
//! # Pagination
//!
//! `files.list` returns at most `page_size` entries per call plus a
//! `nextPageToken`. [`DriveSource::list`] follows tokens until the listing
//! is exhausted and returns one vector.
//!
//! # Content
//!
//! | MIME type | Fetched as |
//! |-----------|-----------|
//! | `application/vnd.google-apps.document` | `files.export` to `text/plain` |
//! | `.docx` | raw download, then [`TextNormalizer`] |
//! | anything else | raw download, decoded as UTF-8 |
//!
//! # Errors
//!
//! 401/403 become [`PipelineError::Access`], 404 on a file becomes
//! [`PipelineError::NotFound`], 429/5xx and network failures are retried
//! with the configured backoff.
//!
//! Drive also answers 403 for conditions that are not about credentials.
//! The `errors[].reason` of the JSON body decides:
//!
//! | Reason | Becomes |
//! |--------|---------|
//! | `rateLimitExceeded`, `userRateLimitExceeded`, `sharingRateLimitExceeded` | retryable `SourceService` |
//! | `fileNotDownloadable`, `cannotExportFile`, `exportSizeLimitExceeded` | per-file `SourceService`, not retried |
//! | anything else | `Access` |

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;

use crate::config::{DriveConfig, DriveCredentials};
use crate::error::{PipelineError, Service};
use crate::models::{DiaryDocument, SourceFile};
use crate::normalize::{TextNormalizer, MIME_DOCX};
use crate::retry::RetryPolicy;

use super::{decode_utf8, DocumentSource};

pub const MIME_GOOGLE_DOC: &str = "application/vnd.google-apps.document";
pub const MIME_FOLDER: &str = "application/vnd.google-apps.folder";

const FILE_FIELDS: &str = "id,name,mimeType,createdTime,modifiedTime";

const RATE_LIMIT_REASONS: &[&str] = &[
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "sharingRateLimitExceeded",
];
const UNDOWNLOADABLE_REASONS: &[&str] = &[
    "fileNotDownloadable",
    "cannotExportFile",
    "exportSizeLimitExceeded",
];

/// Body of a Drive error response.
#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

/// Map a failed Drive response onto the taxonomy, looking past the 403
/// status at the reasons Drive reports.
fn classify_failure(status: reqwest::StatusCode, body: &str, id: &str) -> PipelineError {
    if status == reqwest::StatusCode::FORBIDDEN {
        let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
        let reasons: Vec<&str> = envelope
            .error
            .errors
            .iter()
            .map(|e| e.reason.as_str())
            .collect();
        let snippet: String = body.chars().take(500).collect();
        if reasons.iter().any(|r| RATE_LIMIT_REASONS.contains(r)) {
            return PipelineError::service(
                Service::Drive,
                format!("rate limited: {}", snippet),
                true,
            );
        }
        if let Some(reason) = reasons.iter().find(|r| UNDOWNLOADABLE_REASONS.contains(*r)) {
            return PipelineError::service(
                Service::Drive,
                format!("{} cannot be fetched as text ({})", id, reason),
                false,
            );
        }
    }
    PipelineError::from_status(Service::Drive, status, body)
}

/// One page of a `files.list` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListPage {
    #[serde(default)]
    files: Vec<SourceFile>,
    next_page_token: Option<String>,
}

pub struct DriveSource {
    client: reqwest::Client,
    base_url: Url,
    access_token: String,
    folder_id: String,
    page_size: u32,
    retry: RetryPolicy,
    normalizer: TextNormalizer,
}

impl DriveSource {
    pub fn new(
        config: &DriveConfig,
        credentials: DriveCredentials,
        retry: RetryPolicy,
    ) -> Result<Self, PipelineError> {
        let base_url = Url::parse(config.base_url.trim_end_matches('/')).map_err(|e| {
            PipelineError::Config(format!("invalid drive.base_url '{}': {}", config.base_url, e))
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            access_token: credentials.access_token,
            folder_id: credentials.folder_id,
            page_size: config.page_size,
            retry,
            normalizer: TextNormalizer::new(),
        })
    }

    pub fn folder_id(&self) -> &str {
        &self.folder_id
    }

    /// `{base}/drive/v3/files[/{id}[/{suffix}]]` with each segment encoded.
    fn files_url(&self, id: Option<&str>, suffix: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["drive", "v3", "files"]);
            segments.extend(id);
            segments.extend(suffix);
        }
        url
    }

    fn parents_query(&self) -> String {
        format!(
            "'{}' in parents and trashed = false",
            self.folder_id.replace('\\', "\\\\").replace('\'', "\\'")
        )
    }

    /// Issue one GET and return the body bytes.
    ///
    /// `not_found_id` turns a 404 into [`PipelineError::NotFound`] for that id.
    async fn get_bytes(
        &self,
        url: Url,
        query: &[(&str, &str)],
        not_found_id: &str,
    ) -> Result<Vec<u8>, PipelineError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .await
            .map_err(|e| PipelineError::from_transport(Service::Drive, &e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PipelineError::NotFound {
                id: not_found_id.to_string(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body, not_found_id));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| PipelineError::from_transport(Service::Drive, &e))?;
        Ok(bytes.to_vec())
    }

    async fn fetch_page(&self, page_token: Option<&str>) -> Result<FileListPage, PipelineError> {
        let q = self.parents_query();
        let page_size = self.page_size.to_string();
        let fields = format!("nextPageToken,files({})", FILE_FIELDS);
        let mut query = vec![
            ("q", q.as_str()),
            ("orderBy", "modifiedTime desc"),
            ("pageSize", page_size.as_str()),
            ("fields", fields.as_str()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let bytes = self
            .get_bytes(self.files_url(None, None), &query, &self.folder_id)
            .await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            PipelineError::service(
                Service::Drive,
                format!("invalid files.list response: {}", e),
                false,
            )
        })
    }

    async fn fetch_metadata(&self, id: &str) -> Result<SourceFile, PipelineError> {
        let bytes = self
            .get_bytes(self.files_url(Some(id), None), &[("fields", FILE_FIELDS)], id)
            .await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            PipelineError::service(
                Service::Drive,
                format!("invalid metadata for {}: {}", id, e),
                false,
            )
        })
    }

    async fn export_text(&self, id: &str) -> Result<Vec<u8>, PipelineError> {
        self.get_bytes(
            self.files_url(Some(id), Some("export")),
            &[("mimeType", "text/plain")],
            id,
        )
        .await
    }

    async fn download(&self, id: &str) -> Result<Vec<u8>, PipelineError> {
        self.get_bytes(self.files_url(Some(id), None), &[("alt", "media")], id)
            .await
    }
}

#[async_trait]
impl DocumentSource for DriveSource {
    fn name(&self) -> &str {
        "drive"
    }

    async fn list(&self) -> Result<Vec<SourceFile>, PipelineError> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let token = page_token.as_deref();
            let page = self
                .retry
                .run("drive files.list", || self.fetch_page(token))
                .await?;
            pages += 1;
            files.extend(page.files.into_iter().filter(|f| f.mime_type != MIME_FOLDER));

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        tracing::debug!(folder = %self.folder_id, pages, files = files.len(), "listed drive folder");
        Ok(files)
    }

    async fn get(&self, id: &str) -> Result<DiaryDocument, PipelineError> {
        let file = self
            .retry
            .run("drive files.get", || self.fetch_metadata(id))
            .await?;

        let text = match file.mime_type.as_str() {
            MIME_GOOGLE_DOC => {
                let bytes = self
                    .retry
                    .run("drive files.export", || self.export_text(id))
                    .await?;
                decode_utf8(id, bytes)?
            }
            MIME_DOCX => {
                let bytes = self
                    .retry
                    .run("drive files.download", || self.download(id))
                    .await?;
                self.normalizer.normalize(&bytes)?
            }
            _ => {
                let bytes = self
                    .retry
                    .run("drive files.download", || self.download(id))
                    .await?;
                decode_utf8(id, bytes)?
            }
        };

        Ok(DiaryDocument {
            id: file.id.clone(),
            metadata: file.metadata_json(),
            text,
        })
    }
}
