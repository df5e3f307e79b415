//! Error taxonomy for the sync and upload pipeline.
//!
//! Every remote or parsing failure is mapped onto one [`PipelineError`]
//! variant. The variant decides what the orchestrator does with it:
//!
//! | Variant | Policy |
//! |---------|--------|
//! | `Access`, `Config`, `DimensionMismatch`, `IndexNotReady` | abort the run |
//! | `NotFound`, `Decode`, `MalformedDocument` | skip the item, count it as failed |
//! | `SourceService`, `EmbeddingService`, `IndexService` | retry when retryable, then count as failed |

use reqwest::StatusCode;
use thiserror::Error;

/// Errors produced by the document sources, the normalizer, and the
/// vector index client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Authentication or permission failure. No later call can succeed.
    #[error("access denied by {service}: {message}")]
    Access { service: String, message: String },

    #[error("file not found: {id}")]
    NotFound { id: String },

    #[error("content of {id} is not valid UTF-8: {message}")]
    Decode { id: String, message: String },

    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("document source error: {message}")]
    SourceService { message: String, retryable: bool },

    #[error("embedding service error: {message}")]
    EmbeddingService { message: String, retryable: bool },

    #[error("index service error: {message}")]
    IndexService { message: String, retryable: bool },

    #[error("chat service error: {message}")]
    ChatService { message: String, retryable: bool },

    #[error("index '{index}' stores {existing}-dimensional vectors but the embedding model produces {expected}")]
    DimensionMismatch {
        index: String,
        existing: usize,
        expected: usize,
    },

    #[error("index has not been ensured; call ensure_index before uploading")]
    IndexNotReady,

    #[error("configuration error: {0}")]
    Config(String),
}

/// Which remote service a failed HTTP call belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Drive,
    Embedding,
    Index,
    Chat,
}

impl Service {
    fn label(self) -> &'static str {
        match self {
            Service::Drive => "drive",
            Service::Embedding => "embedding service",
            Service::Index => "index service",
            Service::Chat => "chat service",
        }
    }
}

impl PipelineError {
    /// Errors that make every later call pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Access { .. }
                | PipelineError::Config(_)
                | PipelineError::DimensionMismatch { .. }
                | PipelineError::IndexNotReady
        )
    }

    /// Transient remote failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::SourceService { retryable, .. }
            | PipelineError::EmbeddingService { retryable, .. }
            | PipelineError::IndexService { retryable, .. }
            | PipelineError::ChatService { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Build a service error of the right variant.
    pub fn service(service: Service, message: impl Into<String>, retryable: bool) -> Self {
        let message = message.into();
        match service {
            Service::Drive => PipelineError::SourceService { message, retryable },
            Service::Embedding => PipelineError::EmbeddingService { message, retryable },
            Service::Index => PipelineError::IndexService { message, retryable },
            Service::Chat => PipelineError::ChatService { message, retryable },
        }
    }

    /// Map a non-success HTTP status onto the taxonomy.
    ///
    /// - 401/403 → `Access`
    /// - 429 and 5xx → retryable service error
    /// - other 4xx → non-retryable service error
    ///
    /// 404 is not special-cased here; callers that know which id was
    /// requested turn it into `NotFound` themselves.
    pub fn from_status(service: Service, status: StatusCode, body: &str) -> Self {
        let snippet: String = body.chars().take(500).collect();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return PipelineError::Access {
                service: service.label().to_string(),
                message: format!("HTTP {}: {}", status, snippet),
            };
        }
        let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
        PipelineError::service(
            service,
            format!("HTTP {}: {}", status, snippet),
            retryable,
        )
    }

    /// Map a transport error (connect, timeout, body read) onto the taxonomy.
    pub fn from_transport(service: Service, err: &reqwest::Error) -> Self {
        PipelineError::service(service, err.to_string(), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_are_fatal() {
        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            let err = PipelineError::from_status(Service::Drive, status, "denied");
            assert!(matches!(err, PipelineError::Access { .. }));
            assert!(err.is_fatal());
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn throttling_and_server_errors_retry() {
        let throttled =
            PipelineError::from_status(Service::Embedding, StatusCode::TOO_MANY_REQUESTS, "");
        assert!(throttled.is_retryable());
        let unavailable =
            PipelineError::from_status(Service::Index, StatusCode::SERVICE_UNAVAILABLE, "");
        assert!(matches!(unavailable, PipelineError::IndexService { .. }));
        assert!(unavailable.is_retryable());
    }

    #[test]
    fn client_errors_do_not_retry() {
        let err = PipelineError::from_status(Service::Embedding, StatusCode::BAD_REQUEST, "bad");
        assert!(!err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn body_is_truncated_in_message() {
        let body = "x".repeat(2000);
        let err = PipelineError::from_status(Service::Index, StatusCode::BAD_GATEWAY, &body);
        assert!(err.to_string().len() < 600);
    }

    #[test]
    fn per_item_errors_are_neither_fatal_nor_retryable() {
        let err = PipelineError::NotFound { id: "a".into() };
        assert!(!err.is_fatal());
        assert!(!err.is_retryable());
        let err = PipelineError::MalformedDocument("zip".into());
        assert!(!err.is_fatal());
    }
}
