//! Document sources: where diary files come from.
//!
//! A [`DocumentSource`] enumerates files with their metadata and fetches the
//! normalized text of one file by id. Two implementations ship with the
//! crate:
//!
//! | Source | Backing store |
//! |--------|---------------|
//! | [`DriveSource`] | a Google Drive folder (REST API v3) |
//! | [`LocalDirectorySource`] | a local directory of `.txt` / `.docx` files |
//!
//! Tests substitute their own in-memory sources through the same trait.

pub mod drive;
pub mod local;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::models::{DiaryDocument, SourceFile};

pub use drive::DriveSource;
pub use local::LocalDirectorySource;

/// A read-only store of diary files.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Short label used in logs (e.g. `"drive"`).
    fn name(&self) -> &str;

    /// Every file in the source. Pagination, if any, is drained internally;
    /// callers never see partial listings. Order is unspecified.
    async fn list(&self) -> Result<Vec<SourceFile>, PipelineError>;

    /// Fetch and normalize one file.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::NotFound`] when `id` does not exist
    /// - [`PipelineError::Access`] when the store denies access
    /// - [`PipelineError::Decode`] when the bytes are not UTF-8 text
    /// - [`PipelineError::MalformedDocument`] when a rich document cannot be parsed
    async fn get(&self, id: &str) -> Result<DiaryDocument, PipelineError>;
}

/// Decode downloaded bytes as UTF-8, dropping a leading byte-order mark.
pub(crate) fn decode_utf8(id: &str, bytes: Vec<u8>) -> Result<String, PipelineError> {
    let text = String::from_utf8(bytes).map_err(|e| PipelineError::Decode {
        id: id.to_string(),
        message: e.utf8_error().to_string(),
    })?;
    Ok(match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_utf8_and_strips_bom() {
        let mut bytes = "\u{feff}日記".as_bytes().to_vec();
        assert_eq!(decode_utf8("a", bytes.clone()).unwrap(), "日記");
        bytes.drain(..3);
        assert_eq!(decode_utf8("a", bytes).unwrap(), "日記");
    }

    #[test]
    fn invalid_utf8_is_a_decode_error() {
        let err = decode_utf8("f1", vec![0xff, 0xfe, 0x00]).unwrap_err();
        match err {
            PipelineError::Decode { id, .. } => assert_eq!(id, "f1"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
