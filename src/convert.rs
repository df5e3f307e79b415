//! Batch conversion of a directory of `.docx` diary files into `.txt`.
//!
//! Each `<name>.docx` directly inside the directory gets a sibling
//! `<name>.txt` (UTF-8) holding its normalized text. Existing `.txt` files
//! are overwritten. Subdirectories are not visited.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::normalize::TextNormalizer;

/// Result of a directory conversion.
#[derive(Debug, Default)]
pub struct ConvertReport {
    pub converted: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

pub fn convert_directory(dir: &Path) -> Result<ConvertReport> {
    let normalizer = TextNormalizer::new();
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && has_docx_extension(path))
        .collect();
    entries.sort();

    let mut report = ConvertReport::default();
    for path in entries {
        match convert_file(&normalizer, &path) {
            Ok(txt_path) => {
                tracing::info!(from = %path.display(), to = %txt_path.display(), "converted");
                report.converted.push(txt_path);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "conversion failed");
                report.failed.push((path, format!("{:#}", e)));
            }
        }
    }
    Ok(report)
}

fn has_docx_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("docx"))
        .unwrap_or(false)
}

fn convert_file(normalizer: &TextNormalizer, path: &Path) -> Result<PathBuf> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let text = normalizer.normalize(&bytes)?;
    let txt_path = path.with_extension("txt");
    std::fs::write(&txt_path, text)
        .with_context(|| format!("Failed to write {}", txt_path.display()))?;
    Ok(txt_path)
}
