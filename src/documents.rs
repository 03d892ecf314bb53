//! Staging in-memory text as a document directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{RagClientError, Result};

/// Filename used for a single staged text.
pub const DEFAULT_FILENAME: &str = "document.md";

/// An in-memory document to stage on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDocument {
    pub content: String,
    /// File name inside the staging directory; `doc_{index}.md` when absent.
    #[serde(default)]
    pub filename: Option<String>,
}

impl TextDocument {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            filename: None,
        }
    }

    pub fn with_filename(content: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            filename: Some(filename.into()),
        }
    }
}

/// Write one text into `dir` (or a fresh `rag_text_*` temp directory).
///
/// The directory is left in place; the caller owns its cleanup.
pub fn stage_text(text: &str, filename: Option<&str>, dir: Option<&Path>) -> Result<PathBuf> {
    if text.trim().is_empty() {
        return Err(RagClientError::validation("text content cannot be empty"));
    }

    let doc_dir = prepare_dir(dir, "rag_text_")?;
    write_document(&doc_dir, filename.unwrap_or(DEFAULT_FILENAME), text)?;
    info!(doc_dir = %doc_dir.display(), "staged text document");
    Ok(doc_dir)
}

/// Write several documents into `dir` (or a fresh `rag_texts_*` temp directory).
pub fn stage_texts(documents: &[TextDocument], dir: Option<&Path>) -> Result<PathBuf> {
    if documents.is_empty() {
        return Err(RagClientError::validation("at least one document is required"));
    }

    if let Some(empty) = documents.iter().find(|d| d.content.trim().is_empty()) {
        return Err(RagClientError::validation(format!(
            "document '{}' content cannot be empty",
            empty.filename.as_deref().unwrap_or("unknown")
        )));
    }

    let doc_dir = prepare_dir(dir, "rag_texts_")?;
    for (index, doc) in documents.iter().enumerate() {
        let filename = doc
            .filename
            .clone()
            .unwrap_or_else(|| format!("doc_{index}.md"));
        write_document(&doc_dir, &filename, &doc.content)?;
    }

    info!(doc_dir = %doc_dir.display(), count = documents.len(), "staged text documents");
    Ok(doc_dir)
}

fn prepare_dir(dir: Option<&Path>, prefix: &str) -> Result<PathBuf> {
    match dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| RagClientError::Io(io_context(e, "failed to create directory")))?;
            Ok(dir.to_path_buf())
        }
        None => {
            let temp = tempfile::Builder::new()
                .prefix(prefix)
                .tempdir()
                .map_err(|e| RagClientError::Io(io_context(e, "failed to create temp directory")))?;
            Ok(temp.keep())
        }
    }
}

fn write_document(dir: &Path, filename: &str, content: &str) -> Result<()> {
    let path = dir.join(filename);
    debug!(path = %path.display(), bytes = content.len(), "writing document");
    std::fs::write(&path, content)
        .map_err(|e| RagClientError::Io(io_context(e, &format!("failed to write file {filename}"))))
}

fn io_context(e: std::io::Error, context: &str) -> std::io::Error {
    std::io::Error::new(e.kind(), format!("{context}: {e}"))
}
