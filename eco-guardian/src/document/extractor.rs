//! PDF text extraction.

use std::panic::{self, AssertUnwindSafe};

use eco_common::util::format_bytes;
use thiserror::Error;
use tracing::{debug, warn};

use super::PolicyDocument;

/// Extraction failures. None of them are retryable.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("document is {}, limit is {}", human_size(.size), human_size(.limit))]
    TooLarge { size: usize, limit: usize },

    #[error("malformed document: {reason}")]
    Malformed { reason: String },

    #[error("unreadable document: {reason}")]
    Unreadable { reason: String },

    #[error("document has no pages")]
    NoPages,

    #[error("document has no extractable text on any of its {pages} pages")]
    NoExtractableText { pages: usize },
}

impl ExtractionError {
    /// Stable identifier for failure records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TooLarge { .. } => "extraction.too_large",
            Self::Malformed { .. } => "extraction.malformed",
            Self::Unreadable { .. } => "extraction.unreadable",
            Self::NoPages => "extraction.no_pages",
            Self::NoExtractableText { .. } => "extraction.no_text",
        }
    }
}

fn human_size(bytes: &usize) -> String {
    format_bytes(*bytes as u64)
}

// The header may be preceded by junk within the first kilobyte.
const HEADER_SEARCH_WINDOW: usize = 1024;

/// Converts raw PDF bytes into per-page text.
#[derive(Debug, Clone)]
pub struct DocumentExtractor {
    max_document_bytes: usize,
}

impl DocumentExtractor {
    pub fn new(max_document_bytes: usize) -> Self {
        Self { max_document_bytes }
    }

    /// Extract every page of `bytes` into a [`PolicyDocument`].
    pub fn extract(
        &self,
        id: Option<String>,
        jurisdiction: Option<String>,
        bytes: Vec<u8>,
    ) -> Result<PolicyDocument, ExtractionError> {
        let pages = self.extract_pages(&bytes)?;
        Ok(PolicyDocument::new(id, jurisdiction, bytes, pages))
    }

    /// Ordered page text. Pages without text become empty strings, so the
    /// page count always matches the document.
    pub fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
        if bytes.len() > self.max_document_bytes {
            return Err(ExtractionError::TooLarge {
                size: bytes.len(),
                limit: self.max_document_bytes,
            });
        }
        if !has_pdf_header(bytes) {
            return Err(ExtractionError::Malformed {
                reason: "missing %PDF- header".to_string(),
            });
        }

        // The parser panics on some corrupt inputs instead of returning errors.
        let raw = panic::catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem_by_pages(bytes)
        }))
        .map_err(|payload| ExtractionError::Malformed {
            reason: panic_message(payload.as_ref()),
        })?
        .map_err(|e| ExtractionError::Malformed {
            reason: e.to_string(),
        })?;

        if raw.is_empty() {
            return Err(ExtractionError::NoPages);
        }

        let pages: Vec<String> = raw.into_iter().map(normalize_page).collect();
        let blank = pages.iter().filter(|p| p.is_empty()).count();
        if blank == pages.len() {
            return Err(ExtractionError::NoExtractableText { pages: pages.len() });
        }
        if blank > 0 {
            warn!(blank_pages = blank, total_pages = pages.len(), "Pages without extractable text");
        }

        debug!(pages = pages.len(), bytes = bytes.len(), "Document extracted");
        Ok(pages)
    }
}

fn has_pdf_header(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(HEADER_SEARCH_WINDOW)];
    window.windows(5).any(|w| w == b"%PDF-")
}

fn normalize_page(text: String) -> String {
    let cleaned = text.replace('\u{0}', "");
    if cleaned.trim().is_empty() {
        String::new()
    } else {
        cleaned.trim_end().to_string()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("parser panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("parser panicked: {s}")
    } else {
        "parser panicked".to_string()
    }
}
