//! Policy document ingestion.
//!
//! Converts raw PDF bytes into an immutable [`PolicyDocument`] holding one
//! text block per page, in reading order.

mod extractor;

pub use extractor::{DocumentExtractor, ExtractionError};

use serde::Serialize;
use sha2::{Digest, Sha256};

/// A policy document with its extracted page text.
///
/// Built only by [`DocumentExtractor`]; fields are read-only afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyDocument {
    id: String,
    fingerprint: String,
    jurisdiction: Option<String>,
    #[serde(skip)]
    bytes: Vec<u8>,
    pages: Vec<String>,
}

impl PolicyDocument {
    pub(crate) fn new(
        id: Option<String>,
        jurisdiction: Option<String>,
        bytes: Vec<u8>,
        pages: Vec<String>,
    ) -> Self {
        let fingerprint = fingerprint(&bytes);
        let id = id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| fingerprint[..16].to_string());
        Self {
            id,
            fingerprint,
            jurisdiction,
            bytes,
            pages,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// SHA-256 of the raw bytes, hex encoded.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Source jurisdiction (state or entity), when the caller knew it.
    pub fn jurisdiction(&self) -> Option<&str> {
        self.jurisdiction.as_deref()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Page text in reading order; blank pages are empty strings.
    pub fn pages(&self) -> &[String] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// All pages joined with blank lines.
    pub fn full_text(&self) -> String {
        self.pages.join("\n\n")
    }
}

/// Hex SHA-256 of `bytes`.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_defaults_to_fingerprint_prefix() {
        let doc = PolicyDocument::new(None, None, b"abc".to_vec(), vec!["x".into()]);
        assert_eq!(doc.fingerprint().len(), 64);
        assert_eq!(doc.id(), &doc.fingerprint()[..16]);

        let named = PolicyDocument::new(Some("ppcdam-pa".into()), None, b"abc".to_vec(), vec![]);
        assert_eq!(named.id(), "ppcdam-pa");
        assert_eq!(named.fingerprint(), doc.fingerprint());
    }

    #[test]
    fn test_full_text_keeps_blank_pages() {
        let doc = PolicyDocument::new(
            None,
            Some("PA".into()),
            vec![],
            vec!["um".into(), String::new(), "três".into()],
        );
        assert_eq!(doc.full_text(), "um\n\n\n\ntrês");
        assert_eq!(doc.page_count(), 3);
        assert_eq!(doc.jurisdiction(), Some("PA"));
    }
}
