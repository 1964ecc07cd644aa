//! Runs the catalog over page text and resolves overlaps.

use std::collections::HashSet;

use tracing::debug;

use super::catalog::{PatternFamily, CATALOG};
use super::{NormalizedValue, QuantitativeSignal};

/// Candidate match before overlap resolution.
struct Candidate {
    start: usize,
    end: usize,
    family: usize,
    value: NormalizedValue,
}

impl Candidate {
    fn len(&self) -> usize {
        self.end - self.start
    }

    fn overlaps(&self, other: &Candidate) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Stateless detector over the static catalog.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalDetector;

impl SignalDetector {
    pub fn new() -> Self {
        Self
    }

    /// Detect signals across all pages, ordered by page then offset.
    pub fn detect<S: AsRef<str>>(&self, pages: &[S]) -> Vec<QuantitativeSignal> {
        let catalog: &[PatternFamily] = &CATALOG;
        let mut signals = Vec::new();

        for (idx, page) in pages.iter().enumerate() {
            signals.extend(detect_page(catalog, page.as_ref(), idx + 1));
        }

        // Output is already (page, offset) ordered, so retain keeps the first
        // occurrence of each key.
        let mut seen = HashSet::new();
        signals.retain(|s| seen.insert((s.kind, s.value.key(), s.page)));

        debug!(signals = signals.len(), pages = pages.len(), "Signal detection complete");
        signals
    }
}

fn detect_page(catalog: &[PatternFamily], text: &str, page: usize) -> Vec<QuantitativeSignal> {
    let mut candidates: Vec<Candidate> = Vec::new();
    for (family, pattern) in catalog.iter().enumerate() {
        for caps in pattern.regex.captures_iter(text) {
            let Some(m) = caps.get(0) else { continue };
            candidates.push(Candidate {
                start: m.start(),
                end: m.end(),
                family,
                value: pattern.normalize(&caps),
            });
        }
    }

    // Longest first; equal length falls back to catalog order, then position.
    candidates.sort_by(|a, b| {
        b.len()
            .cmp(&a.len())
            .then(a.family.cmp(&b.family))
            .then(a.start.cmp(&b.start))
    });

    let mut accepted: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if !accepted.iter().any(|a| a.overlaps(&candidate)) {
            accepted.push(candidate);
        }
    }
    accepted.sort_by_key(|c| c.start);

    accepted
        .into_iter()
        .map(|c| {
            let family = &catalog[c.family];
            QuantitativeSignal {
                kind: family.kind,
                family: family.name.to_string(),
                raw: text[c.start..c.end].to_string(),
                value: c.value,
                page,
                offset: c.start,
            }
        })
        .collect()
}
