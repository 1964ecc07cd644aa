//! Quantitative signal detection.
//!
//! Scans page text for targets, deadlines, budgets and other measurable
//! commitments using a fixed catalog of pattern families. Detection is a pure
//! function of the input pages.
//!
//! # Resolution
//!
//! | Step | Rule |
//! |------|------|
//! | Overlap | Longest span wins; equal length goes to the earlier catalog family |
//! | Dedup | One signal per (kind, normalized value, page), first occurrence kept |
//! | Order | Page, then byte offset within the page |

mod catalog;
mod detector;
mod numbers;

pub use catalog::{PatternFamily, CATALOG};
pub use detector::SignalDetector;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of signal categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Target,
    Deadline,
    Budget,
    Other,
}

impl SignalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::Target => "target",
            SignalKind::Deadline => "deadline",
            SignalKind::Budget => "budget",
            SignalKind::Other => "other",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed value of a matched span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NormalizedValue {
    /// Monetary amount in units of `currency` (ISO code)
    Money { amount: f64, currency: String },
    /// Percentage; reductions are negative
    Percent { value: f64 },
    Date { date: NaiveDate },
    Year { year: i32 },
    YearRange { start: i32, end: i32 },
    /// Relative deadline (`unit` is days, months or years)
    Duration { amount: f64, unit: String },
    /// Physical quantity (hectares, seedlings, families)
    Quantity { amount: f64, unit: String },
    /// The span matched but its value could not be parsed
    Unparsed,
}

impl NormalizedValue {
    /// Canonical text used for deduplication.
    pub fn key(&self) -> String {
        match self {
            Self::Money { amount, currency } => format!("money:{currency}:{amount:.2}"),
            Self::Percent { value } => format!("percent:{value:.2}"),
            Self::Date { date } => format!("date:{date}"),
            Self::Year { year } => format!("year:{year}"),
            Self::YearRange { start, end } => format!("years:{start}-{end}"),
            Self::Duration { amount, unit } => format!("duration:{amount:.2}:{unit}"),
            Self::Quantity { amount, unit } => format!("quantity:{amount:.2}:{unit}"),
            Self::Unparsed => "unparsed".to_string(),
        }
    }
}

/// A measurable commitment found in the text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantitativeSignal {
    pub kind: SignalKind,
    /// Catalog family that produced the match
    pub family: String,
    /// Matched text, verbatim
    pub raw: String,
    pub value: NormalizedValue,
    /// 1-based page number
    pub page: usize,
    /// Byte offset of the match within the page text
    pub offset: usize,
}

impl QuantitativeSignal {
    /// Short reference used in prompts and criterion evidence ("S3").
    pub fn reference(index: usize) -> String {
        format!("S{}", index + 1)
    }
}

/// 1-based numbers of pages holding at least one signal, ascending.
pub fn signal_pages(signals: &[QuantitativeSignal]) -> Vec<usize> {
    let mut pages: Vec<usize> = signals.iter().map(|s| s.page).collect();
    pages.sort_unstable();
    pages.dedup();
    pages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_keys() {
        let money = NormalizedValue::Money {
            amount: 50_000_000.0,
            currency: "BRL".into(),
        };
        assert_eq!(money.key(), "money:BRL:50000000.00");
        assert_eq!(NormalizedValue::Percent { value: -80.0 }.key(), "percent:-80.00");
        assert_eq!(NormalizedValue::Year { year: 2030 }.key(), "year:2030");
    }

    #[test]
    fn test_value_serde_tagged() {
        let json = serde_json::to_value(NormalizedValue::Year { year: 2030 }).unwrap();
        assert_eq!(json["type"], "year");
        assert_eq!(json["year"], 2030);
    }

    #[test]
    fn test_signal_pages() {
        let mk = |page| QuantitativeSignal {
            kind: SignalKind::Other,
            family: "x".into(),
            raw: "x".into(),
            value: NormalizedValue::Unparsed,
            page,
            offset: 0,
        };
        assert_eq!(signal_pages(&[mk(3), mk(1), mk(3)]), vec![1, 3]);
        assert_eq!(QuantitativeSignal::reference(0), "S1");
    }
}
