//! Boundary validation of classifier responses.
//!
//! Raw JSON never leaves this module: it is turned into a
//! [`ClassifierVerdict`] whose criteria all carry an in-range score, or it is
//! rejected with a [`SchemaError`].

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use super::{Criterion, Score, SCORE_MAX, SCORE_MIN};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("no JSON object found in response")]
    NoJson,

    #[error("response is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("response JSON is not an object")]
    NotAnObject,

    #[error("response has no criteria section")]
    MissingCriteria,
}

/// A criterion the classifier answered with a usable score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerdictCriterion {
    pub value: u8,
    pub justification: String,
    pub signals: Vec<String>,
}

/// Typed view of one classifier response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifierVerdict {
    pub entity: Option<String>,
    pub summary: Option<String>,
    pub criteria: BTreeMap<Criterion, VerdictCriterion>,
    /// Criteria present in the response but without a usable score
    pub rejected: BTreeMap<Criterion, String>,
}

impl ClassifierVerdict {
    /// Criteria with no usable score, in presentation order.
    pub fn missing(&self) -> Vec<Criterion> {
        Criterion::ALL
            .into_iter()
            .filter(|c| !self.criteria.contains_key(c))
            .collect()
    }
}

const CRITERIA_KEYS: &[&str] = &["criterios", "critérios", "criteria", "analise_ocde", "resumo_ocde"];
const ENTITY_KEYS: &[&str] = &["entidade_responsavel", "ente_responsavel", "responsavel", "entity"];
const SUMMARY_KEYS: &[&str] = &["resumo_executivo", "resumo", "summary"];
const SCORE_KEYS: &[&str] = &["nota", "pontuacao", "score", "avaliacao"];
const TEXT_KEYS: &[&str] = &["justificativa", "analise", "justification", "texto"];
const SIGNAL_KEYS: &[&str] = &["sinais", "evidencias", "signals"];

/// Parse raw assistant content.
///
/// `signal_count` bounds the accepted signal references (`S1..=S{count}`).
pub fn parse_verdict(content: &str, signal_count: usize) -> Result<ClassifierVerdict, SchemaError> {
    let json = extract_json(content).ok_or(SchemaError::NoJson)?;
    let value: Value =
        serde_json::from_str(json).map_err(|e| SchemaError::InvalidJson(e.to_string()))?;
    let root = value.as_object().ok_or(SchemaError::NotAnObject)?;

    let mut verdict = ClassifierVerdict {
        entity: first_string(root, ENTITY_KEYS),
        summary: first_string(root, SUMMARY_KEYS),
        ..Default::default()
    };

    let entries = criteria_entries(root)?;
    for (criterion, raw) in entries {
        match parse_criterion(raw, signal_count) {
            Ok(parsed) => {
                verdict.rejected.remove(&criterion);
                verdict.criteria.entry(criterion).or_insert(parsed);
            }
            Err(reason) => {
                if !verdict.criteria.contains_key(&criterion) {
                    verdict.rejected.insert(criterion, reason);
                }
            }
        }
    }

    Ok(verdict)
}

fn criteria_entries(root: &Map<String, Value>) -> Result<Vec<(Criterion, &Value)>, SchemaError> {
    let container = CRITERIA_KEYS.iter().find_map(|k| root.get(*k));

    match container {
        Some(Value::Object(map)) => Ok(map
            .iter()
            .filter_map(|(k, v)| Criterion::from_key(k).map(|c| (c, v)))
            .collect()),
        Some(Value::Array(items)) => Ok(items
            .iter()
            .filter_map(|item| {
                let key = item
                    .get("criterio")
                    .or_else(|| item.get("criterion"))
                    .and_then(Value::as_str)?;
                Criterion::from_key(key).map(|c| (c, item))
            })
            .collect()),
        Some(_) => Err(SchemaError::MissingCriteria),
        None => {
            // Criteria may also sit at the top level.
            let top: Vec<(Criterion, &Value)> = root
                .iter()
                .filter_map(|(k, v)| Criterion::from_key(k).map(|c| (c, v)))
                .collect();
            if top.is_empty() {
                Err(SchemaError::MissingCriteria)
            } else {
                Ok(top)
            }
        }
    }
}

fn parse_criterion(raw: &Value, signal_count: usize) -> Result<VerdictCriterion, String> {
    let obj = raw
        .as_object()
        .ok_or_else(|| "criterion has no score, only text".to_string())?;

    let score_value = SCORE_KEYS
        .iter()
        .find_map(|k| obj.get(*k))
        .ok_or_else(|| "criterion has no score".to_string())?;
    let value = parse_score(score_value)?;

    let justification = TEXT_KEYS
        .iter()
        .find_map(|k| obj.get(*k))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    let signals = SIGNAL_KEYS
        .iter()
        .find_map(|k| obj.get(*k))
        .and_then(Value::as_array)
        .map(|refs| {
            refs.iter()
                .filter_map(Value::as_str)
                .filter_map(|r| normalize_signal_ref(r, signal_count))
                .collect()
        })
        .unwrap_or_default();

    Ok(VerdictCriterion {
        value,
        justification,
        signals,
    })
}

fn parse_score(value: &Value) -> Result<u8, String> {
    let numeric = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let head = s.split('/').next().unwrap_or_default().trim();
            match head.replace(',', ".").parse::<f64>() {
                Ok(n) => Some(n),
                Err(_) => Score::from_category(s).map(f64::from),
            }
        }
        _ => None,
    };

    match numeric {
        Some(n) if n.fract() == 0.0 && (f64::from(SCORE_MIN)..=f64::from(SCORE_MAX)).contains(&n) => {
            Ok(n as u8)
        }
        Some(n) => Err(format!("score {n} outside {SCORE_MIN}..={SCORE_MAX}")),
        None => Err(format!("unrecognized score {value}")),
    }
}

fn normalize_signal_ref(raw: &str, signal_count: usize) -> Option<String> {
    let digits = raw.trim().strip_prefix(['S', 's'])?;
    let n: usize = digits.parse().ok()?;
    (1..=signal_count).contains(&n).then(|| format!("S{n}"))
}

fn first_string(root: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| root.get(*k))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Extract JSON from a response that may contain markdown code blocks.
pub(crate) fn extract_json(content: &str) -> Option<&str> {
    if let Some(start) = content.find("```json") {
        let start = start + 7;
        if let Some(end) = content[start..].find("```") {
            return Some(content[start..start + end].trim());
        }
    }

    let start = content.find('{')?;
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in content[start..].char_indices() {
        if in_string {
            match c {
                '\\' if !escaped => escaped = true,
                '"' if !escaped => in_string = false,
                _ => escaped = false,
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&content[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
