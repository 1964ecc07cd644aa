//! Responsible-entity resolution.
//!
//! Priority: explicit mentions in the document, then the jurisdiction hint,
//! then "unknown". A name proposed by the classifier is only accepted when
//! the document itself contains it.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::regions::{fold_accents, Uf};

pub const UNKNOWN_ENTITY: &str = "unknown";
pub const FEDERAL_GOVERNMENT: &str = "Governo Federal";

/// Where the entity name came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitySource {
    /// Government mentions counted in the document text
    Document,
    /// Named by the classifier and found verbatim in the document
    Classifier,
    JurisdictionHint,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsibleEntity {
    pub name: String,
    pub source: EntitySource,
}

// Matched against accent-folded, lowercased text.
static STATE_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    let names: Vec<String> = Uf::names_longest_first()
        .into_iter()
        .map(|(_, name)| regex::escape(&fold_accents(name)))
        .collect();
    Regex::new(&format!(
        r"\b(?:governo do estado|governo|estado) (?:do|da|de) ({})\b",
        names.join("|")
    ))
    .expect("state mention pattern is a valid regex")
});

static FEDERAL_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:governo federal|uniao federal|governo do brasil|ministerio do meio ambiente|republica federativa do brasil)\b",
    )
    .expect("federal mention pattern is a valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Mentioned {
    State(Uf),
    Federal,
}

/// Most mentioned government in `pages`; ties go to the earliest mention.
fn dominant_mention(pages: &[String]) -> Option<Mentioned> {
    let mut tally: HashMap<Mentioned, (usize, usize)> = HashMap::new();
    let mut position = 0usize;

    for page in pages {
        let folded = fold_accents(page);
        let mut found: Vec<(usize, Mentioned)> = Vec::new();

        for caps in STATE_MENTION.captures_iter(&folded) {
            if let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) {
                if let Ok(uf) = name.as_str().parse::<Uf>() {
                    found.push((whole.start(), Mentioned::State(uf)));
                }
            }
        }
        for m in FEDERAL_MENTION.find_iter(&folded) {
            found.push((m.start(), Mentioned::Federal));
        }

        for (offset, who) in found {
            let entry = tally.entry(who).or_insert((0, position + offset));
            entry.0 += 1;
            entry.1 = entry.1.min(position + offset);
        }
        position += folded.len() + 1;
    }

    tally
        .into_iter()
        .max_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
            count_a.cmp(count_b).then(first_b.cmp(first_a))
        })
        .map(|(who, _)| who)
}

fn is_placeholder(name: &str) -> bool {
    matches!(
        fold_accents(name).as_str(),
        "" | "unknown" | "desconhecido" | "nao identificado" | "nao informado" | "n/a"
    )
}

/// Resolve the responsible entity for a document.
pub fn resolve_entity(
    pages: &[String],
    classifier_entity: Option<&str>,
    jurisdiction_hint: Option<&str>,
) -> ResponsibleEntity {
    if let Some(who) = dominant_mention(pages) {
        let name = match who {
            Mentioned::State(uf) => uf.government_name(),
            Mentioned::Federal => FEDERAL_GOVERNMENT.to_string(),
        };
        return ResponsibleEntity {
            name,
            source: EntitySource::Document,
        };
    }

    if let Some(proposed) = classifier_entity.map(str::trim) {
        if !is_placeholder(proposed) {
            let needle = fold_accents(proposed);
            if pages.iter().any(|p| fold_accents(p).contains(&needle)) {
                return ResponsibleEntity {
                    name: proposed.to_string(),
                    source: EntitySource::Classifier,
                };
            }
        }
    }

    if let Some(hint) = jurisdiction_hint.map(str::trim).filter(|h| !h.is_empty()) {
        let name = match hint.parse::<Uf>() {
            Ok(uf) => uf.government_name(),
            Err(_) => hint.to_string(),
        };
        return ResponsibleEntity {
            name,
            source: EntitySource::JurisdictionHint,
        };
    }

    ResponsibleEntity {
        name: UNKNOWN_ENTITY.to_string(),
        source: EntitySource::Unknown,
    }
}
