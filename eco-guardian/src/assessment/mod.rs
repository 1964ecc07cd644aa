//! Policy assessment against the six OCDE evaluation criteria.
//!
//! # Flow
//!
//! ```text
//! PolicyDocument + signals
//!        │
//!        ▼
//!  fit_to_budget ──► prompt ──► PolicyClassifier (retry + backoff)
//!                                      │
//!                                      ▼
//!                              schema::parse_verdict
//!                                      │ missing criteria?
//!                                      ├──► corrective re-request (bounded)
//!                                      ▼
//!                          PolicyAssessment (exactly six scores)
//! ```

mod classifier;
mod engine;
mod entity;
mod prompt;
mod retry;
mod schema;
mod truncate;

pub use classifier::{
    ChatMessage, ChatRole, ClassificationRequest, ClassificationResponse, ClassifierError,
    OpenAiClassifier, PolicyClassifier,
};
pub use engine::{AssessmentEngine, AssessmentError};
pub use entity::{resolve_entity, EntitySource, ResponsibleEntity};
pub use retry::{RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper};
pub use schema::{parse_verdict, ClassifierVerdict, SchemaError};
pub use truncate::{fit_to_budget, estimate_tokens, FittedText};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::regions::fold_accents;
use crate::signals::QuantitativeSignal;

// ============================================================================
// Criteria
// ============================================================================

/// The six OCDE criteria, in presentation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Relevancia,
    Efetividade,
    Eficiencia,
    Sustentabilidade,
    Coerencia,
    Impacto,
}

impl Criterion {
    pub const ALL: [Criterion; 6] = [
        Criterion::Relevancia,
        Criterion::Efetividade,
        Criterion::Eficiencia,
        Criterion::Sustentabilidade,
        Criterion::Coerencia,
        Criterion::Impacto,
    ];

    /// Display label with accents.
    pub fn label(self) -> &'static str {
        match self {
            Criterion::Relevancia => "Relevância",
            Criterion::Efetividade => "Efetividade",
            Criterion::Eficiencia => "Eficiência",
            Criterion::Sustentabilidade => "Sustentabilidade",
            Criterion::Coerencia => "Coerência",
            Criterion::Impacto => "Impacto",
        }
    }

    /// JSON key the classifier is asked to use.
    pub fn key(self) -> &'static str {
        match self {
            Criterion::Relevancia => "relevancia",
            Criterion::Efetividade => "efetividade",
            Criterion::Eficiencia => "eficiencia",
            Criterion::Sustentabilidade => "sustentabilidade",
            Criterion::Coerencia => "coerencia",
            Criterion::Impacto => "impacto",
        }
    }

    /// Guidance question sent with the prompt.
    pub fn guidance(self) -> &'static str {
        match self {
            Criterion::Relevancia => {
                "O público-alvo entende a política como benéfica, importante e útil?"
            }
            Criterion::Efetividade => {
                "A política atingiu ou tende a atingir seus objetivos/resultados? Apresente dados de execução como volume de produção, áreas restauradas ou outros indicadores claros de entrega."
            }
            Criterion::Eficiencia => {
                "A intervenção respeita cronogramas, orçamento e entrega planejada? Use números de custo, tempo, entregas previstas x realizadas."
            }
            Criterion::Sustentabilidade => {
                "Há capacidade institucional, econômica, social e ambiental de sustentação da política?"
            }
            Criterion::Coerencia => {
                "A política é compatível com outras intervenções no setor, país ou instituição?"
            }
            Criterion::Impacto => {
                "Há evidências quantitativas ou qualitativas de efeitos positivos/negativos no meio ambiente e na sociedade? Ex: redução de desmatamento, aumento de cobertura vegetal, mudança na qualidade do solo."
            }
        }
    }

    /// Resolve a response key, accepting accents, case and the "eficácia" alias.
    pub fn from_key(key: &str) -> Option<Criterion> {
        match fold_accents(key.trim()).as_str() {
            "relevancia" => Some(Criterion::Relevancia),
            "efetividade" | "eficacia" => Some(Criterion::Efetividade),
            "eficiencia" => Some(Criterion::Eficiencia),
            "sustentabilidade" => Some(Criterion::Sustentabilidade),
            "coerencia" => Some(Criterion::Coerencia),
            "impacto" => Some(Criterion::Impacto),
            _ => None,
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Scores
// ============================================================================

/// Lowest and highest rating on the 1..=5 scale.
pub const SCORE_MIN: u8 = 1;
pub const SCORE_MAX: u8 = 5;

/// A criterion's rating, or the reason it has none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Score {
    Rated { value: u8 },
    Unscored { reason: String },
}

impl Score {
    pub fn is_rated(&self) -> bool {
        matches!(self, Score::Rated { .. })
    }

    pub fn value(&self) -> Option<u8> {
        match self {
            Score::Rated { value } => Some(*value),
            Score::Unscored { .. } => None,
        }
    }

    /// Map a categorical rating word onto the numeric scale.
    pub fn from_category(word: &str) -> Option<u8> {
        match fold_accents(word.trim()).as_str() {
            "muito baixo" | "muito baixa" | "inexistente" => Some(1),
            "baixo" | "baixa" | "fraco" | "fraca" => Some(2),
            "medio" | "media" | "moderado" | "moderada" | "regular" => Some(3),
            "alto" | "alta" | "bom" | "boa" | "forte" => Some(4),
            "muito alto" | "muito alta" | "excelente" => Some(5),
            _ => None,
        }
    }
}

/// One criterion's assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub criterion: Criterion,
    pub score: Score,
    pub justification: String,
    /// References into the assessment's signal list ("S1", "S4")
    pub supporting_signals: Vec<String>,
}

// ============================================================================
// Assessment
// ============================================================================

/// A complete assessment of one document.
///
/// `criteria` holds exactly one entry per [`Criterion`] in [`Criterion::ALL`]
/// order; the array type makes a missing criterion unrepresentable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyAssessment {
    pub id: Uuid,
    pub document_id: String,
    pub document_fingerprint: String,
    pub responsible_entity: String,
    pub entity_source: EntitySource,
    pub criteria: [CriterionScore; 6],
    /// Executive summary naming the responsible entity
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub model: String,
    /// Outbound classification calls spent, retries included
    pub attempts: u32,
    pub signals: Vec<QuantitativeSignal>,
    /// Start of the analyzed text
    pub text_preview: String,
    /// Whether the text sent was cut to fit the token budget
    pub truncated: bool,
}

impl PolicyAssessment {
    pub fn score(&self, criterion: Criterion) -> &CriterionScore {
        // ALL order is the array order.
        &self.criteria[criterion as usize]
    }

    pub fn unscored(&self) -> Vec<Criterion> {
        self.criteria
            .iter()
            .filter(|c| !c.score.is_rated())
            .map(|c| c.criterion)
            .collect()
    }

    /// Mean of the rated criteria, if any are rated.
    pub fn mean_score(&self) -> Option<f64> {
        let rated: Vec<f64> = self
            .criteria
            .iter()
            .filter_map(|c| c.score.value())
            .map(f64::from)
            .collect();
        if rated.is_empty() {
            None
        } else {
            Some(rated.iter().sum::<f64>() / rated.len() as f64)
        }
    }
}
