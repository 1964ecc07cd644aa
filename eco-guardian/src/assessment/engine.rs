//! Assessment orchestration: prompt, classify, validate, correct.

use chrono::Utc;
use eco_common::config::AssessmentConfig;
use eco_common::util::preview;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::classifier::{
    ChatMessage, ClassificationRequest, ClassificationResponse, ClassifierError, PolicyClassifier,
};
use super::entity::resolve_entity;
use super::prompt;
use super::retry::{RetryPolicy, Sleeper, TokioSleeper};
use super::schema::{parse_verdict, ClassifierVerdict, VerdictCriterion};
use super::truncate::fit_to_budget;
use super::{Criterion, CriterionScore, PolicyAssessment, Score};
use crate::document::PolicyDocument;
use crate::signals::{signal_pages, QuantitativeSignal};

#[derive(Debug, Error)]
pub enum AssessmentError {
    /// The classification service could not be reached or kept failing.
    #[error("classifier unavailable after {attempts} attempts: {reason}")]
    Unavailable { attempts: u32, reason: String },

    /// Responses never fit the six-criterion schema.
    #[error("classifier response unusable after {attempts} attempts: {reason}")]
    InvalidResponse { attempts: u32, reason: String },

    #[error("assessment cancelled")]
    Cancelled,
}

impl AssessmentError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "assessment.unavailable",
            Self::InvalidResponse { .. } => "assessment.invalid_response",
            Self::Cancelled => "assessment.cancelled",
        }
    }
}

/// Turns a document and its signals into a [`PolicyAssessment`].
pub struct AssessmentEngine {
    classifier: Arc<dyn PolicyClassifier>,
    config: AssessmentConfig,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

// Bookkeeping for one assessment.
struct Conversation {
    messages: Vec<ChatMessage>,
    key_prefix: String,
    round: u32,
    attempts: u32,
    model: Option<String>,
}

impl Conversation {
    fn next_key(&mut self) -> String {
        self.round += 1;
        format!("{}-{}", self.key_prefix, self.round)
    }
}

impl AssessmentEngine {
    pub fn new(
        classifier: Arc<dyn PolicyClassifier>,
        config: AssessmentConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            classifier,
            config,
            retry,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the backoff sleeper.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Assess `document`.
    ///
    /// Every returned assessment carries all six criteria; criteria the
    /// classifier never scored are [`Score::Unscored`].
    pub async fn assess(
        &self,
        document: &PolicyDocument,
        signals: &[QuantitativeSignal],
        jurisdiction_hint: Option<&str>,
    ) -> Result<PolicyAssessment, AssessmentError> {
        let hint = jurisdiction_hint.or(document.jurisdiction());
        let fitted = fit_to_budget(
            document.pages(),
            &signal_pages(signals),
            self.config.token_budget,
            self.config.chars_per_token,
        );
        if fitted.truncated {
            info!(
                document_id = %document.id(),
                kept = fitted.kept_pages.len(),
                partial = fitted.partial_pages.len(),
                dropped = fitted.dropped_pages.len(),
                "Document text truncated to token budget"
            );
        }

        let mut convo = Conversation {
            messages: vec![
                ChatMessage::system(prompt::system_prompt()),
                ChatMessage::user(prompt::user_prompt(&fitted, signals, hint)),
            ],
            key_prefix: document.fingerprint()[..16].to_string(),
            round: 0,
            attempts: 0,
            model: None,
        };

        let mut verdict = self
            .first_verdict(&mut convo, document.id(), signals.len())
            .await?;
        self.correct_missing(&mut convo, &mut verdict, document.id(), signals.len())
            .await;

        let corrective_rounds = self.config.corrective_retries;
        let mut rejected = std::mem::take(&mut verdict.rejected);
        let mut scored: BTreeMap<Criterion, VerdictCriterion> = std::mem::take(&mut verdict.criteria);
        let criteria = Criterion::ALL.map(|criterion| match scored.remove(&criterion) {
            Some(found) => CriterionScore {
                criterion,
                score: Score::Rated { value: found.value },
                justification: found.justification,
                supporting_signals: found.signals,
            },
            None => {
                let reason = match rejected.remove(&criterion) {
                    Some(why) => format!("invalid score: {why}"),
                    None => format!(
                        "not returned by the classifier after {corrective_rounds} corrective request(s)"
                    ),
                };
                CriterionScore {
                    criterion,
                    score: Score::Unscored { reason },
                    justification: String::new(),
                    supporting_signals: Vec::new(),
                }
            }
        });

        let entity = resolve_entity(document.pages(), verdict.entity.as_deref(), hint);
        let summary = verdict.summary.unwrap_or_else(|| {
            format!("{}: resumo executivo não retornado pelo classificador.", entity.name)
        });

        let assessment = PolicyAssessment {
            id: Uuid::new_v4(),
            document_id: document.id().to_string(),
            document_fingerprint: document.fingerprint().to_string(),
            responsible_entity: entity.name,
            entity_source: entity.source,
            criteria,
            summary,
            created_at: Utc::now(),
            model: convo
                .model
                .unwrap_or_else(|| self.classifier.model().to_string()),
            attempts: convo.attempts,
            signals: signals.to_vec(),
            text_preview: preview(&document.full_text(), self.config.preview_chars),
            truncated: fitted.truncated,
        };

        info!(
            document_id = %assessment.document_id,
            entity = %assessment.responsible_entity,
            attempts = assessment.attempts,
            unscored = assessment.unscored().len(),
            "Assessment complete"
        );
        Ok(assessment)
    }

    /// Request until a response parses, re-asking on schema failures.
    async fn first_verdict(
        &self,
        convo: &mut Conversation,
        document_id: &str,
        signal_count: usize,
    ) -> Result<ClassifierVerdict, AssessmentError> {
        let mut schema_round = 0;
        loop {
            let response = self.call(convo, document_id).await?;
            match parse_verdict(&response.content, signal_count) {
                Ok(verdict) => {
                    convo.messages.push(ChatMessage::assistant(response.content));
                    return Ok(verdict);
                }
                Err(e) if schema_round < self.config.schema_retries => {
                    schema_round += 1;
                    warn!(
                        document_id = %document_id,
                        error = %e,
                        round = schema_round,
                        "Classifier response failed schema validation, re-requesting"
                    );
                    convo.messages.push(ChatMessage::assistant(response.content));
                    convo
                        .messages
                        .push(ChatMessage::user(prompt::invalid_response_prompt()));
                }
                Err(e) => {
                    return Err(AssessmentError::InvalidResponse {
                        attempts: convo.attempts,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// Corrective re-requests for criteria without a usable score.
    ///
    /// Only criteria still missing are taken from each follow-up, so a
    /// criterion scored once is never overwritten.
    async fn correct_missing(
        &self,
        convo: &mut Conversation,
        verdict: &mut ClassifierVerdict,
        document_id: &str,
        signal_count: usize,
    ) {
        for round in 1..=self.config.corrective_retries {
            let missing = verdict.missing();
            if missing.is_empty() {
                return;
            }
            info!(
                document_id = %document_id,
                round,
                missing = ?missing.iter().map(|c| c.key()).collect::<Vec<_>>(),
                "Requesting missing criteria"
            );
            convo
                .messages
                .push(ChatMessage::user(prompt::corrective_prompt(&missing)));

            let response = match self.call(convo, document_id).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(document_id = %document_id, error = %e, "Corrective request failed");
                    return;
                }
            };

            match parse_verdict(&response.content, signal_count) {
                Ok(follow_up) => {
                    for criterion in missing {
                        if let Some(found) = follow_up.criteria.get(&criterion) {
                            verdict.criteria.insert(criterion, found.clone());
                            verdict.rejected.remove(&criterion);
                        } else if let Some(why) = follow_up.rejected.get(&criterion) {
                            verdict.rejected.insert(criterion, why.clone());
                        }
                    }
                    if verdict.summary.is_none() {
                        verdict.summary = follow_up.summary;
                    }
                    if verdict.entity.is_none() {
                        verdict.entity = follow_up.entity;
                    }
                }
                Err(e) => {
                    debug!(document_id = %document_id, error = %e, "Corrective response unusable");
                }
            }
            convo.messages.push(ChatMessage::assistant(response.content));
        }
    }

    /// One logical request with transport retries.
    ///
    /// The idempotency key is shared by every transport retry of the request.
    async fn call(
        &self,
        convo: &mut Conversation,
        document_id: &str,
    ) -> Result<ClassificationResponse, AssessmentError> {
        let request = ClassificationRequest {
            messages: convo.messages.clone(),
            idempotency_key: convo.next_key(),
        };
        let max_retries = self.retry.max_retries;
        let mut last_error: Option<ClassifierError> = None;

        for attempt in 0..=max_retries {
            convo.attempts += 1;
            match self.classifier.classify(&request).await {
                Ok(response) => {
                    if attempt > 0 {
                        info!(
                            document_id = %document_id,
                            attempt = attempt + 1,
                            "Classifier recovered after retries"
                        );
                    }
                    debug!(
                        document_id = %document_id,
                        latency_ms = response.latency_ms,
                        "Classifier responded"
                    );
                    convo.model = Some(response.model.clone());
                    return Ok(response);
                }
                Err(e) if !e.is_retryable() => {
                    return Err(AssessmentError::Unavailable {
                        attempts: convo.attempts,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    if attempt < max_retries {
                        let delay = self.retry.backoff_delay(attempt);
                        warn!(
                            document_id = %document_id,
                            classifier = self.classifier.name(),
                            attempt = attempt + 1,
                            max_retries,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Classifier call failed, retrying"
                        );
                        self.sleeper.sleep(delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(AssessmentError::Unavailable {
            attempts: convo.attempts,
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt made".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::RecordingSleeper;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays scripted outcomes and records each request.
    struct ScriptedClassifier {
        script: Mutex<VecDeque<Result<String, ClassifierError>>>,
        seen: Mutex<Vec<ClassificationRequest>>,
    }

    impl ScriptedClassifier {
        fn new(script: Vec<Result<String, ClassifierError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ClassificationRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PolicyClassifier for ScriptedClassifier {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-model"
        }

        async fn classify(
            &self,
            request: &ClassificationRequest,
        ) -> Result<ClassificationResponse, ClassifierError> {
            self.seen.lock().unwrap().push(request.clone());
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ClassifierError::Network("script exhausted".into())));
            next.map(|content| ClassificationResponse {
                content,
                model: "scripted-model".into(),
                latency_ms: 1,
            })
        }
    }

    fn response(skip: &[Criterion]) -> String {
        let mut criteria = serde_json::Map::new();
        for c in Criterion::ALL {
            if !skip.contains(&c) {
                criteria.insert(
                    c.key().to_string(),
                    serde_json::json!({"nota": 3, "justificativa": format!("{} ok", c.label())}),
                );
            }
        }
        serde_json::json!({
            "entidade_responsavel": "Governo do Estado do Pará",
            "resumo_executivo": "O Governo do Estado do Pará apresenta o plano.",
            "criterios": criteria,
        })
        .to_string()
    }

    fn document() -> PolicyDocument {
        PolicyDocument::new(
            Some("plano-pa".into()),
            None,
            b"%PDF-1.4 fake".to_vec(),
            vec!["O Governo do Estado do Pará investirá R$ 10 milhões.".into()],
        )
    }

    fn engine(classifier: Arc<ScriptedClassifier>, sleeper: Arc<RecordingSleeper>) -> AssessmentEngine {
        let retry = RetryPolicy {
            max_retries: 2,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
        };
        AssessmentEngine::new(classifier, AssessmentConfig::default(), retry).with_sleeper(sleeper)
    }

    #[tokio::test]
    async fn test_complete_response() {
        let classifier = ScriptedClassifier::new(vec![Ok(response(&[]))]);
        let sleeper = Arc::new(RecordingSleeper::new());
        let assessment = engine(classifier.clone(), sleeper.clone())
            .assess(&document(), &[], None)
            .await
            .unwrap();

        assert_eq!(assessment.attempts, 1);
        assert!(assessment.unscored().is_empty());
        assert_eq!(assessment.responsible_entity, "Governo do Estado do Pará");
        assert_eq!(assessment.model, "scripted-model");
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn test_missing_criterion_retried_once_then_unscored() {
        let classifier = ScriptedClassifier::new(vec![
            Ok(response(&[Criterion::Impacto])),
            Ok(response(&[Criterion::Impacto])),
        ]);
        let sleeper = Arc::new(RecordingSleeper::new());
        let assessment = engine(classifier.clone(), sleeper)
            .assess(&document(), &[], None)
            .await
            .unwrap();

        assert_eq!(assessment.attempts, 2);
        assert_eq!(assessment.unscored(), vec![Criterion::Impacto]);
        assert!(matches!(
            assessment.score(Criterion::Impacto).score,
            Score::Unscored { .. }
        ));
        assert_eq!(assessment.criteria.iter().filter(|c| c.score.is_rated()).count(), 5);

        let requests = classifier.requests();
        assert_eq!(requests.len(), 2);
        let last = requests[1].messages.last().unwrap();
        assert!(last.content.contains("\"impacto\""));
        assert_ne!(requests[0].idempotency_key, requests[1].idempotency_key);
    }

    #[tokio::test]
    async fn test_corrective_round_fills_gap() {
        let follow_up = serde_json::json!({
            "criterios": {
                "impacto": {"nota": 2, "justificativa": "Queda de 10%."},
                "relevancia": {"nota": 1, "justificativa": "não deve sobrescrever"}
            }
        })
        .to_string();
        let classifier = ScriptedClassifier::new(vec![Ok(response(&[Criterion::Impacto])), Ok(follow_up)]);
        let assessment = engine(classifier, Arc::new(RecordingSleeper::new()))
            .assess(&document(), &[], None)
            .await
            .unwrap();

        assert!(assessment.unscored().is_empty());
        assert_eq!(assessment.score(Criterion::Impacto).score.value(), Some(2));
        assert_eq!(assessment.score(Criterion::Relevancia).score.value(), Some(3));
    }

    #[tokio::test]
    async fn test_transient_errors_back_off() {
        let classifier = ScriptedClassifier::new(vec![
            Err(ClassifierError::Timeout),
            Err(ClassifierError::Http { status: 503, body: String::new() }),
            Ok(response(&[])),
        ]);
        let sleeper = Arc::new(RecordingSleeper::new());
        let assessment = engine(classifier.clone(), sleeper.clone())
            .assess(&document(), &[], None)
            .await
            .unwrap();

        assert_eq!(assessment.attempts, 3);
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
        let keys: Vec<String> = classifier
            .requests()
            .into_iter()
            .map(|r| r.idempotency_key)
            .collect();
        assert!(keys.iter().all(|k| k == &keys[0]));
    }

    #[tokio::test]
    async fn test_exhausted_retries_unavailable() {
        let classifier = ScriptedClassifier::new(vec![
            Err(ClassifierError::Timeout),
            Err(ClassifierError::Timeout),
            Err(ClassifierError::Timeout),
        ]);
        let err = engine(classifier, Arc::new(RecordingSleeper::new()))
            .assess(&document(), &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, AssessmentError::Unavailable { attempts: 3, .. }));
        assert_eq!(err.kind(), "assessment.unavailable");
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let classifier = ScriptedClassifier::new(vec![Err(ClassifierError::Http {
            status: 401,
            body: "bad key".into(),
        })]);
        let sleeper = Arc::new(RecordingSleeper::new());
        let err = engine(classifier, sleeper.clone())
            .assess(&document(), &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, AssessmentError::Unavailable { attempts: 1, .. }));
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn test_unparsable_twice_is_invalid_response() {
        let classifier = ScriptedClassifier::new(vec![
            Ok("não sei".into()),
            Ok("{\"resumo\": \"sem critérios\"}".into()),
        ]);
        let err = engine(classifier, Arc::new(RecordingSleeper::new()))
            .assess(&document(), &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, AssessmentError::InvalidResponse { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_unparsable_then_valid() {
        let classifier = ScriptedClassifier::new(vec![Ok("texto livre".into()), Ok(response(&[]))]);
        let assessment = engine(classifier, Arc::new(RecordingSleeper::new()))
            .assess(&document(), &[], Some("AM"))
            .await
            .unwrap();
        assert_eq!(assessment.attempts, 2);
        // The document names Pará, which outranks the hint.
        assert_eq!(assessment.responsible_entity, "Governo do Estado do Pará");
    }

    #[tokio::test]
    async fn test_preview_and_signals_carried() {
        let detector = crate::signals::SignalDetector::new();
        let doc = document();
        let signals = detector.detect(doc.pages());
        let classifier = ScriptedClassifier::new(vec![Ok(response(&[]))]);
        let assessment = engine(classifier.clone(), Arc::new(RecordingSleeper::new()))
            .assess(&doc, &signals, None)
            .await
            .unwrap();

        assert!(!assessment.signals.is_empty());
        assert_eq!(assessment.text_preview, doc.full_text());
        assert!(!assessment.truncated);
        let user = &classifier.requests()[0].messages[1].content;
        assert!(user.contains("S1 [budget]"));
    }
}
