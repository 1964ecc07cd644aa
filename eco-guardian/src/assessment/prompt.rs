//! Prompt text sent to the classifier.

use super::truncate::FittedText;
use super::Criterion;
use crate::signals::QuantitativeSignal;

const SYSTEM_PROMPT: &str = "\
Você é um analista especialista em políticas públicas ambientais brasileiras. \
Avalie o documento de política pública recebido segundo os critérios de avaliação da OCDE.

Responda exclusivamente com um objeto JSON, sem texto fora dele.

Regras:
- O campo \"resumo_executivo\" deve ter cerca de 300 palavras e começar nomeando o ente \
responsável pela política (governo estadual, Distrito Federal ou Governo Federal).
- Para cada critério, atribua uma nota inteira de 1 (muito baixo) a 5 (muito alto) e uma \
justificativa.
- Cite dados quantitativos sempre que existirem: metas, valores, prazos, beneficiários, \
áreas. Referencie os sinais quantitativos fornecidos pelo identificador (S1, S2, ...).
- Quando o documento não trouxer dados quantitativos para um critério, diga isso \
explicitamente na justificativa. Não invente números.
- Se o texto estiver marcado como truncado, avalie apenas o conteúdo presente.";

/// Fixed system prompt with criterion guidance and the output schema.
pub fn system_prompt() -> String {
    let mut prompt = String::from(SYSTEM_PROMPT);

    prompt.push_str("\n\nCritérios:\n");
    for criterion in Criterion::ALL {
        prompt.push_str(&format!(
            "- {} (\"{}\"): {}\n",
            criterion.label(),
            criterion.key(),
            criterion.guidance()
        ));
    }

    prompt.push_str("\nFormato da resposta:\n");
    prompt.push_str(&response_schema());
    prompt
}

fn response_schema() -> String {
    let criteria: Vec<String> = Criterion::ALL
        .iter()
        .map(|c| {
            format!(
                "    \"{}\": {{\"nota\": 1-5, \"justificativa\": \"...\", \"sinais\": [\"S1\"]}}",
                c.key()
            )
        })
        .collect();
    format!(
        "{{\n  \"entidade_responsavel\": \"...\",\n  \"resumo_executivo\": \"...\",\n  \"criterios\": {{\n{}\n  }}\n}}",
        criteria.join(",\n")
    )
}

/// User message carrying the document text and the detected signals.
pub fn user_prompt(
    fitted: &FittedText,
    signals: &[QuantitativeSignal],
    jurisdiction_hint: Option<&str>,
) -> String {
    let mut prompt = String::new();

    if let Some(hint) = jurisdiction_hint {
        prompt.push_str(&format!("Jurisdição informada: {hint}\n\n"));
    }

    prompt.push_str("Sinais quantitativos detectados:\n");
    // Signals on dropped pages keep their numbering but are not listed.
    if !signals.iter().any(|s| fitted.includes(s.page)) {
        prompt.push_str("(nenhum)\n");
    }
    for (idx, signal) in signals.iter().enumerate() {
        if !fitted.includes(signal.page) {
            continue;
        }
        prompt.push_str(&format!(
            "{} [{}] \"{}\" (página {})\n",
            QuantitativeSignal::reference(idx),
            signal.kind,
            signal.raw,
            signal.page
        ));
    }

    prompt.push_str("\nTexto do documento:\n");
    prompt.push_str(&fitted.text);
    prompt
}

/// Follow-up asking only for the criteria that came back without a score.
pub fn corrective_prompt(missing: &[Criterion]) -> String {
    let keys: Vec<String> = missing
        .iter()
        .map(|c| format!("\"{}\" ({})", c.key(), c.label()))
        .collect();
    format!(
        "A resposta anterior não trouxe nota válida para: {}. \
Responda novamente com o mesmo formato JSON, incluindo em \"criterios\" apenas esses critérios, \
cada um com \"nota\" inteira de 1 a 5, \"justificativa\" e \"sinais\".",
        keys.join(", ")
    )
}

/// Follow-up after a response that was not a JSON object in the expected shape.
pub fn invalid_response_prompt() -> String {
    "A resposta anterior não é um objeto JSON no formato pedido. \
Responda apenas com o objeto JSON contendo \"entidade_responsavel\", \"resumo_executivo\" e \"criterios\"."
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::fit_to_budget;
    use crate::signals::{NormalizedValue, SignalKind};

    fn signal(page: usize, raw: &str) -> QuantitativeSignal {
        QuantitativeSignal {
            kind: SignalKind::Budget,
            family: "brl_amount".into(),
            raw: raw.into(),
            value: NormalizedValue::Unparsed,
            page,
            offset: 0,
        }
    }

    #[test]
    fn test_system_prompt_lists_every_criterion() {
        let prompt = system_prompt();
        for c in Criterion::ALL {
            assert!(prompt.contains(c.key()));
            assert!(prompt.contains(c.guidance()));
        }
        assert!(prompt.contains("resumo_executivo"));
    }

    #[test]
    fn test_user_prompt_references_signals() {
        let pages = vec!["R$ 10 milhões".to_string(), "texto".to_string()];
        let fitted = fit_to_budget(&pages, &[1], 10_000, 4);
        let signals = vec![signal(1, "R$ 10 milhões")];
        let prompt = user_prompt(&fitted, &signals, Some("PA"));
        assert!(prompt.contains("Jurisdição informada: PA"));
        assert!(prompt.contains("S1 [budget] \"R$ 10 milhões\" (página 1)"));
        assert!(prompt.contains("[página 2]"));
    }

    #[test]
    fn test_corrective_prompt_names_only_missing() {
        let prompt = corrective_prompt(&[Criterion::Impacto]);
        assert!(prompt.contains("\"impacto\""));
        assert!(!prompt.contains("relevancia"));
    }
}
