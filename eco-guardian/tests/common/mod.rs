//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use eco_common::config::Config;
use eco_guardian::assessment::{
    ClassificationRequest, ClassificationResponse, ClassifierError, Criterion, PolicyClassifier,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Build a PDF with one Helvetica text page per entry. Empty entries become
/// pages without a content stream.
pub fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let mut objects: Vec<Vec<u8>> = Vec::new();
    let page_ids: Vec<usize> = (0..pages.len()).map(|i| 4 + 2 * i).collect();
    let kids = page_ids
        .iter()
        .map(|id| format!("{id} 0 R"))
        .collect::<Vec<_>>()
        .join(" ");

    objects.push(b"<< /Type /Catalog /Pages 2 0 R >>".to_vec());
    objects.push(format!("<< /Type /Pages /Kids [{kids}] /Count {} >>", pages.len()).into_bytes());
    objects.push(
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>".to_vec(),
    );

    for (i, text) in pages.iter().enumerate() {
        let content_id = 5 + 2 * i;
        let contents = if text.is_empty() {
            String::new()
        } else {
            format!(" /Contents {content_id} 0 R")
        };
        objects.push(
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
                 /Resources << /Font << /F1 3 0 R >> >>{contents} >>"
            )
            .into_bytes(),
        );

        let mut stream = b"BT /F1 12 Tf 72 720 Td 14 TL\n".to_vec();
        for line in text.lines() {
            stream.push(b'(');
            stream.extend(escape_pdf_string(line));
            stream.extend_from_slice(b") Tj T*\n");
        }
        stream.extend_from_slice(b"ET");
        let mut object = format!("<< /Length {} >>\nstream\n", stream.len()).into_bytes();
        object.extend(stream);
        object.extend_from_slice(b"\nendstream");
        objects.push(object);
    }

    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend(format!("{} 0 obj\n", i + 1).into_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
    }

    let xref_offset = out.len();
    out.extend(format!("xref\n0 {}\n", objects.len() + 1).into_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        out.extend(format!("{offset:010} 00000 n \n").into_bytes());
    }
    out.extend(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
            objects.len() + 1
        )
        .into_bytes(),
    );
    out
}

// Latin-1 covers the WinAnsi letters used in Portuguese text.
fn escape_pdf_string(s: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '(' | ')' | '\\' => {
                bytes.push(b'\\');
                bytes.push(c as u8);
            }
            c if (c as u32) < 256 => bytes.push(c as u32 as u8),
            _ => bytes.push(b'?'),
        }
    }
    bytes
}

pub fn write_pdf(dir: &Path, name: &str, pages: &[&str]) {
    std::fs::write(dir.join(name), pdf_with_pages(pages)).unwrap();
}

pub const PLAN_PAGES: &[&str] = &[
    "Plano Estadual de Prevencao e Controle do Desmatamento\nGoverno do Estado do Para",
    "Meta: reduzir 50% do desmatamento ate 2030.\nOrcamento de R$ 10 milhoes para fiscalizacao.",
];

/// Config pointed at `base_url` with fast retries.
pub fn test_config(base_url: &str) -> Config {
    let mut config = Config::default();
    config.classifier.base_url = base_url.to_string();
    config.classifier.api_key = Some("sk-test".into());
    config.classifier.max_retries = 1;
    config.classifier.base_backoff_ms = 1;
    config.classifier.max_backoff_ms = 2;
    config
}

/// Classifier JSON scoring every criterion except `skip`.
pub fn verdict_json(skip: &[Criterion]) -> String {
    let mut criteria = serde_json::Map::new();
    for c in Criterion::ALL {
        if !skip.contains(&c) {
            criteria.insert(
                c.key().to_string(),
                serde_json::json!({
                    "nota": 4,
                    "justificativa": format!("{}: meta de 50% até 2030 [S1]", c.label()),
                    "sinais": ["S1"]
                }),
            );
        }
    }
    serde_json::json!({
        "entidade_responsavel": "Governo do Estado do Pará",
        "resumo_executivo": "O Governo do Estado do Pará apresenta um plano com metas claras.",
        "criterios": criteria,
    })
    .to_string()
}

/// Chat-completions envelope around `content`.
pub fn completion(content: &str) -> serde_json::Value {
    serde_json::json!({
        "model": "gpt-4o-mini",
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    })
}

/// Replays scripted responses and counts calls.
pub struct ScriptedClassifier {
    script: Mutex<VecDeque<Result<String, ClassifierError>>>,
    calls: Mutex<usize>,
}

impl ScriptedClassifier {
    pub fn new(script: Vec<Result<String, ClassifierError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
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
        _request: &ClassificationRequest,
    ) -> Result<ClassificationResponse, ClassifierError> {
        *self.calls.lock().unwrap() += 1;
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

/// Series CSV: Mato Grosso with six years over two municipalities, Pará
/// with only two years.
pub const SERIES_CSV: &str = "\
cd_municipio,estado,ano,desmatamento_ha
5100102,MT,2015,120
5100102,MT,2016,110
5100102,MT,2017,100
5100102,MT,2018,90
5100102,MT,2019,80
5100102,MT,2020,70
5100201,MT,2015,40
5100201,MT,2016,42
5100201,MT,2017,44
5100201,MT,2018,46
5100201,MT,2019,48
5100201,MT,2020,50
1500107,PA,2019,300
1500107,PA,2020,320
1500131,PA,2019,15
1500131,PA,2020,18
";
