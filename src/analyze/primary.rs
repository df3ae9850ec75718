// src/analyze/primary.rs
//! Primary classifier: a hosted text-classification model.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::analyze::text::fingerprint;
use crate::config::HuggingFaceConfig;
use crate::error::ClassifierError;
use crate::model::{Label, PrimaryOutput, PrimaryScores};

const RETRY_DELAY: Duration = Duration::from_secs(2);

#[async_trait]
pub trait PrimaryClassifier: Send + Sync {
    async fn predict(&self, text: &str) -> Result<PrimaryOutput, ClassifierError>;
    fn model(&self) -> &str;
}

pub type DynPrimary = Arc<dyn PrimaryClassifier>;

/// HuggingFace Inference API client.
pub struct HuggingFaceClassifier {
    http: reqwest::Client,
    cfg: HuggingFaceConfig,
    endpoint: String,
}

impl HuggingFaceClassifier {
    pub fn new(cfg: HuggingFaceConfig) -> Result<Self, ClassifierError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("fakenews-pipeline/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(cfg.timeout())
            .build()
            .map_err(ClassifierError::Http)?;
        let endpoint = cfg.endpoint();
        Ok(Self {
            http,
            cfg,
            endpoint,
        })
    }

    async fn call_once(&self, key: &str, text: &str) -> Result<Value, ClassifierError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(key)
            .json(&serde_json::json!({ "inputs": text }))
            .send()
            .await
            .map_err(ClassifierError::from_reqwest)?;

        let status = resp.status().as_u16();
        if status == 200 {
            return resp
                .json::<Value>()
                .await
                .map_err(|e| ClassifierError::Decode(e.to_string()));
        }

        let body = resp.text().await.unwrap_or_default();
        if status == 503 {
            #[derive(Deserialize)]
            struct Loading {
                estimated_time: Option<f64>,
            }
            if let Ok(Loading {
                estimated_time: Some(secs),
            }) = serde_json::from_str::<Loading>(&body)
            {
                return Err(ClassifierError::ModelLoading(secs));
            }
        }
        Err(ClassifierError::Status {
            status,
            body: body.chars().take(200).collect(),
        })
    }
}

#[async_trait]
impl PrimaryClassifier for HuggingFaceClassifier {
    async fn predict(&self, text: &str) -> Result<PrimaryOutput, ClassifierError> {
        let key = self
            .cfg
            .api_key
            .as_deref()
            .ok_or(ClassifierError::MissingApiKey)?;
        let fp = fingerprint(text);

        let mut attempt: u32 = 0;
        loop {
            match self.call_once(key, text).await {
                Ok(v) => {
                    let out = parse_hf_response(&v, &self.cfg.model)?;
                    info!(target: "classify", text = %fp, label = %out.label, confidence = out.confidence, "primary prediction");
                    return Ok(out);
                }
                Err(e) => {
                    if matches!(&e, ClassifierError::Status { status, .. } if matches!(status, 401 | 403 | 404 | 410))
                    {
                        error!(target: "classify", model = %self.cfg.model, url = %self.endpoint, error = %e, "primary model rejected the request; check model name and token");
                        return Err(e);
                    }
                    if !e.is_retryable() || attempt >= self.cfg.max_retries {
                        warn!(target: "classify", text = %fp, attempt, error = %e, "primary prediction failed");
                        return Err(e);
                    }
                    let delay = match &e {
                        ClassifierError::ModelLoading(secs) => Duration::from_secs_f64(
                            secs.clamp(0.0, self.cfg.loading_wait_cap_secs as f64),
                        ),
                        _ => RETRY_DELAY,
                    };
                    warn!(target: "classify", attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying primary prediction");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn model(&self) -> &str {
        &self.cfg.model
    }
}

fn map_label(raw: &str) -> Option<Label> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "LABEL_0" | "REAL" | "TRUE" => Some(Label::Real),
        "LABEL_1" | "FAKE" | "FALSE" => Some(Label::Fake),
        _ => None,
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Parse `[[{"label": "LABEL_0", "score": 0.95}, ...]]` (or the flat variant).
/// `LABEL_0` is REAL and `LABEL_1` is FAKE.
pub fn parse_hf_response(v: &Value, model: &str) -> Result<PrimaryOutput, ClassifierError> {
    #[derive(Deserialize)]
    struct Entry {
        label: String,
        score: f64,
    }

    let list = match v.as_array().and_then(|a| a.first()) {
        Some(Value::Array(inner)) => inner.clone(),
        Some(Value::Object(_)) => v.as_array().cloned().unwrap_or_default(),
        _ => return Err(ClassifierError::Decode(format!("unexpected payload: {v}"))),
    };
    let entries: Vec<Entry> = serde_json::from_value(Value::Array(list))
        .map_err(|e| ClassifierError::Decode(e.to_string()))?;

    let mut scores = PrimaryScores::default();
    for e in &entries {
        match map_label(&e.label) {
            Some(Label::Fake) => scores.fake = round4(e.score),
            Some(Label::Real) => scores.real = round4(e.score),
            _ => {}
        }
    }

    let best = entries
        .iter()
        .max_by(|a, b| a.score.total_cmp(&b.score))
        .ok_or_else(|| ClassifierError::Decode("empty prediction list".into()))?;
    let label = map_label(&best.label)
        .ok_or_else(|| ClassifierError::Decode(format!("unknown label '{}'", best.label)))?;

    Ok(PrimaryOutput {
        label,
        confidence: round4(best.score.clamp(0.0, 1.0)),
        scores,
        model: model.to_string(),
        error: None,
    })
}

/// Scripted primary classifier for tests and offline runs.
/// `None` entries fail with a timeout; once the script runs out the fallback repeats.
pub struct MockPrimary {
    script: Mutex<VecDeque<Option<PrimaryOutput>>>,
    fallback: Option<PrimaryOutput>,
    calls: AtomicUsize,
}

impl MockPrimary {
    pub fn output(label: Label, confidence: f64) -> PrimaryOutput {
        let (fake, real) = match label {
            Label::Fake => (confidence, 1.0 - confidence),
            Label::Real => (1.0 - confidence, confidence),
            _ => (0.0, 0.0),
        };
        PrimaryOutput {
            label,
            confidence,
            scores: PrimaryScores { fake, real },
            model: "mock-primary".to_string(),
            error: None,
        }
    }

    pub fn fixed(label: Label, confidence: f64) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(Self::output(label, confidence)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn scripted(script: Vec<Option<PrimaryOutput>>, fallback: Option<PrimaryOutput>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PrimaryClassifier for MockPrimary {
    async fn predict(&self, _text: &str) -> Result<PrimaryOutput, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut q = self.script.lock().unwrap_or_else(|p| p.into_inner());
            q.pop_front()
        };
        let reply = match next {
            Some(scripted) => scripted,
            None => self.fallback.clone(),
        };
        reply.ok_or(ClassifierError::Timeout)
    }

    fn model(&self) -> &str {
        "mock-primary"
    }
}
