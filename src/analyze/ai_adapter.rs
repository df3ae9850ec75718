//! LLM adapter: provider abstraction + rate-limited, retrying classifier wrapper.
//!
//! `ChatProvider` does the raw remote call; `LlmClient` owns the sliding-window
//! limiter and retry policy and turns replies into `SecondaryOutput`s. The
//! wrapper never fails outward: exhausted retries degrade to UNCERTAIN.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::analyze::limiter::{RetryPolicy, SlidingWindowLimiter};
use crate::analyze::text::fingerprint;
use crate::config::LlmConfig;
use crate::error::ClassifierError;
use crate::model::{Label, PrimaryOutput, SecondaryOutput};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

/// Second-opinion classifier used by the workflow.
pub trait LlmClassifier: Send + Sync {
    /// Label + confidence + short reason. Degrades to UNCERTAIN on failure.
    fn classify<'a>(&'a self, text: &'a str) -> BoxFuture<'a, SecondaryOutput>;

    /// Free-text analysis of both results. Falls back to a canned summary.
    fn explain<'a>(
        &'a self,
        text: &'a str,
        primary: &'a PrimaryOutput,
        secondary: &'a SecondaryOutput,
    ) -> BoxFuture<'a, String>;

    /// `false` means the workflow skips this classifier entirely.
    fn is_enabled(&self) -> bool;

    fn provider_name(&self) -> &'static str;
}

pub type DynLlm = Arc<dyn LlmClassifier>;

/// Factory: build a classifier according to config and environment variables.
///
/// * If `cfg.enabled == false`, returns `DisabledLlm` (test mode included).
/// * Else if `CLASSIFIER_TEST_MODE=mock`, returns a deterministic mock-backed client.
/// * Else builds the chat-completions provider wrapped with limiter + retries,
///   or `DisabledLlm` when no key is configured.
pub fn build_llm_from_config(cfg: &LlmConfig) -> DynLlm {
    if !cfg.enabled {
        return Arc::new(DisabledLlm);
    }

    if std::env::var("CLASSIFIER_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        let mock = MockProvider::always(
            r#"{"label": "real", "confidence": 0.8, "reason": "Neutral wording (mock)"}"#,
        );
        return Arc::new(LlmClient::new(mock, cfg));
    }

    match ChatCompletionsProvider::new(cfg) {
        Ok(provider) => Arc::new(LlmClient::new(provider, cfg)),
        Err(e) => {
            warn!(target: "classify", error = %e, "secondary classifier unavailable; running primary only");
            Arc::new(DisabledLlm)
        }
    }
}

// ------------------------------------------------------------
// Provider abstraction + concrete providers
// ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
}

/// Low-level provider: one remote call, no retries. Separated so the same
/// wrapper serves production and tests.
pub trait ChatProvider: Send + Sync + 'static {
    fn complete<'a>(&'a self, req: &'a ChatRequest)
        -> BoxFuture<'a, Result<String, ClassifierError>>;
    fn name(&self) -> &'static str;
}

/// OpenAI-compatible chat completions (DeepSeek by default).
pub struct ChatCompletionsProvider {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl ChatCompletionsProvider {
    pub fn new(cfg: &LlmConfig) -> Result<Self, ClassifierError> {
        let api_key = cfg
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ClassifierError::MissingApiKey)?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("fakenews-pipeline/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(cfg.timeout())
            .build()
            .map_err(ClassifierError::Http)?;
        Ok(Self {
            http,
            url: cfg.chat_completions_url(),
            api_key,
            model: cfg.model.clone(),
        })
    }
}

impl ChatProvider for ChatCompletionsProvider {
    fn complete<'a>(
        &'a self,
        req: &'a ChatRequest,
    ) -> BoxFuture<'a, Result<String, ClassifierError>> {
        Box::pin(async move {
            #[derive(Serialize)]
            struct Msg<'a> {
                role: &'a str,
                content: &'a str,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                messages: Vec<Msg<'a>>,
                temperature: f32,
            }
            #[derive(Deserialize)]
            struct Resp {
                choices: Vec<Choice>,
            }
            #[derive(Deserialize)]
            struct Choice {
                message: ChoiceMsg,
            }
            #[derive(Deserialize)]
            struct ChoiceMsg {
                content: Option<String>,
            }

            let body = Req {
                model: &self.model,
                messages: vec![
                    Msg {
                        role: "system",
                        content: &req.system,
                    },
                    Msg {
                        role: "user",
                        content: &req.user,
                    },
                ],
                temperature: req.temperature,
            };

            let resp = self
                .http
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(ClassifierError::from_reqwest)?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(ClassifierError::Status {
                    status: status.as_u16(),
                    body: text.chars().take(200).collect(),
                });
            }
            let parsed: Resp = resp
                .json()
                .await
                .map_err(|e| ClassifierError::Decode(e.to_string()))?;
            parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .map(|c| c.trim().to_string())
                .ok_or_else(|| ClassifierError::Decode("response has no choices".into()))
        })
    }

    fn name(&self) -> &'static str {
        "chat-completions"
    }
}

/// Replays scripted replies in order. `Err(status)` entries simulate HTTP errors.
pub struct MockProvider {
    replies: Mutex<VecDeque<Result<String, u16>>>,
    fallback: Option<String>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn scripted(replies: Vec<Result<String, u16>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(reply: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Some(reply.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ChatProvider for MockProvider {
    fn complete<'a>(
        &'a self,
        _req: &'a ChatRequest,
    ) -> BoxFuture<'a, Result<String, ClassifierError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut q = self.replies.lock().unwrap_or_else(|p| p.into_inner());
            q.pop_front()
        };
        let out = match next {
            Some(Ok(content)) => Ok(content),
            Some(Err(status)) => Err(ClassifierError::Status {
                status,
                body: "mock".to_string(),
            }),
            None => self
                .fallback
                .clone()
                .ok_or(ClassifierError::MockQueueEmpty),
        };
        Box::pin(async move { out })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Used when the secondary classifier is switched off.
pub struct DisabledLlm;

impl LlmClassifier for DisabledLlm {
    fn classify<'a>(&'a self, _text: &'a str) -> BoxFuture<'a, SecondaryOutput> {
        Box::pin(async {
            SecondaryOutput::uncertain("disabled", "Secondary classifier is disabled")
        })
    }

    fn explain<'a>(
        &'a self,
        _text: &'a str,
        primary: &'a PrimaryOutput,
        _secondary: &'a SecondaryOutput,
    ) -> BoxFuture<'a, String> {
        let out = fallback_explanation(primary);
        Box::pin(async move { out })
    }

    fn is_enabled(&self) -> bool {
        false
    }

    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

// ------------------------------------------------------------
// Rate-limited, retrying wrapper
// ------------------------------------------------------------

pub struct LlmClient<P: ChatProvider> {
    inner: P,
    model: String,
    limiter: SlidingWindowLimiter,
    retry: RetryPolicy,
}

impl<P: ChatProvider> LlmClient<P> {
    pub fn new(inner: P, cfg: &LlmConfig) -> Self {
        Self {
            inner,
            model: cfg.model.clone(),
            limiter: SlidingWindowLimiter::new(cfg.rate_limit_max, cfg.rate_window()),
            retry: RetryPolicy::new(cfg.max_retries, cfg.backoff_base()),
        }
    }

    pub fn with_parts(
        inner: P,
        model: impl Into<String>,
        limiter: SlidingWindowLimiter,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inner,
            model: model.into(),
            limiter,
            retry,
        }
    }

    pub fn provider(&self) -> &P {
        &self.inner
    }

    /// Limiter-gated call with bounded retries. 401 is never retried.
    async fn call_chat(&self, req: &ChatRequest) -> Result<String, ClassifierError> {
        let mut attempt: u32 = 0;
        loop {
            let waited = self.limiter.acquire().await;
            if !waited.is_zero() {
                counter!("llm_rate_limit_waits_total").increment(1);
                info!(target: "classify", waited_ms = waited.as_millis() as u64, "llm limiter delayed call");
            }

            match self.inner.complete(req).await {
                Ok(content) => return Ok(content),
                Err(e) => {
                    if matches!(e, ClassifierError::Status { status: 401, .. }) {
                        error!(target: "classify", provider = self.inner.name(), "llm api key rejected (401)");
                        return Err(e);
                    }
                    if !e.is_retryable() || !self.retry.has_attempts_left(attempt) {
                        return Err(e);
                    }
                    warn!(
                        target: "classify",
                        attempt = attempt + 1,
                        max = self.retry.max_attempts,
                        error = %e,
                        "llm call failed, backing off"
                    );
                    self.retry.wait(attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn classify_impl(&self, text: &str) -> SecondaryOutput {
        let req = ChatRequest {
            system: "You are a fake-news classifier for English news articles. \
                     You must respond ONLY with valid JSON as specified by the user."
                .to_string(),
            user: classify_prompt(text),
            temperature: 0.3,
        };

        let content = match self.call_chat(&req).await {
            Ok(c) => c,
            Err(e) => {
                warn!(target: "classify", text = %fingerprint(text), error = %e, "llm classification degraded");
                let mut out = SecondaryOutput::uncertain(&self.model, "LLM API call failed");
                out.rate_limited = e.is_rate_limited();
                return out;
            }
        };

        match parse_llm_json(&content) {
            Ok(parsed) => {
                info!(target: "classify", text = %fingerprint(text), label = %parsed.label, confidence = parsed.confidence, "llm classification");
                SecondaryOutput {
                    label: parsed.label,
                    confidence: parsed.confidence,
                    reason: sanitize_reason(&parsed.reason),
                    model: self.model.clone(),
                    rate_limited: false,
                }
            }
            Err(e) => {
                warn!(target: "classify", error = %e, "llm reply was not valid JSON");
                SecondaryOutput::uncertain(&self.model, "JSON Parse Error")
            }
        }
    }

    async fn explain_impl(
        &self,
        text: &str,
        primary: &PrimaryOutput,
        secondary: &SecondaryOutput,
    ) -> String {
        let req = ChatRequest {
            system: "You are a careful misinformation analyst. \
                     You will explain risks and recommendations clearly in English using bullet points."
                .to_string(),
            user: explain_prompt(text, primary, secondary),
            temperature: 0.5,
        };
        match self.call_chat(&req).await {
            Ok(content) if !content.trim().is_empty() => content.trim().to_string(),
            Ok(_) => fallback_explanation(primary),
            Err(e) => {
                warn!(target: "classify", error = %e, "llm explanation unavailable, using fallback");
                fallback_explanation(primary)
            }
        }
    }
}

impl<P: ChatProvider> LlmClassifier for LlmClient<P> {
    fn classify<'a>(&'a self, text: &'a str) -> BoxFuture<'a, SecondaryOutput> {
        Box::pin(self.classify_impl(text))
    }

    fn explain<'a>(
        &'a self,
        text: &'a str,
        primary: &'a PrimaryOutput,
        secondary: &'a SecondaryOutput,
    ) -> BoxFuture<'a, String> {
        Box::pin(self.explain_impl(text, primary, secondary))
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn provider_name(&self) -> &'static str {
        self.inner.name()
    }
}

// ------------------------------------------------------------
// Prompts and parsing
// ------------------------------------------------------------

fn classify_prompt(text: &str) -> String {
    format!(
        r#"Your task: Classify the following news headline/content as "fake" or "real" based on:
- Language patterns (sensationalist, clickbait, emotional manipulation)
- Claim credibility (extreme claims without evidence, conspiracy theories)
- Writing style (professional vs. unprofessional)

News:
---
{text}
---

Return ONLY a JSON object with this exact structure:
{{
  "label": "<fake|real|uncertain>",
  "confidence": <a number between 0 and 1>,
  "reason": "<short explanation in English>"
}}
No extra commentary, no markdown."#
    )
}

fn explain_prompt(text: &str, primary: &PrimaryOutput, secondary: &SecondaryOutput) -> String {
    format!(
        r#"Analyze this news article:

--- NEWS TEXT ---
{text}
------------------

Model Results:
1. Primary model: {} ({:.4})
2. LLM: {} ({:.4}) - Reason: {}

Tasks:
1. State agreement/disagreement between models.
2. Explain suspicious/trustworthy elements.
3. Assess Risk Level (LOW/MEDIUM/HIGH).
4. Provide recommendations.

Format: English, Markdown (bullet points), No JSON."#,
        primary.label, primary.confidence, secondary.label, secondary.confidence, secondary.reason
    )
}

/// Canned explanation referencing only the primary result.
pub fn fallback_explanation(primary: &PrimaryOutput) -> String {
    format!(
        "## Automatic Analysis (Fallback)\n\n\
         - **Primary model**: {} ({:.2}%)\n\
         - **LLM analysis**: Not Available\n\n\
         **Recommendation:** Verify with reputable sources.",
        primary.label,
        primary.confidence * 100.0
    )
}

/// Written instead of an explanation when the LLM quota is exhausted.
pub fn quota_note(primary: &PrimaryOutput) -> String {
    format!(
        "## Automatic Analysis (Quota Exceeded)\n\n\
         - **Primary model**: {} ({:.2}%)\n\
         - **LLM analysis**: skipped, the provider rate limit or quota was exhausted\n\n\
         **Recommendation:** Verify with reputable sources.",
        primary.label,
        primary.confidence * 100.0
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmVerdict {
    pub label: Label,
    pub confidence: f64,
    pub reason: String,
}

/// Strip a surrounding ``` / ```json fence if present.
pub fn strip_code_fences(s: &str) -> &str {
    let t = s.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    // Drop the info string (e.g. "json") on the opening fence line.
    match rest.split_once('\n') {
        Some((first, body)) if !first.trim_start().starts_with('{') => body.trim(),
        _ => rest.trim(),
    }
}

/// Parse `{label, confidence, reason}`; unknown labels become UNCERTAIN and
/// confidence is clamped to [0, 1].
pub fn parse_llm_json(raw: &str) -> Result<LlmVerdict, ClassifierError> {
    let v: serde_json::Value = serde_json::from_str(strip_code_fences(raw))
        .map_err(|e| ClassifierError::Decode(e.to_string()))?;
    let obj = v
        .as_object()
        .ok_or_else(|| ClassifierError::Decode("expected a JSON object".into()))?;

    let label = match obj
        .get("label")
        .and_then(|l| l.as_str())
        .map(|l| l.trim().to_ascii_lowercase())
        .as_deref()
    {
        Some("fake") => Label::Fake,
        Some("real") => Label::Real,
        _ => Label::Uncertain,
    };
    let confidence = obj
        .get("confidence")
        .and_then(|c| match c {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .filter(|c: &f64| c.is_finite())
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    let reason = obj
        .get("reason")
        .and_then(|r| r.as_str())
        .unwrap_or_default()
        .to_string();

    Ok(LlmVerdict {
        label,
        confidence: (confidence * 10_000.0).round() / 10_000.0,
        reason,
    })
}

/// Single line, collapsed whitespace, at most 280 chars.
pub fn sanitize_reason(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(280));
    let mut prev_space = false;
    for ch in input.chars() {
        let c = if ch.is_whitespace() { ' ' } else { ch };
        if c == ' ' {
            if !prev_space && !out.is_empty() {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
        if out.chars().count() >= 280 {
            break;
        }
    }
    out.trim().to_string()
}
