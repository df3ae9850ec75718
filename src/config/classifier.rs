// src/config/classifier.rs
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use super::{env_nonempty, env_parse};

fn default_hf_model() -> String {
    "hamzab/roberta-fake-news-classification".to_string()
}
fn default_hf_base_url() -> String {
    "https://router.huggingface.co/models".to_string()
}
fn default_llm_model() -> String {
    "deepseek-chat".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.deepseek.com/v1".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_rate_limit_max() -> usize {
    60
}
fn default_rate_limit_window_secs() -> u64 {
    60
}
fn default_backoff_base_ms() -> u64 {
    1_000
}

/// Resolve `"ENV"` placeholders from the named variables (first hit wins).
fn resolve_key(value: Option<String>, env_keys: &[&str]) -> Result<Option<String>> {
    match value {
        Some(v) if v.trim().eq_ignore_ascii_case("env") => {
            for k in env_keys {
                if let Some(found) = env_nonempty(k) {
                    return Ok(Some(found));
                }
            }
            bail!("api_key is \"ENV\" but none of {env_keys:?} is set")
        }
        Some(v) if v.trim().is_empty() => Ok(None),
        other => Ok(other),
    }
}

/// Primary classifier (HuggingFace Inference API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HuggingFaceConfig {
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_hf_model")]
    pub model: String,
    #[serde(default = "default_hf_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Upper bound for the advertised model-loading wait.
    #[serde(default = "default_loading_wait_cap_secs")]
    pub loading_wait_cap_secs: u64,
}

fn default_loading_wait_cap_secs() -> u64 {
    30
}

impl Default for HuggingFaceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_hf_model(),
            base_url: default_hf_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            loading_wait_cap_secs: default_loading_wait_cap_secs(),
        }
    }
}

impl HuggingFaceConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.api_key = env_nonempty("HUGGINGFACE_API_KEY");
        if let Some(m) = env_nonempty("HUGGINGFACE_MODEL") {
            cfg.model = m;
        }
        if let Some(u) = env_nonempty("HUGGINGFACE_API_BASE_URL") {
            cfg.base_url = u;
        }
        if let Some(t) = env_parse("HUGGINGFACE_TIMEOUT_SECS") {
            cfg.timeout_secs = t;
        }
        cfg
    }

    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.model)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Secondary classifier (OpenAI-compatible chat completions, e.g. DeepSeek).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub enabled: bool,
    /// `"ENV"` means: read from LLM_API_KEY / DEEPSEEK_API_KEY.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: usize,
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            model: default_llm_model(),
            base_url: default_llm_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            rate_limit_max: default_rate_limit_max(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

impl LlmConfig {
    /// Env-driven config; `enabled` comes from the pipeline switch.
    pub fn from_env(enabled: bool) -> Self {
        let mut cfg = Self {
            enabled,
            ..Self::default()
        };
        cfg.api_key = env_nonempty("LLM_API_KEY").or_else(|| env_nonempty("DEEPSEEK_API_KEY"));
        if let Some(m) = env_nonempty("LLM_MODEL") {
            cfg.model = m;
        }
        if let Some(u) = env_nonempty("LLM_BASE_URL") {
            cfg.base_url = u;
        }
        if let Some(v) = env_parse("LLM_TIMEOUT_SECS") {
            cfg.timeout_secs = v;
        }
        if let Some(v) = env_parse("LLM_RATE_LIMIT_MAX") {
            cfg.rate_limit_max = v;
        }
        if let Some(v) = env_parse("LLM_RATE_LIMIT_WINDOW_SECS") {
            cfg.rate_limit_window_secs = v;
        }
        cfg
    }

    /// Load from a JSON file, resolving an `"ENV"` api key.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading llm config from {}", path.display()))?;
        let mut cfg: LlmConfig = serde_json::from_str(&data)?;
        cfg.api_key = resolve_key(cfg.api_key, &["LLM_API_KEY", "DEEPSEEK_API_KEY"])?;

        // Sanitize limiter bounds
        if cfg.rate_limit_max == 0 {
            cfg.rate_limit_max = default_rate_limit_max();
        }
        if cfg.rate_limit_window_secs == 0 {
            cfg.rate_limit_window_secs = default_rate_limit_window_secs();
        }
        Ok(cfg)
    }

    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}
