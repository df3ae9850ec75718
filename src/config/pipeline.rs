// src/config/pipeline.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{env_flag, env_nonempty, env_parse};

const ENV_PATH: &str = "PIPELINE_CONFIG_PATH";

/// Knobs for the crawl orchestrator and scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Feeds (subreddits) crawled in this order.
    pub feeds: Vec<String>,
    pub crawl_interval_minutes: u64,
    /// Items requested per feed on an incremental pass.
    pub posts_per_feed: usize,
    /// Backfill window for a feed without a watermark.
    pub initial_crawl_months: u32,
    /// Backfill item cap.
    pub initial_crawl_limit: usize,
    /// Secondary LLM classifier on/off.
    pub enable_llm: bool,
    /// Start the periodic scheduler at boot.
    pub enable_crawler: bool,
    /// Run one pass right after boot.
    pub crawl_on_start: bool,
    pub watermark_margin_minutes: i64,
    pub inter_feed_delay_ms: u64,
    /// Delay between classification calls; derived from `enable_llm` when unset.
    pub classify_delay_ms: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            feeds: ["news", "worldnews", "politics", "technology", "science"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            crawl_interval_minutes: 30,
            posts_per_feed: 100,
            initial_crawl_months: 5,
            initial_crawl_limit: 500,
            enable_llm: false,
            enable_crawler: true,
            crawl_on_start: false,
            watermark_margin_minutes: 5,
            inter_feed_delay_ms: 2_000,
            classify_delay_ms: None,
        }
    }
}

impl PipelineConfig {
    pub fn crawl_interval(&self) -> Duration {
        Duration::from_secs(self.crawl_interval_minutes.max(1) * 60)
    }

    pub fn inter_feed_delay(&self) -> Duration {
        Duration::from_millis(self.inter_feed_delay_ms)
    }

    /// 5 s per item with the LLM on, 100 ms with the primary model alone.
    pub fn classify_delay(&self) -> Duration {
        let ms = self
            .classify_delay_ms
            .unwrap_or(if self.enable_llm { 5_000 } else { 100 });
        Duration::from_millis(ms)
    }

    /// Zero delays, for tests and one-shot tooling.
    pub fn without_delays(mut self) -> Self {
        self.inter_feed_delay_ms = 0;
        self.classify_delay_ms = Some(0);
        self
    }

    /// Load from an explicit path. Supports TOML or JSON.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut cfg = parse_config(&content, ext.as_str())?;
        cfg.feeds = clean_list(cfg.feeds);
        Ok(cfg)
    }

    /// Load using env var + fallbacks, then apply env overrides:
    /// 1) $PIPELINE_CONFIG_PATH
    /// 2) config/pipeline.toml
    /// 3) config/pipeline.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Some(p) = env_nonempty(ENV_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let toml_p = PathBuf::from("config/pipeline.toml");
            let json_p = PathBuf::from("config/pipeline.json");
            if toml_p.exists() {
                Self::load_from(&toml_p)?
            } else if json_p.exists() {
                Self::load_from(&json_p)?
            } else {
                Self::default()
            }
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(raw) = env_nonempty("FEEDS") {
            self.feeds = parse_feed_list(&raw);
        }
        if let Some(v) = env_parse("CRAWL_INTERVAL_MINUTES") {
            self.crawl_interval_minutes = v;
        }
        if let Some(v) = env_parse("POSTS_PER_FEED") {
            self.posts_per_feed = v;
        }
        if let Some(v) = env_parse("INITIAL_CRAWL_MONTHS") {
            self.initial_crawl_months = v;
        }
        if let Some(v) = env_parse("INITIAL_CRAWL_LIMIT") {
            self.initial_crawl_limit = v;
        }
        if let Some(v) = env_flag("ENABLE_LLM_IN_BACKGROUND") {
            self.enable_llm = v;
        }
        if let Some(v) = env_flag("ENABLE_CRAWLER") {
            self.enable_crawler = v;
        }
        if let Some(v) = env_flag("CRAWL_ON_START") {
            self.crawl_on_start = v;
        }
        if let Some(v) = env_parse("WATERMARK_MARGIN_MINUTES") {
            self.watermark_margin_minutes = v;
        }
        if let Some(v) = env_parse("INTER_FEED_DELAY_MS") {
            self.inter_feed_delay_ms = v;
        }
        if let Some(v) = env_parse("CLASSIFY_DELAY_MS") {
            self.classify_delay_ms = Some(v);
        }
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<PipelineConfig> {
    if hint_ext == "json" {
        return serde_json::from_str(s).context("parsing pipeline config json");
    }
    match toml::from_str::<PipelineConfig>(s) {
        Ok(cfg) => Ok(cfg),
        Err(toml_err) => serde_json::from_str(s)
            .map_err(|_| anyhow!("unsupported pipeline config format: {toml_err}")),
    }
}

/// Accepts `news, politics` or a JSON array `["news","politics"]`.
pub fn parse_feed_list(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        if let Ok(v) = serde_json::from_str::<Vec<String>>(trimmed) {
            return clean_list(v);
        }
    }
    clean_list(trimmed.split(',').map(str::to_string).collect())
}

/// Trim, drop empties and duplicates; first occurrence wins, order kept.
pub fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim().trim_start_matches("r/").to_string();
        if !t.is_empty() && seen.insert(t.to_ascii_lowercase()) {
            out.push(t);
        }
    }
    out
}
