// src/bootstrap.rs
//! Wires configuration into concrete collaborators.

use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};

use crate::analyze::{
    build_llm_from_config, build_primary_from_config, BacklogPredictor, ClassificationWorkflow,
    DynLlm, DynPrimary,
};
use crate::api::AppState;
use crate::config::{HuggingFaceConfig, LlmConfig, PipelineConfig, RedditConfig};
use crate::history::History;
use crate::ingest::providers::RedditSource;
use crate::ingest::{CrawlPipeline, CrawlScheduler, DynSource};
use crate::store::{DynItemStore, DynWatermarkStore, MemoryStore, PgStore};

/// Everything the binaries need, built once.
pub struct Runtime {
    pub cfg: Arc<PipelineConfig>,
    pub items: DynItemStore,
    pub watermarks: DynWatermarkStore,
    pub workflow: Arc<ClassificationWorkflow>,
    pub pipeline: Arc<CrawlPipeline>,
    pub scheduler: Arc<CrawlScheduler>,
    pub backlog: Arc<BacklogPredictor>,
    pub history: Arc<History>,
}

/// Explicit collaborators; `Runtime::from_env` fills these from the environment.
pub struct Parts {
    pub source: DynSource,
    pub items: DynItemStore,
    pub watermarks: DynWatermarkStore,
    pub primary: DynPrimary,
    pub llm: DynLlm,
}

impl Runtime {
    /// Load config files and env, connect storage and build the clients.
    pub async fn from_env() -> anyhow::Result<Self> {
        let cfg = PipelineConfig::load_default().context("loading pipeline config")?;
        info!(
            target: "bootstrap",
            feeds = ?cfg.feeds,
            interval_min = cfg.crawl_interval_minutes,
            llm = cfg.enable_llm,
            crawler = cfg.enable_crawler,
            "pipeline config loaded"
        );

        let (items, watermarks) = open_stores().await?;

        let reddit = RedditConfig::from_env();
        let source: DynSource =
            Arc::new(RedditSource::from_config(reddit).context("building reddit client")?);

        let primary = build_primary_from_config(&HuggingFaceConfig::from_env())
            .context("building primary classifier")?;
        let llm_cfg = match crate::config::env_nonempty("LLM_CONFIG_PATH") {
            Some(path) => {
                let mut c = LlmConfig::load_from_file(&path).context("loading LLM_CONFIG_PATH")?;
                // The pipeline switch still gates the file's own flag.
                c.enabled &= cfg.enable_llm;
                c
            }
            None => LlmConfig::from_env(cfg.enable_llm),
        };
        // Safe diagnostics: no key material.
        info!(
            target: "bootstrap",
            enabled = llm_cfg.enabled,
            model = %llm_cfg.model,
            key_present = llm_cfg.api_key.is_some(),
            "llm config"
        );
        let llm = build_llm_from_config(&llm_cfg);
        if cfg.enable_llm && !llm.is_enabled() {
            warn!(target: "bootstrap", "LLM requested but unavailable; running primary-only");
        }

        Ok(Self::build(
            cfg,
            Parts {
                source,
                items,
                watermarks,
                primary,
                llm,
            },
        ))
    }

    /// Assemble the runtime from explicit parts (tests, one-off tools).
    pub fn build(cfg: PipelineConfig, parts: Parts) -> Self {
        let history = Arc::new(History::default());
        let workflow = Arc::new(ClassificationWorkflow::new(
            parts.items.clone(),
            parts.primary,
            parts.llm,
            cfg.classify_delay(),
        ));
        let pipeline = Arc::new(CrawlPipeline::new(
            cfg.clone(),
            parts.source,
            parts.items.clone(),
            parts.watermarks.clone(),
            workflow.clone(),
            history.clone(),
        ));
        let scheduler = Arc::new(CrawlScheduler::new(pipeline.clone(), cfg.crawl_interval()));
        let backlog = Arc::new(
            BacklogPredictor::new(parts.items.clone(), workflow.clone())
                .yielding_to(pipeline.clone()),
        );

        Self {
            cfg: Arc::new(cfg),
            items: parts.items,
            watermarks: parts.watermarks,
            workflow,
            pipeline,
            scheduler,
            backlog,
            history,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            scheduler: self.scheduler.clone(),
            backlog: self.backlog.clone(),
            items: self.items.clone(),
            watermarks: self.watermarks.clone(),
            history: self.history.clone(),
            config: self.cfg.clone(),
        }
    }
}

/// PostgreSQL when `DATABASE_URL` is set, else an in-process store.
pub async fn open_stores() -> anyhow::Result<(DynItemStore, DynWatermarkStore)> {
    match crate::config::env_nonempty("DATABASE_URL") {
        Some(url) => {
            let pg = Arc::new(
                PgStore::connect(&url)
                    .await
                    .context("connecting to DATABASE_URL")?,
            );
            info!(target: "bootstrap", "using postgres store");
            let items: DynItemStore = pg.clone();
            let watermarks: DynWatermarkStore = pg;
            Ok((items, watermarks))
        }
        None => {
            warn!(target: "bootstrap", "DATABASE_URL not set; items and watermarks live in memory only");
            let mem = Arc::new(MemoryStore::new());
            let items: DynItemStore = mem.clone();
            let watermarks: DynWatermarkStore = mem;
            Ok((items, watermarks))
        }
    }
}
