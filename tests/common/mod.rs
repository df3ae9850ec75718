// tests/common/mod.rs
//
// Shared builders for integration tests: an offline pipeline over in-memory
// stores, a static source and deterministic classifiers.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use fakenews_pipeline::ai_adapter::{DisabledLlm, DynLlm};
use fakenews_pipeline::analyze::{DynPrimary, MockPrimary};
use fakenews_pipeline::bootstrap::{Parts, Runtime};
use fakenews_pipeline::config::PipelineConfig;
use fakenews_pipeline::ingest::DynSource;
use fakenews_pipeline::model::{Label, RawItem};
use fakenews_pipeline::store::MemoryStore;

pub fn config(feeds: &[&str]) -> PipelineConfig {
    PipelineConfig {
        feeds: feeds.iter().map(|f| f.to_string()).collect(),
        ..PipelineConfig::default()
    }
    .without_delays()
}

pub struct Harness {
    pub rt: Runtime,
    pub store: Arc<MemoryStore>,
}

pub fn harness(cfg: PipelineConfig, source: DynSource) -> Harness {
    harness_with(
        cfg,
        source,
        Arc::new(MockPrimary::fixed(Label::Real, 0.8)),
        Arc::new(DisabledLlm),
    )
}

pub fn harness_with(
    cfg: PipelineConfig,
    source: DynSource,
    primary: DynPrimary,
    llm: DynLlm,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let rt = Runtime::build(
        cfg,
        Parts {
            source,
            items: store.clone(),
            watermarks: store.clone(),
            primary,
            llm,
        },
    );
    Harness { rt, store }
}

/// A well-formed post `age_min` minutes older than `now`.
pub fn post(id: &str, now: DateTime<Utc>, age_min: i64) -> RawItem {
    RawItem::new(
        id,
        format!("Headline {id} about the regional election results"),
        now - Duration::minutes(age_min),
    )
}

/// Same, but `at` is absolute.
pub fn post_at(id: &str, at: DateTime<Utc>) -> RawItem {
    RawItem::new(id, format!("Headline {id} about the regional election results"), at)
}
