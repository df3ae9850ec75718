// src/analyze/mod.rs
//! Classification side of the pipeline: text preparation, the two classifier
//! clients, reconciliation and the per-item workflow.

pub mod ai_adapter;
pub mod backlog;
pub mod limiter;
pub mod primary;
pub mod reconcile;
pub mod text;
pub mod workflow;

// Re-export convenient types.
pub use crate::analyze::ai_adapter::{build_llm_from_config, DynLlm, LlmClassifier};
pub use crate::analyze::backlog::{BacklogPredictor, BacklogReport};
pub use crate::analyze::primary::{DynPrimary, HuggingFaceClassifier, MockPrimary, PrimaryClassifier};
pub use crate::analyze::reconcile::reconcile;
pub use crate::analyze::workflow::ClassificationWorkflow;

use std::sync::Arc;

use crate::config::HuggingFaceConfig;

/// Build the primary classifier. `CLASSIFIER_TEST_MODE=mock` yields a fixed REAL mock.
pub fn build_primary_from_config(cfg: &HuggingFaceConfig) -> anyhow::Result<DynPrimary> {
    if std::env::var("CLASSIFIER_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Ok(Arc::new(MockPrimary::fixed(crate::model::Label::Real, 0.75)));
    }
    if cfg.api_key.is_none() {
        tracing::warn!(target: "classify", "HUGGINGFACE_API_KEY is not set; every prediction will degrade to UNKNOWN");
    }
    Ok(Arc::new(HuggingFaceClassifier::new(cfg.clone())?))
}
