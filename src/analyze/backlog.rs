// src/analyze/backlog.rs
//! Batch prediction for stored items that never got one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::analyze::workflow::ClassificationWorkflow;
use crate::ingest::pipeline::{CrawlPipeline, RunGuard};
use crate::model::RunStatus;
use crate::store::DynItemStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogReport {
    pub status: RunStatus,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BacklogReport {
    fn empty(status: RunStatus, started_at: DateTime<Utc>) -> Self {
        Self {
            status,
            total: 0,
            succeeded: 0,
            failed: 0,
            started_at,
            finished_at: Utc::now(),
            error: None,
        }
    }
}

pub struct BacklogPredictor {
    items: DynItemStore,
    workflow: Arc<ClassificationWorkflow>,
    /// Crawl whose freshly inserted items must not be picked up twice.
    crawl: Option<Arc<CrawlPipeline>>,
    running: AtomicBool,
}

impl BacklogPredictor {
    pub fn new(items: DynItemStore, workflow: Arc<ClassificationWorkflow>) -> Self {
        Self {
            items,
            workflow,
            crawl: None,
            running: AtomicBool::new(false),
        }
    }

    /// Skip runs while `pipeline` is mid-pass; it classifies what it inserts.
    pub fn yielding_to(mut self, pipeline: Arc<CrawlPipeline>) -> Self {
        self.crawl = Some(pipeline);
        self
    }

    fn crawl_in_flight(&self) -> bool {
        self.crawl.as_ref().is_some_and(|p| p.is_running())
    }

    fn skipped(started_at: DateTime<Utc>, reason: &str) -> BacklogReport {
        let mut rep = BacklogReport::empty(RunStatus::Skipped, started_at);
        rep.error = Some(reason.to_string());
        rep
    }

    /// Classify up to `limit` unpredicted items, newest first, one at a time.
    pub async fn run(&self, limit: usize) -> BacklogReport {
        let started_at = Utc::now();
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            info!(target: "backlog", "backlog already running, skipping");
            return Self::skipped(started_at, "already_running");
        };
        if self.crawl_in_flight() {
            info!(target: "backlog", "crawl pass in progress, skipping backlog");
            return Self::skipped(started_at, "crawl_running");
        }

        let pending = match self.items.find_missing_prediction(limit).await {
            Ok(v) => v,
            Err(e) => {
                warn!(target: "backlog", error = %e, "could not list unpredicted items");
                let mut rep = BacklogReport::empty(RunStatus::Failed, started_at);
                rep.error = Some(e.to_string());
                return rep;
            }
        };

        // A pass may have started while listing; its new items are its own.
        if self.crawl_in_flight() {
            info!(target: "backlog", "crawl pass started meanwhile, skipping backlog");
            return Self::skipped(started_at, "crawl_running");
        }

        let mut rep = BacklogReport::empty(RunStatus::Completed, started_at);
        rep.total = pending.len() as u64;
        info!(target: "backlog", total = rep.total, "prediction backlog started");

        for item in &pending {
            match self.workflow.classify(item).await {
                Ok(_) => rep.succeeded += 1,
                Err(e) => {
                    rep.failed += 1;
                    warn!(target: "backlog", item_id = %item.item_id, error = %e, "backlog item failed");
                }
            }
        }

        rep.finished_at = Utc::now();
        info!(
            target: "backlog",
            total = rep.total,
            succeeded = rep.succeeded,
            failed = rep.failed,
            "prediction backlog finished"
        );
        rep
    }

    pub fn is_running(&self) -> bool {
        self.running.load(std::sync::atomic::Ordering::SeqCst)
    }
}
