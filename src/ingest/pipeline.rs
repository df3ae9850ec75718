// src/ingest/pipeline.rs
//! The crawl orchestrator: one pass over every configured feed.
//!
//! Per feed: pick backfill or incremental mode from the watermark, fetch,
//! drop stale items, insert-if-absent, classify what was inserted, then move
//! the watermark to "now". Failures stay inside the item or feed they hit.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::analyze::workflow::ClassificationWorkflow;
use crate::config::PipelineConfig;
use crate::error::FeedError;
use crate::history::History;
use crate::ingest::types::DynSource;
use crate::ingest::{bound_backfill, ensure_metrics_described, filter_after_watermark};
use crate::model::{CrawlMode, FeedStats, Item, Label, RawItem, RunRecord, RunStatus};
use crate::store::{DynItemStore, DynWatermarkStore};

/// Scope guard over a single-slot flag. Released on drop, including unwinding.
pub struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    /// `None` when the flag is already held.
    pub fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

pub struct CrawlPipeline {
    cfg: PipelineConfig,
    source: DynSource,
    items: DynItemStore,
    watermarks: DynWatermarkStore,
    workflow: Arc<ClassificationWorkflow>,
    history: Arc<History>,
    running: AtomicBool,
}

impl CrawlPipeline {
    pub fn new(
        cfg: PipelineConfig,
        source: DynSource,
        items: DynItemStore,
        watermarks: DynWatermarkStore,
        workflow: Arc<ClassificationWorkflow>,
        history: Arc<History>,
    ) -> Self {
        ensure_metrics_described();
        Self {
            cfg,
            source,
            items,
            watermarks,
            workflow,
            history,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one pass on its own task so a panic becomes a `failed` record
    /// instead of taking the caller down. Shared by the timer and manual trigger.
    pub async fn run_guarded(self: &Arc<Self>) -> RunRecord {
        let started_at = Utc::now();
        let this = Arc::clone(self);
        match tokio::spawn(async move { this.run_pass().await }).await {
            Ok(rec) => rec,
            Err(join_err) => {
                let msg = if join_err.is_panic() {
                    "crawl pass panicked".to_string()
                } else {
                    format!("crawl pass aborted: {join_err}")
                };
                error!(target: "ingest", error = %msg, "crawl pass did not finish");
                counter!("crawl_runs_total", "status" => RunStatus::Failed.as_str()).increment(1);
                let rec = RunRecord::failed(started_at, msg);
                self.history.push(rec.clone());
                rec
            }
        }
    }

    /// One pass over all feeds. Returns `skipped` if another pass holds the guard.
    pub async fn run_pass(&self) -> RunRecord {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            info!(target: "ingest", "crawl pass already running, skipping");
            counter!("crawl_runs_total", "status" => RunStatus::Skipped.as_str()).increment(1);
            let rec = RunRecord::skipped("already_running");
            self.history.push(rec.clone());
            return rec;
        };

        let t0 = std::time::Instant::now();
        let mut rec = RunRecord::begin(Utc::now());
        info!(target: "ingest", feeds = self.cfg.feeds.len(), "crawl pass started");

        for (i, feed) in self.cfg.feeds.iter().enumerate() {
            if i > 0 && !self.cfg.inter_feed_delay().is_zero() {
                tokio::time::sleep(self.cfg.inter_feed_delay()).await;
            }
            let stats = self.crawl_feed(feed).await;
            rec.record_feed(feed, stats);
        }

        rec.finish(Utc::now());
        counter!("crawl_runs_total", "status" => rec.status.as_str()).increment(1);
        gauge!("crawl_last_run_ts").set(rec.finished_at.timestamp() as f64);
        histogram!("crawl_pass_duration_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        info!(
            target: "ingest",
            fetched = rec.totals.fetched,
            inserted = rec.totals.inserted,
            duplicates = rec.totals.duplicates,
            stale = rec.totals.stale,
            errors = rec.totals.errors,
            predicted = rec.totals.predicted,
            fake_detected = rec.totals.fake_detected,
            failed_feeds = rec.totals.failed_feeds,
            duration_ms = rec.duration_ms,
            "crawl pass finished"
        );
        self.history.push(rec.clone());
        rec
    }

    /// Crawl one feed. Never fails outward; problems end up in the stats.
    pub async fn crawl_feed(&self, feed: &str) -> FeedStats {
        let watermark = match self.watermarks.get(feed).await {
            Ok(w) => w,
            Err(e) => {
                let mut stats = FeedStats::new(CrawlMode::Incremental);
                self.fail_feed(feed, &mut stats, &FeedError::Store(e));
                return stats;
            }
        };
        let mode = if watermark.is_some() {
            CrawlMode::Incremental
        } else {
            CrawlMode::Backfill
        };
        let mut stats = FeedStats::new(mode);

        match self.ingest_feed(feed, watermark, &mut stats).await {
            Ok(()) => {
                let now = Utc::now();
                match self.watermarks.set(feed, now).await {
                    Ok(()) => stats.watermark_advanced = true,
                    Err(e) => {
                        warn!(target: "ingest", feed, error = %e, "watermark write failed; window will be re-crawled")
                    }
                }
            }
            Err(e) => self.fail_feed(feed, &mut stats, &e),
        }

        counter!("crawl_items_fetched_total").increment(stats.fetched);
        counter!("crawl_items_inserted_total").increment(stats.inserted);
        counter!("crawl_items_duplicate_total").increment(stats.duplicates);
        counter!("crawl_items_stale_total").increment(stats.stale);
        counter!("crawl_item_errors_total").increment(stats.errors);
        info!(
            target: "ingest",
            feed,
            mode = ?stats.mode,
            fetched = stats.fetched,
            inserted = stats.inserted,
            duplicates = stats.duplicates,
            stale = stats.stale,
            errors = stats.errors,
            predicted = stats.predicted,
            fake_detected = stats.fake_detected,
            "feed crawled"
        );
        stats
    }

    fn fail_feed(&self, feed: &str, stats: &mut FeedStats, e: &FeedError) {
        error!(target: "ingest", feed, error = %e, "feed abandoned for this pass");
        counter!("crawl_feed_errors_total").increment(1);
        stats.error = Some(e.to_string());
    }

    async fn fetch(
        &self,
        feed: &str,
        watermark: Option<DateTime<Utc>>,
        stats: &mut FeedStats,
    ) -> Result<Vec<RawItem>, FeedError> {
        let now = Utc::now();
        match watermark {
            None => {
                let months = self.cfg.initial_crawl_months;
                let cap = self.cfg.initial_crawl_limit;
                info!(target: "ingest", feed, months, cap, "no watermark, backfilling");
                let raw = self.source.fetch_historical(feed, months, cap).await?;
                stats.fetched = raw.len() as u64;
                let (kept, dropped) = bound_backfill(raw, now, months, cap);
                stats.stale += dropped;
                Ok(kept)
            }
            Some(wm) => {
                // The margin widens the logged lookback only; the strict
                // watermark comparison below decides what is new.
                let lookback_min =
                    (now - wm).num_minutes().max(0) + self.cfg.watermark_margin_minutes;
                info!(target: "ingest", feed, watermark = %wm, lookback_min, "incremental crawl");
                let raw = self
                    .source
                    .fetch_recent(feed, self.cfg.posts_per_feed)
                    .await?;
                stats.fetched = raw.len() as u64;
                let (kept, stale) = filter_after_watermark(raw, wm);
                stats.stale += stale;
                Ok(kept)
            }
        }
    }

    async fn ingest_feed(
        &self,
        feed: &str,
        watermark: Option<DateTime<Utc>>,
        stats: &mut FeedStats,
    ) -> Result<(), FeedError> {
        let candidates = self.fetch(feed, watermark, stats).await?;

        let mut inserted: Vec<Item> = Vec::new();
        for raw in candidates {
            let item = match Item::from_raw(raw, feed, Utc::now()) {
                Ok(it) => it,
                Err(e) => {
                    stats.errors += 1;
                    debug!(target: "ingest", feed, error = %e, "skipping malformed item");
                    continue;
                }
            };
            match self.items.insert_if_absent(&item).await {
                Ok(true) => {
                    stats.inserted += 1;
                    inserted.push(item);
                }
                Ok(false) => stats.duplicates += 1,
                Err(e) if e.is_unavailable() => return Err(FeedError::Store(e)),
                Err(e) => {
                    stats.errors += 1;
                    warn!(target: "ingest", feed, item_id = %item.item_id, error = %e, "insert failed");
                }
            }
        }

        for item in &inserted {
            match self.workflow.classify(item).await {
                Ok(p) => {
                    stats.predicted += 1;
                    if p.label == Label::Fake {
                        stats.fake_detected += 1;
                    }
                }
                Err(e) => {
                    stats.classify_failures += 1;
                    warn!(target: "ingest", feed, item_id = %item.item_id, error = %e, "classification failed");
                }
            }
        }
        Ok(())
    }
}
