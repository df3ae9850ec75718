// src/model/run.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Skipped,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Skipped => "skipped",
            RunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlMode {
    /// No watermark yet: bounded historical window.
    Backfill,
    /// Recent items filtered against the watermark.
    Incremental,
}

/// Counters for one feed in one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedStats {
    pub mode: CrawlMode,
    pub fetched: u64,
    pub inserted: u64,
    pub duplicates: u64,
    /// At or before the watermark, or outside the backfill window.
    pub stale: u64,
    /// Malformed items and per-item store failures.
    pub errors: u64,
    pub predicted: u64,
    pub fake_detected: u64,
    pub classify_failures: u64,
    pub watermark_advanced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FeedStats {
    pub fn new(mode: CrawlMode) -> Self {
        Self {
            mode,
            fetched: 0,
            inserted: 0,
            duplicates: 0,
            stale: 0,
            errors: 0,
            predicted: 0,
            fake_detected: 0,
            classify_failures: 0,
            watermark_advanced: false,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub fetched: u64,
    pub inserted: u64,
    pub duplicates: u64,
    pub stale: u64,
    pub errors: u64,
    pub predicted: u64,
    pub fake_detected: u64,
    pub classify_failures: u64,
    pub failed_feeds: u64,
}

impl RunTotals {
    pub fn add(&mut self, s: &FeedStats) {
        self.fetched += s.fetched;
        self.inserted += s.inserted;
        self.duplicates += s.duplicates;
        self.stale += s.stale;
        self.errors += s.errors;
        self.predicted += s.predicted;
        self.fake_detected += s.fake_detected;
        self.classify_failures += s.classify_failures;
        if s.error.is_some() {
            self.failed_feeds += 1;
        }
    }
}

/// Outcome of one orchestrator pass, returned to the caller and kept in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub feeds: BTreeMap<String, FeedStats>,
    pub totals: RunTotals,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RunRecord {
    pub fn begin(started_at: DateTime<Utc>) -> Self {
        Self {
            status: RunStatus::Completed,
            started_at,
            finished_at: started_at,
            duration_ms: 0,
            feeds: BTreeMap::new(),
            totals: RunTotals::default(),
            error: None,
            reason: None,
        }
    }

    /// Returned when another pass already holds the guard.
    pub fn skipped(reason: &str) -> Self {
        let now = Utc::now();
        Self {
            status: RunStatus::Skipped,
            reason: Some(reason.to_string()),
            ..Self::begin(now)
        }
    }

    pub fn failed(started_at: DateTime<Utc>, error: impl ToString) -> Self {
        let mut rec = Self::begin(started_at);
        rec.status = RunStatus::Failed;
        rec.error = Some(error.to_string());
        rec.finish(Utc::now());
        rec
    }

    pub fn record_feed(&mut self, feed: &str, stats: FeedStats) {
        self.totals.add(&stats);
        self.feeds.insert(feed.to_string(), stats);
    }

    pub fn finish(&mut self, finished_at: DateTime<Utc>) {
        self.finished_at = finished_at;
        self.duration_ms = (finished_at - self.started_at).num_milliseconds().max(0) as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_sum_feeds_and_count_failed_ones() {
        let mut rec = RunRecord::begin(Utc::now());
        let mut a = FeedStats::new(CrawlMode::Backfill);
        a.fetched = 10;
        a.inserted = 8;
        a.errors = 2;
        let mut b = FeedStats::new(CrawlMode::Incremental);
        b.error = Some("boom".into());
        rec.record_feed("a", a);
        rec.record_feed("b", b);
        assert_eq!(rec.totals.fetched, 10);
        assert_eq!(rec.totals.inserted, 8);
        assert_eq!(rec.totals.errors, 2);
        assert_eq!(rec.totals.failed_feeds, 1);
    }

    #[test]
    fn skipped_record_serializes_status_and_reason() {
        let rec = RunRecord::skipped("already_running");
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["status"], "skipped");
        assert_eq!(v["reason"], "already_running");
        assert!(v.get("error").is_none());
    }
}
