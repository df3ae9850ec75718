// src/ingest/scheduler.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::ingest::pipeline::CrawlPipeline;
use crate::model::RunRecord;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SchedulerStatus {
    /// Timer task alive.
    pub active: bool,
    /// A pass is in flight (timer or manual).
    pub is_running: bool,
    pub next_run_time: Option<DateTime<Utc>>,
    pub interval_minutes: u64,
}

#[derive(Default)]
struct TimerState {
    handle: Option<JoinHandle<()>>,
    next_run: Option<DateTime<Utc>>,
}

/// Fixed-interval trigger for `CrawlPipeline::run_guarded`.
///
/// Ticks that land while a pass is still running are dropped by the
/// pipeline's guard, and missed ticks are skipped rather than bunched.
pub struct CrawlScheduler {
    pipeline: Arc<CrawlPipeline>,
    interval: Duration,
    state: Arc<Mutex<TimerState>>,
}

impl CrawlScheduler {
    pub fn new(pipeline: Arc<CrawlPipeline>, interval: Duration) -> Self {
        Self {
            pipeline,
            interval: interval.max(Duration::from_secs(1)),
            state: Arc::new(Mutex::new(TimerState::default())),
        }
    }

    /// Start the timer. `false` when it is already running.
    pub fn start(&self) -> bool {
        let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if st.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }

        let every = self.interval;
        let pipeline = Arc::clone(&self.pipeline);
        let state = Arc::clone(&self.state);
        st.next_run = Some(wall_after(every));

        st.handle = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                state.lock().unwrap_or_else(|p| p.into_inner()).next_run =
                    Some(wall_after(every));
                let rec = pipeline.run_guarded().await;
                tracing::info!(
                    target: "ingest",
                    status = rec.status.as_str(),
                    inserted = rec.totals.inserted,
                    "scheduled crawl tick"
                );
            }
        }));

        tracing::info!(target: "ingest", interval_secs = every.as_secs(), "crawl scheduler started");
        true
    }

    /// Stop the timer. An in-flight pass runs on its own task and finishes
    /// normally. `false` when the timer was not running.
    pub fn stop(&self) -> bool {
        let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
        st.next_run = None;
        match st.handle.take() {
            Some(h) if !h.is_finished() => {
                h.abort();
                tracing::info!(target: "ingest", "crawl scheduler stopped");
                true
            }
            _ => false,
        }
    }

    /// Manual trigger; shares the re-entry guard with the timer.
    pub async fn run_now(&self) -> RunRecord {
        tracing::info!(target: "ingest", "manual crawl requested");
        self.pipeline.run_guarded().await
    }

    pub fn status(&self) -> SchedulerStatus {
        let st = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let active = st.handle.as_ref().is_some_and(|h| !h.is_finished());
        SchedulerStatus {
            active,
            is_running: self.pipeline.is_running(),
            next_run_time: if active { st.next_run } else { None },
            interval_minutes: self.interval.as_secs() / 60,
        }
    }
}

impl Drop for CrawlScheduler {
    fn drop(&mut self) {
        if let Some(h) = self
            .state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .handle
            .take()
        {
            h.abort();
        }
    }
}

fn wall_after(d: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
}
