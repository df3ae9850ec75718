// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod history;
pub mod metrics;
pub mod model;
pub mod store;

// Classification side: classifier clients, reconciliation, workflow, backlog
pub mod analyze;

// Crawl side: source clients, orchestrator, scheduler
pub mod ingest;

// ---- Re-exports for stable public API ----
pub use analyze::ai_adapter;
pub use crate::api::{router, AppState};
pub use crate::bootstrap::Runtime;
pub use crate::ingest::{CrawlPipeline, CrawlScheduler};
