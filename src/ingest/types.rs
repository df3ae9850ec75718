// src/ingest/types.rs
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::SourceError;
use crate::model::RawItem;

/// Paginated feed fetcher, newest-first for `fetch_recent`.
#[async_trait]
pub trait SourceClient: Send + Sync {
    async fn fetch_recent(&self, feed: &str, limit: usize) -> Result<Vec<RawItem>, SourceError>;

    async fn fetch_historical(
        &self,
        feed: &str,
        months_back: u32,
        total_limit: usize,
    ) -> Result<Vec<RawItem>, SourceError>;

    fn name(&self) -> &'static str;
}

pub type DynSource = Arc<dyn SourceClient>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Recent,
    Historical,
}

#[derive(Debug, Clone, Default)]
struct FeedScript {
    recent: Vec<RawItem>,
    historical: Vec<RawItem>,
    fail: Option<String>,
}

/// In-process source serving prepared items. Records every call.
#[derive(Debug, Default)]
pub struct StaticSource {
    feeds: Mutex<HashMap<String, FeedScript>>,
    calls: Mutex<Vec<(String, FetchKind)>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recent(self, feed: &str, items: Vec<RawItem>) -> Self {
        self.set_recent(feed, items);
        self
    }

    pub fn with_historical(self, feed: &str, items: Vec<RawItem>) -> Self {
        self.set_historical(feed, items);
        self
    }

    /// Every fetch for `feed` fails with a permanent error.
    pub fn with_failure(self, feed: &str, message: &str) -> Self {
        self.script(feed, |s| s.fail = Some(message.to_string()));
        self
    }

    pub fn set_recent(&self, feed: &str, items: Vec<RawItem>) {
        self.script(feed, |s| s.recent = items);
    }

    pub fn set_historical(&self, feed: &str, items: Vec<RawItem>) {
        self.script(feed, |s| s.historical = items);
    }

    pub fn calls(&self) -> Vec<(String, FetchKind)> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn script(&self, feed: &str, f: impl FnOnce(&mut FeedScript)) {
        let mut feeds = self.feeds.lock().unwrap_or_else(|p| p.into_inner());
        f(feeds.entry(feed.to_string()).or_default());
    }

    fn serve(&self, feed: &str, kind: FetchKind, limit: usize) -> Result<Vec<RawItem>, SourceError> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((feed.to_string(), kind));
        let feeds = self.feeds.lock().unwrap_or_else(|p| p.into_inner());
        let Some(script) = feeds.get(feed) else {
            return Ok(Vec::new());
        };
        if let Some(msg) = &script.fail {
            return Err(SourceError::permanent(feed, msg));
        }
        let items = match kind {
            FetchKind::Recent => &script.recent,
            FetchKind::Historical => &script.historical,
        };
        Ok(items.iter().take(limit).cloned().collect())
    }
}

#[async_trait]
impl SourceClient for StaticSource {
    async fn fetch_recent(&self, feed: &str, limit: usize) -> Result<Vec<RawItem>, SourceError> {
        self.serve(feed, FetchKind::Recent, limit)
    }

    async fn fetch_historical(
        &self,
        feed: &str,
        _months_back: u32,
        total_limit: usize,
    ) -> Result<Vec<RawItem>, SourceError> {
        self.serve(feed, FetchKind::Historical, total_limit)
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
