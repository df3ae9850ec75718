// src/store/mod.rs
//! Persistence contracts used by the crawl pipeline, the classification
//! workflow and the read-only HTTP layer.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::StoreError;
use crate::model::{Item, Label, Prediction};

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Filter for the reporting queries. `limit` is ignored by `count`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemQuery {
    pub feed: Option<String>,
    #[serde(default)]
    pub unpredicted_only: bool,
    pub label: Option<Label>,
    pub limit: usize,
}

impl ItemQuery {
    pub fn recent(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn feed(mut self, feed: impl Into<String>) -> Self {
        self.feed = Some(feed.into());
        self
    }

    pub fn label(mut self, label: Label) -> Self {
        self.label = Some(label);
        self
    }

    pub fn unpredicted(mut self) -> Self {
        self.unpredicted_only = true;
        self
    }

    /// In-process evaluation, shared by the memory store and tests.
    pub fn matches(&self, item: &Item) -> bool {
        if let Some(feed) = &self.feed {
            if &item.feed_name != feed {
                return false;
            }
        }
        if self.unpredicted_only && item.prediction.is_some() {
            return false;
        }
        if let Some(label) = self.label {
            match &item.prediction {
                Some(p) if p.label == label => {}
                _ => return false,
            }
        }
        true
    }
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Returns `false` when an item with the same id already exists.
    async fn insert_if_absent(&self, item: &Item) -> StoreResult<bool>;

    async fn find_by_id(&self, item_id: &str) -> StoreResult<Option<Item>>;

    /// Items without a prediction, newest first.
    async fn find_missing_prediction(&self, limit: usize) -> StoreResult<Vec<Item>>;

    /// Replaces the whole prediction. Returns `false` when no item matched.
    async fn update_prediction(&self, item_id: &str, prediction: &Prediction)
        -> StoreResult<bool>;

    /// Items matching `query`, newest `created_at` first.
    async fn find_recent(&self, query: &ItemQuery) -> StoreResult<Vec<Item>>;

    async fn count(&self, query: &ItemQuery) -> StoreResult<u64>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub feed_name: String,
    pub last_crawl_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn get(&self, feed_name: &str) -> StoreResult<Option<DateTime<Utc>>>;

    /// Upsert. A value older than the stored one never replaces it.
    async fn set(&self, feed_name: &str, last_crawl_time: DateTime<Utc>) -> StoreResult<()>;

    async fn list(&self) -> StoreResult<Vec<Watermark>>;
}

pub type DynItemStore = Arc<dyn ItemStore>;
pub type DynWatermarkStore = Arc<dyn WatermarkStore>;
