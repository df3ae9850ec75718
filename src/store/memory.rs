// src/store/memory.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::{ItemQuery, ItemStore, StoreResult, Watermark, WatermarkStore};
use crate::error::StoreError;
use crate::model::{Item, Prediction};

/// In-process store for local runs and tests. Implements both contracts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<String, Item>>,
    watermarks: RwLock<HashMap<String, Watermark>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `StoreError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    fn check(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store is offline".into()))
        } else {
            Ok(())
        }
    }
}

fn newest_first(mut items: Vec<Item>) -> Vec<Item> {
    items.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.item_id.cmp(&b.item_id))
    });
    items
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn insert_if_absent(&self, item: &Item) -> StoreResult<bool> {
        self.check()?;
        let mut items = self.items.write().await;
        if items.contains_key(&item.item_id) {
            return Ok(false);
        }
        items.insert(item.item_id.clone(), item.clone());
        Ok(true)
    }

    async fn find_by_id(&self, item_id: &str) -> StoreResult<Option<Item>> {
        self.check()?;
        Ok(self.items.read().await.get(item_id).cloned())
    }

    async fn find_missing_prediction(&self, limit: usize) -> StoreResult<Vec<Item>> {
        self.find_recent(&ItemQuery::recent(limit).unpredicted()).await
    }

    async fn update_prediction(
        &self,
        item_id: &str,
        prediction: &Prediction,
    ) -> StoreResult<bool> {
        self.check()?;
        let mut items = self.items.write().await;
        match items.get_mut(item_id) {
            Some(item) => {
                item.prediction = Some(prediction.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_recent(&self, query: &ItemQuery) -> StoreResult<Vec<Item>> {
        self.check()?;
        let items = self.items.read().await;
        let matched = items
            .values()
            .filter(|it| query.matches(it))
            .cloned()
            .collect::<Vec<_>>();
        let mut out = newest_first(matched);
        out.truncate(query.limit);
        Ok(out)
    }

    async fn count(&self, query: &ItemQuery) -> StoreResult<u64> {
        self.check()?;
        let items = self.items.read().await;
        Ok(items.values().filter(|it| query.matches(it)).count() as u64)
    }
}

#[async_trait]
impl WatermarkStore for MemoryStore {
    async fn get(&self, feed_name: &str) -> StoreResult<Option<DateTime<Utc>>> {
        self.check()?;
        Ok(self
            .watermarks
            .read()
            .await
            .get(feed_name)
            .map(|w| w.last_crawl_time))
    }

    async fn set(&self, feed_name: &str, last_crawl_time: DateTime<Utc>) -> StoreResult<()> {
        self.check()?;
        let now = Utc::now();
        let mut wms = self.watermarks.write().await;
        let entry = wms.entry(feed_name.to_string()).or_insert(Watermark {
            feed_name: feed_name.to_string(),
            last_crawl_time,
            updated_at: now,
        });
        entry.last_crawl_time = entry.last_crawl_time.max(last_crawl_time);
        entry.updated_at = now;
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<Watermark>> {
        self.check()?;
        let mut out = self
            .watermarks
            .read()
            .await
            .values()
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by(|a, b| a.feed_name.cmp(&b.feed_name));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ClassifierOutputs, Label, PrimaryOutput, PrimaryScores, RawItem, WORKFLOW_VERSION,
    };
    use chrono::Duration;

    fn item(id: &str, feed: &str, age_min: i64) -> Item {
        let raw = RawItem::new(id, format!("title {id}"), Utc::now() - Duration::minutes(age_min));
        Item::from_raw(raw, feed, Utc::now()).unwrap()
    }

    fn prediction(label: Label) -> Prediction {
        Prediction {
            label,
            confidence: 0.8,
            classifier_outputs: ClassifierOutputs {
                primary: PrimaryOutput {
                    label,
                    confidence: 0.8,
                    scores: PrimaryScores::default(),
                    model: "m".into(),
                    error: None,
                },
                secondary: None,
            },
            explanation: "x".into(),
            classified_at: Utc::now(),
            workflow_version: WORKFLOW_VERSION.into(),
        }
    }

    #[tokio::test]
    async fn insert_twice_keeps_one_record() {
        let store = MemoryStore::new();
        let it = item("a", "news", 1);
        assert!(store.insert_if_absent(&it).await.unwrap());
        assert!(!store.insert_if_absent(&it).await.unwrap());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn update_prediction_reports_match() {
        let store = MemoryStore::new();
        store.insert_if_absent(&item("a", "news", 1)).await.unwrap();
        assert!(store
            .update_prediction("a", &prediction(Label::Fake))
            .await
            .unwrap());
        assert!(!store
            .update_prediction("missing", &prediction(Label::Fake))
            .await
            .unwrap());
        let got = store.find_by_id("a").await.unwrap().unwrap();
        assert_eq!(got.prediction.unwrap().label, Label::Fake);
    }

    #[tokio::test]
    async fn queries_filter_and_order_newest_first() {
        let store = MemoryStore::new();
        store.insert_if_absent(&item("old", "news", 30)).await.unwrap();
        store.insert_if_absent(&item("new", "news", 1)).await.unwrap();
        store.insert_if_absent(&item("pol", "politics", 5)).await.unwrap();
        store
            .update_prediction("pol", &prediction(Label::Real))
            .await
            .unwrap();

        let recent = store.find_recent(&ItemQuery::recent(10)).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|i| i.item_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "pol", "old"]);

        let news = store
            .find_recent(&ItemQuery::recent(10).feed("news"))
            .await
            .unwrap();
        assert_eq!(news.len(), 2);

        let missing = store.find_missing_prediction(1).await.unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].item_id, "new");

        let real = ItemQuery::recent(0).label(Label::Real);
        assert_eq!(store.count(&real).await.unwrap(), 1);
        assert_eq!(store.count(&ItemQuery::default()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn watermark_never_moves_backwards() {
        let store = MemoryStore::new();
        let t1 = Utc::now();
        let t0 = t1 - Duration::hours(1);
        assert!(WatermarkStore::get(&store, "news").await.unwrap().is_none());
        store.set("news", t1).await.unwrap();
        store.set("news", t0).await.unwrap();
        assert_eq!(WatermarkStore::get(&store, "news").await.unwrap(), Some(t1));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let err = store.insert_if_absent(&item("a", "news", 1)).await.unwrap_err();
        assert!(err.is_unavailable());
    }
}
