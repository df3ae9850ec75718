// tests/pipeline_e2e.rs
//
// End-to-end crawl passes over a static source and the in-memory store.
//
// Covered:
// - first crawl backfills and counts malformed items as errors
// - incremental crawl keeps only items newer than the watermark
// - backfill window and cap are enforced
// - duplicates are counted, not re-inserted
// - watermarks only move forward across passes
// - one item failing classification leaves its neighbours untouched

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::{config, harness, post, post_at};
use fakenews_pipeline::ingest::types::FetchKind;
use fakenews_pipeline::ingest::StaticSource;
use fakenews_pipeline::ai_adapter::DisabledLlm;
use fakenews_pipeline::analyze::{MockPrimary, PrimaryClassifier};
use fakenews_pipeline::bootstrap::{Parts, Runtime};
use fakenews_pipeline::error::ClassifierError;
use fakenews_pipeline::model::{CrawlMode, Item, Label, PrimaryOutput, RawItem, RunStatus};
use fakenews_pipeline::store::MemoryStore;
use fakenews_pipeline::store::{ItemQuery, ItemStore, WatermarkStore};

#[tokio::test]
async fn first_crawl_backfills_and_skips_malformed_items() {
    let now = Utc::now();
    let raw: Vec<_> = (0..500)
        .map(|i| {
            let p = post(&format!("p{i:03}"), now, 10 + i as i64 * 60);
            if i % 25 == 0 {
                p.without_title()
            } else {
                p
            }
        })
        .collect();
    let source = Arc::new(StaticSource::new().with_historical("news", raw));
    let h = harness(config(&["news"]), source.clone());

    let before = Utc::now();
    let rec = h.rt.pipeline.run_pass().await;

    assert_eq!(rec.status, RunStatus::Completed);
    let news = &rec.feeds["news"];
    assert_eq!(news.mode, CrawlMode::Backfill);
    assert_eq!(news.fetched, 500);
    assert_eq!(news.inserted, 480);
    assert_eq!(news.errors, 20);
    assert_eq!(news.predicted, 480);
    assert!(news.watermark_advanced);
    assert_eq!(h.store.len().await, 480);
    assert_eq!(source.calls(), vec![("news".to_string(), FetchKind::Historical)]);

    let wm = h.store.get("news").await.unwrap().expect("watermark set");
    assert!(wm >= before && wm <= Utc::now());

    // Every stored item carries a prediction.
    assert!(h.store.find_missing_prediction(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn incremental_crawl_keeps_only_items_after_watermark() {
    let now = Utc::now();
    let t0 = now - Duration::hours(2);
    let mut recent = Vec::new();
    for i in 0..15 {
        recent.push(post_at(&format!("new{i}"), t0 + Duration::minutes(i + 1)));
    }
    // The boundary item sits exactly on the watermark and counts as stale.
    recent.push(post_at("edge", t0));
    for i in 0..84 {
        recent.push(post_at(&format!("old{i}"), t0 - Duration::minutes(i + 1)));
    }

    let source = Arc::new(StaticSource::new().with_recent("politics", recent));
    let h = harness(config(&["politics"]), source.clone());
    h.store.set("politics", t0).await.unwrap();

    let rec = h.rt.pipeline.run_pass().await;
    let s = &rec.feeds["politics"];
    assert_eq!(s.mode, CrawlMode::Incremental);
    assert_eq!(s.fetched, 100);
    assert_eq!(s.inserted, 15);
    assert_eq!(s.stale, 85);
    assert_eq!(s.errors, 0);
    assert_eq!(source.calls(), vec![("politics".to_string(), FetchKind::Recent)]);

    assert!(h.store.find_by_id("edge").await.unwrap().is_none());
    assert!(h.store.find_by_id("new14").await.unwrap().is_some());

    let wm = h.store.get("politics").await.unwrap().unwrap();
    assert!(wm > t0);
}

#[tokio::test]
async fn zero_new_items_still_advance_the_watermark() {
    let now = Utc::now();
    let t0 = now - Duration::minutes(30);
    let source = Arc::new(
        StaticSource::new().with_recent("science", vec![post_at("old", t0 - Duration::minutes(5))]),
    );
    let h = harness(config(&["science"]), source);
    h.store.set("science", t0).await.unwrap();

    let rec = h.rt.pipeline.run_pass().await;
    assert_eq!(rec.feeds["science"].inserted, 0);
    assert!(rec.feeds["science"].watermark_advanced);
    assert!(h.store.get("science").await.unwrap().unwrap() > t0);
}

#[tokio::test]
async fn backfill_respects_window_and_cap() {
    let now = Utc::now();
    let mut raw = Vec::new();
    for i in 0..30 {
        raw.push(post(&format!("ancient{i}"), now, 60 * 24 * 45 + i));
    }
    for i in 0..100 {
        raw.push(post(&format!("fresh{i}"), now, 60 + i));
    }
    let mut cfg = config(&["technology"]);
    cfg.initial_crawl_months = 1;
    cfg.initial_crawl_limit = 50;
    let source = Arc::new(StaticSource::new().with_historical("technology", raw));
    let h = harness(cfg, source);

    let rec = h.rt.pipeline.run_pass().await;
    let s = &rec.feeds["technology"];
    assert!(s.inserted <= 50);
    assert_eq!(s.inserted, 50);

    let cutoff = now - Duration::days(30);
    let stored = h.store.find_recent(&ItemQuery::recent(1_000)).await.unwrap();
    assert_eq!(stored.len(), 50);
    assert!(stored.iter().all(|it| it.created_at >= cutoff));
}

#[tokio::test]
async fn known_items_are_counted_as_duplicates() {
    let now = Utc::now();
    let source = Arc::new(StaticSource::new().with_historical(
        "news",
        vec![post("a", now, 5), post("b", now, 6), post("c", now, 7)],
    ));
    let h = harness(config(&["news"]), source);

    let existing = Item::from_raw(post("b", now, 6), "news", now).unwrap();
    assert!(h.store.insert_if_absent(&existing).await.unwrap());

    let rec = h.rt.pipeline.run_pass().await;
    let s = &rec.feeds["news"];
    assert_eq!(s.inserted, 2);
    assert_eq!(s.duplicates, 1);
    assert_eq!(s.predicted, 2);
    assert_eq!(h.store.len().await, 3);
    // The pre-existing item was not classified by this pass.
    assert!(h.store.find_by_id("b").await.unwrap().unwrap().prediction.is_none());
}

#[tokio::test]
async fn watermark_is_monotonic_across_passes() {
    let now = Utc::now();
    let source = Arc::new(StaticSource::new().with_historical("news", vec![post("a", now, 5)]));
    let h = harness(config(&["news"]), source.clone());

    h.rt.pipeline.run_pass().await;
    let w1 = h.store.get("news").await.unwrap().unwrap();

    source.set_recent("news", vec![post_at("b", Utc::now() + Duration::seconds(1))]);
    let rec = h.rt.pipeline.run_pass().await;
    let w2 = h.store.get("news").await.unwrap().unwrap();

    assert_eq!(rec.feeds["news"].mode, CrawlMode::Incremental);
    assert_eq!(rec.feeds["news"].inserted, 1);
    assert!(w2 >= w1);

    // A stale write never rewinds it.
    h.store.set("news", w1 - Duration::days(1)).await.unwrap();
    assert_eq!(h.store.get("news").await.unwrap().unwrap(), w2);
}

#[tokio::test]
async fn fake_predictions_are_counted() {
    let now = Utc::now();
    let source = Arc::new(
        StaticSource::new().with_historical("news", vec![post("a", now, 5), post("b", now, 6)]),
    );
    let h = common::harness_with(
        config(&["news"]),
        source,
        Arc::new(MockPrimary::fixed(Label::Fake, 0.93)),
        Arc::new(DisabledLlm),
    );

    let rec = h.rt.pipeline.run_pass().await;
    assert_eq!(rec.feeds["news"].fake_detected, 2);
    assert_eq!(rec.totals.fake_detected, 2);
    let a = h.store.find_by_id("a").await.unwrap().unwrap();
    let p = a.prediction.unwrap();
    assert_eq!(p.label, Label::Fake);
    assert_eq!(p.confidence, 0.93);
}

#[tokio::test]
async fn too_short_item_does_not_stop_the_rest_of_the_feed() {
    let now = Utc::now();
    let source = Arc::new(StaticSource::new().with_historical(
        "news",
        vec![
            post("a", now, 5),
            RawItem::new("b", "Hi", now - Duration::minutes(6)),
            post("c", now, 7),
        ],
    ));
    let h = harness(config(&["news"]), source);

    let rec = h.rt.pipeline.run_pass().await;
    let s = &rec.feeds["news"];
    assert_eq!(s.inserted, 3);
    assert_eq!(s.predicted, 2);
    assert_eq!(s.classify_failures, 1);
    assert!(s.watermark_advanced);

    for id in ["a", "c"] {
        let it = h.store.find_by_id(id).await.unwrap().unwrap();
        assert!(it.prediction.is_some(), "{id} should be classified");
    }
    let b = h.store.find_by_id("b").await.unwrap().unwrap();
    assert!(b.prediction.is_none());
}

/// Takes the item store offline while the second item is being classified.
struct OutageOnSecondCall {
    store: Arc<MemoryStore>,
    calls: AtomicUsize,
}

#[async_trait]
impl PrimaryClassifier for OutageOnSecondCall {
    async fn predict(&self, _text: &str) -> Result<PrimaryOutput, ClassifierError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.store.set_offline(n == 2);
        Ok(MockPrimary::output(Label::Real, 0.75))
    }

    fn model(&self) -> &str {
        "outage-primary"
    }
}

#[tokio::test]
async fn store_outage_during_one_prediction_spares_the_others() {
    let now = Utc::now();
    let store = Arc::new(MemoryStore::new());
    let primary = Arc::new(OutageOnSecondCall {
        store: store.clone(),
        calls: AtomicUsize::new(0),
    });
    let source = Arc::new(StaticSource::new().with_historical(
        "news",
        vec![post("a", now, 5), post("b", now, 6), post("c", now, 7)],
    ));
    let rt = Runtime::build(
        config(&["news"]),
        Parts {
            source,
            items: store.clone(),
            watermarks: store.clone(),
            primary: primary.clone(),
            llm: Arc::new(DisabledLlm),
        },
    );

    let rec = rt.pipeline.run_pass().await;
    let s = &rec.feeds["news"];
    assert_eq!(s.inserted, 3);
    assert_eq!(s.predicted, 2);
    assert_eq!(s.classify_failures, 1);
    assert_eq!(primary.calls.load(Ordering::SeqCst), 3);
    assert!(s.watermark_advanced);

    assert!(store.find_by_id("a").await.unwrap().unwrap().prediction.is_some());
    assert!(store.find_by_id("b").await.unwrap().unwrap().prediction.is_none());
    assert!(store.find_by_id("c").await.unwrap().unwrap().prediction.is_some());
}
