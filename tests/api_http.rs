// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

mod common;

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use common::{config, harness, post, Harness};
use fakenews_pipeline::api;
use fakenews_pipeline::ingest::StaticSource;
use fakenews_pipeline::metrics::Metrics;
use fakenews_pipeline::model::Item;
use fakenews_pipeline::store::ItemStore;

const BODY_LIMIT: usize = 1024 * 1024;

fn test_harness() -> Harness {
    let now = Utc::now();
    let source = Arc::new(
        StaticSource::new()
            .with_historical("news", vec![post("n1", now, 5), post("n2", now, 10)])
            .with_historical("science", vec![post("s1", now, 7)]),
    );
    harness(config(&["news", "science"]), source)
}

fn router_for(h: &Harness) -> Router {
    api::router(h.rt.app_state())
}

async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, bytes)
}

async fn send_json(app: Router, method: &str, uri: &str) -> (StatusCode, Json) {
    let (status, bytes) = send(app, method, uri).await;
    let v = serde_json::from_slice(&bytes).expect("json body");
    (status, v)
}

#[tokio::test]
async fn health_returns_ok() {
    let h = test_harness();
    let (status, bytes) = send(router_for(&h), "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(bytes).unwrap(), "ok");
}

#[tokio::test]
async fn manual_run_returns_run_record_and_fills_store() {
    let h = test_harness();
    let (status, v) = send_json(router_for(&h), "POST", "/crawler/run").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "completed");
    assert_eq!(v["totals"]["inserted"], 3);
    assert_eq!(v["feeds"]["news"]["mode"], "backfill");
    assert_eq!(v["feeds"]["science"]["inserted"], 1);

    let (_, recent) = send_json(router_for(&h), "GET", "/posts/recent?feed=news&limit=10").await;
    let arr = recent.as_array().unwrap();
    assert_eq!(arr.len(), 2);
    assert_eq!(arr[0]["item_id"], "n1", "newest first");
    assert_eq!(arr[0]["label"], "REAL");

    let (_, real) = send_json(router_for(&h), "GET", "/posts/recent?label=real").await;
    assert_eq!(real.as_array().unwrap().len(), 3);
    let (_, fake) = send_json(router_for(&h), "GET", "/posts/recent?label=FAKE").await;
    assert!(fake.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn post_by_id_and_missing_post() {
    let h = test_harness();
    let item = Item::from_raw(post("x1", Utc::now(), 1), "news", Utc::now()).unwrap();
    h.store.insert_if_absent(&item).await.unwrap();

    let (status, v) = send_json(router_for(&h), "GET", "/posts/x1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["item_id"], "x1");
    assert_eq!(v["feed_name"], "news");
    assert!(v["prediction"].is_null());

    let (status, v) = send_json(router_for(&h), "GET", "/posts/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(v["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn bad_label_is_rejected() {
    let h = test_harness();
    let (status, _) = send_json(router_for(&h), "GET", "/posts/recent?label=maybe").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_start_stop_and_config() {
    let h = test_harness();

    let (_, st) = send_json(router_for(&h), "GET", "/crawler/status").await;
    assert_eq!(st["active"], false);
    assert_eq!(st["is_running"], false);
    assert_eq!(st["interval_minutes"], 30);

    let (_, started) = send_json(router_for(&h), "POST", "/crawler/start").await;
    assert_eq!(started["changed"], true);
    assert_eq!(started["status"]["active"], true);

    let (_, stopped) = send_json(router_for(&h), "POST", "/crawler/stop").await;
    assert_eq!(stopped["changed"], true);
    assert_eq!(stopped["status"]["active"], false);

    let (_, cfg) = send_json(router_for(&h), "GET", "/crawler/config").await;
    assert_eq!(cfg["feeds"], serde_json::json!(["news", "science"]));
    assert_eq!(cfg["enable_llm"], false);
}

#[tokio::test]
async fn stats_report_counts_watermarks_and_runs() {
    let h = test_harness();
    send(router_for(&h), "POST", "/crawler/run").await;

    let (status, v) = send_json(router_for(&h), "GET", "/crawler/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["total_items"], 3);
    assert_eq!(v["unpredicted"], 0);
    let real = v["by_label"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["label"] == "REAL")
        .unwrap();
    assert_eq!(real["count"], 3);
    assert_eq!(v["watermarks"].as_array().unwrap().len(), 2);
    assert_eq!(v["last_run"]["status"], "completed");
    assert_eq!(v["recent_runs"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn backlog_endpoint_classifies_unpredicted_items() {
    let h = test_harness();
    for id in ["b1", "b2"] {
        let item = Item::from_raw(post(id, Utc::now(), 3), "news", Utc::now()).unwrap();
        h.store.insert_if_absent(&item).await.unwrap();
    }

    let (status, v) = send_json(router_for(&h), "POST", "/prediction/backlog?limit=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "completed");
    assert_eq!(v["total"], 2);
    assert_eq!(v["succeeded"], 2);
    assert!(h.store.find_missing_prediction(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn metrics_route_renders() {
    let m = Metrics::detached();
    let (status, _) = send(m.router(), "GET", "/metrics").await;
    assert_eq!(status, StatusCode::OK);
}
