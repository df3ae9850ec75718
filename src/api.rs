use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::analyze::BacklogPredictor;
use crate::config::PipelineConfig;
use crate::history::History;
use crate::ingest::{CrawlScheduler, SchedulerStatus};
use crate::model::{Item, Label, RunRecord};
use crate::store::{DynItemStore, DynWatermarkStore, ItemQuery, Watermark};

const DEFAULT_POSTS_LIMIT: usize = 50;
const MAX_POSTS_LIMIT: usize = 500;
const DEFAULT_BACKLOG_LIMIT: usize = 100;
const STATS_RUNS: usize = 10;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<CrawlScheduler>,
    pub backlog: Arc<BacklogPredictor>,
    pub items: DynItemStore,
    pub watermarks: DynWatermarkStore,
    pub history: Arc<History>,
    pub config: Arc<PipelineConfig>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/crawler/status", get(crawler_status))
        .route("/crawler/run", post(crawler_run))
        .route("/crawler/start", post(crawler_start))
        .route("/crawler/stop", post(crawler_stop))
        .route("/crawler/config", get(crawler_config))
        .route("/crawler/stats", get(crawler_stats))
        .route("/posts/recent", get(posts_recent))
        .route("/posts/{id}", get(post_by_id))
        .route("/prediction/backlog", post(prediction_backlog))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, msg: impl ToString) -> Response {
    (
        status,
        Json(ErrorBody {
            error: msg.to_string(),
        }),
    )
        .into_response()
}

async fn crawler_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}

async fn crawler_run(State(state): State<AppState>) -> Json<RunRecord> {
    Json(state.scheduler.run_now().await)
}

#[derive(Serialize)]
struct ToggleResp {
    changed: bool,
    status: SchedulerStatus,
}

async fn crawler_start(State(state): State<AppState>) -> Json<ToggleResp> {
    let changed = state.scheduler.start();
    Json(ToggleResp {
        changed,
        status: state.scheduler.status(),
    })
}

async fn crawler_stop(State(state): State<AppState>) -> Json<ToggleResp> {
    let changed = state.scheduler.stop();
    Json(ToggleResp {
        changed,
        status: state.scheduler.status(),
    })
}

async fn crawler_config(State(state): State<AppState>) -> Json<PipelineConfig> {
    Json(state.config.as_ref().clone())
}

#[derive(Serialize)]
struct LabelCount {
    label: Label,
    count: u64,
}

#[derive(Serialize)]
struct StatsResp {
    total_items: u64,
    unpredicted: u64,
    by_label: Vec<LabelCount>,
    watermarks: Vec<Watermark>,
    last_run: Option<RunRecord>,
    recent_runs: Vec<RunRecord>,
}

async fn crawler_stats(State(state): State<AppState>) -> Response {
    match build_stats(&state).await {
        Ok(s) => Json(s).into_response(),
        Err(e) => {
            tracing::warn!(target: "api", error = %e, "stats unavailable");
            error_response(StatusCode::SERVICE_UNAVAILABLE, e)
        }
    }
}

async fn build_stats(state: &AppState) -> Result<StatsResp, crate::error::StoreError> {
    let all = ItemQuery::recent(0);
    let total_items = state.items.count(&all).await?;
    let unpredicted = state.items.count(&all.clone().unpredicted()).await?;
    let mut by_label = Vec::with_capacity(Label::ALL.len());
    for label in Label::ALL {
        let count = state.items.count(&all.clone().label(label)).await?;
        by_label.push(LabelCount { label, count });
    }
    let watermarks = state.watermarks.list().await?;
    let recent_runs = state.history.snapshot_last_n(STATS_RUNS);
    Ok(StatsResp {
        total_items,
        unpredicted,
        by_label,
        watermarks,
        last_run: recent_runs.last().cloned(),
        recent_runs,
    })
}

#[derive(Deserialize)]
struct RecentParams {
    feed: Option<String>,
    limit: Option<usize>,
    #[serde(default)]
    unpredicted: bool,
    label: Option<String>,
}

#[derive(Serialize)]
struct PostView {
    item_id: String,
    feed_name: String,
    title: String,
    url: Option<String>,
    source_domain: Option<String>,
    created_at: DateTime<Utc>,
    label: Option<Label>,
    confidence: Option<f64>,
}

impl From<&Item> for PostView {
    fn from(it: &Item) -> Self {
        Self {
            item_id: it.item_id.clone(),
            feed_name: it.feed_name.clone(),
            title: it.title.clone(),
            url: it.url.clone(),
            source_domain: it.source_domain.clone(),
            created_at: it.created_at,
            label: it.prediction.as_ref().map(|p| p.label),
            confidence: it.prediction.as_ref().map(|p| p.confidence),
        }
    }
}

async fn posts_recent(State(state): State<AppState>, Query(p): Query<RecentParams>) -> Response {
    let limit = p
        .limit
        .unwrap_or(DEFAULT_POSTS_LIMIT)
        .clamp(1, MAX_POSTS_LIMIT);
    let mut q = ItemQuery::recent(limit);
    if let Some(feed) = p.feed.filter(|f| !f.trim().is_empty()) {
        q = q.feed(feed.trim());
    }
    if p.unpredicted {
        q = q.unpredicted();
    }
    if let Some(raw) = p.label {
        match raw.parse::<Label>() {
            Ok(l) => q = q.label(l),
            Err(_) => {
                return error_response(StatusCode::BAD_REQUEST, format!("unknown label '{raw}'"))
            }
        }
    }
    match state.items.find_recent(&q).await {
        Ok(items) => Json(items.iter().map(PostView::from).collect::<Vec<_>>()).into_response(),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e),
    }
}

async fn post_by_id(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.items.find_by_id(&id).await {
        Ok(Some(item)) => Json(item).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("post '{id}' not found")),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e),
    }
}

#[derive(Deserialize)]
struct BacklogParams {
    limit: Option<usize>,
}

async fn prediction_backlog(
    State(state): State<AppState>,
    Query(p): Query<BacklogParams>,
) -> Json<crate::analyze::BacklogReport> {
    let limit = p.limit.unwrap_or(DEFAULT_BACKLOG_LIMIT).max(1);
    Json(state.backlog.run(limit).await)
}
