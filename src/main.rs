//! Fake news pipeline service entrypoint.
//! Boots the stores, classifiers and crawl scheduler, then serves the Axum router.

use anyhow::Context;
use fakenews_pipeline::{api, metrics::Metrics, Runtime};
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Enable local tracing in development only.
/// Activation requires BOTH:
///   - dev environment (debug build OR SHUTTLE_ENV in {local, development, dev})
///   - PIPELINE_DEV_LOG=1
fn enable_dev_tracing() {
    let dev_flag = std::env::var("PIPELINE_DEV_LOG")
        .ok()
        .is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(dev_flag && is_dev_env) {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ingest=info,classify=info,bootstrap=info,warn"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    // Initialize dev tracing early (no-op in production).
    enable_dev_tracing();

    let rt = Runtime::from_env()
        .await
        .context("bootstrapping pipeline runtime")?;

    let metrics = match Metrics::init(&rt.cfg) {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = %e, "prometheus recorder not installed; /metrics disabled");
            None
        }
    };

    if rt.cfg.enable_crawler {
        rt.scheduler.start();
    } else {
        tracing::info!(target: "bootstrap", "crawler disabled; use POST /crawler/run or /crawler/start");
    }

    if rt.cfg.crawl_on_start {
        let pipeline = rt.pipeline.clone();
        tokio::spawn(async move {
            let rec = pipeline.run_guarded().await;
            tracing::info!(target: "bootstrap", status = rec.status.as_str(), "startup crawl finished");
        });
    }

    let mut router = api::router(rt.app_state());
    if let Some(m) = &metrics {
        router = router.merge(m.router());
    }

    Ok(router.into())
}
