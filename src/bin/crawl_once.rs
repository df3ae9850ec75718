//! Run exactly one crawl pass (or the prediction backlog) and print the result as JSON.
//!
//! Usage: `crawl-once [--backlog [LIMIT]]`. Logs go to stderr.

use anyhow::Context;
use fakenews_pipeline::model::RunStatus;
use fakenews_pipeline::Runtime;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_BACKLOG_LIMIT: usize = 100;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

enum Job {
    Crawl,
    Backlog(usize),
}

fn parse_args() -> anyhow::Result<Job> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => Ok(Job::Crawl),
        Some("--backlog") => {
            let limit = match args.get(1) {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("invalid backlog limit '{raw}'"))?,
                None => DEFAULT_BACKLOG_LIMIT,
            };
            Ok(Job::Backlog(limit))
        }
        Some(other) => anyhow::bail!("unknown argument '{other}'; usage: crawl-once [--backlog [LIMIT]]"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let job = parse_args()?;
    let rt = Runtime::from_env().await?;

    let (json, status) = match job {
        Job::Crawl => {
            let rec = rt.pipeline.run_guarded().await;
            (serde_json::to_string_pretty(&rec)?, rec.status)
        }
        Job::Backlog(limit) => {
            let rep = rt.backlog.run(limit).await;
            (serde_json::to_string_pretty(&rep)?, rep.status)
        }
    };
    println!("{json}");

    if status == RunStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}
