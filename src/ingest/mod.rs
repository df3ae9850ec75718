// src/ingest/mod.rs
pub mod pipeline;
pub mod providers;
pub mod scheduler;
pub mod types;

use chrono::{DateTime, Duration, Utc};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

use crate::model::RawItem;

pub use pipeline::CrawlPipeline;
pub use scheduler::{CrawlScheduler, SchedulerStatus};
pub use types::{DynSource, SourceClient, StaticSource};

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("crawl_runs_total", "Crawl passes by status.");
        describe_counter!("crawl_items_fetched_total", "Items returned by the source.");
        describe_counter!("crawl_items_inserted_total", "Items newly stored.");
        describe_counter!(
            "crawl_items_duplicate_total",
            "Items already present in the store."
        );
        describe_counter!(
            "crawl_items_stale_total",
            "Items at or before the watermark, or outside the backfill window."
        );
        describe_counter!(
            "crawl_item_errors_total",
            "Malformed items and per-item store failures."
        );
        describe_counter!("crawl_feed_errors_total", "Feeds abandoned during a pass.");
        describe_counter!("classify_predictions_total", "Stored predictions by label.");
        describe_counter!(
            "classify_failures_total",
            "Primary classifier calls that failed and degraded."
        );
        describe_counter!(
            "llm_rate_limit_waits_total",
            "LLM calls delayed by the client-side limiter."
        );
        describe_gauge!("crawl_last_run_ts", "Unix ts when the last crawl pass finished.");
        describe_histogram!("crawl_pass_duration_ms", "Crawl pass duration in milliseconds.");
    });
}

/// Normalize text: decode entities, strip tags, ASCII quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode (Reddit escapes &, <, > in titles)
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[a-z][^>]*>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    re_ws.replace_all(&out, " ").trim().to_string()
}

/// Keep items strictly newer than the watermark. Returns (kept, stale count).
/// Items without a timestamp pass through so validation can reject them.
pub fn filter_after_watermark(
    items: Vec<RawItem>,
    watermark: DateTime<Utc>,
) -> (Vec<RawItem>, u64) {
    let before = items.len();
    let kept: Vec<RawItem> = items
        .into_iter()
        .filter(|it| it.created_at.map_or(true, |t| t > watermark))
        .collect();
    let stale = (before - kept.len()) as u64;
    (kept, stale)
}

/// Start of the backfill window: `months_back` × 30 days before `now`.
pub fn backfill_cutoff(now: DateTime<Utc>, months_back: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(months_back) * 30)
}

/// Drop items older than the window and cap the rest. Returns (kept, dropped count).
/// Undated items are kept, like in `filter_after_watermark`.
pub fn bound_backfill(
    items: Vec<RawItem>,
    now: DateTime<Utc>,
    months_back: u32,
    cap: usize,
) -> (Vec<RawItem>, u64) {
    let cutoff = backfill_cutoff(now, months_back);
    let before = items.len();
    let mut kept: Vec<RawItem> = items
        .into_iter()
        .filter(|it| it.created_at.map_or(true, |t| t >= cutoff))
        .collect();
    kept.truncate(cap);
    let dropped = (before - kept.len()) as u64;
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: &str, age_min: i64, now: DateTime<Utc>) -> RawItem {
        RawItem::new(id, format!("title {id}"), now - Duration::minutes(age_min))
    }

    #[test]
    fn normalize_text_decodes_and_collapses() {
        let s = "  Hello,&nbsp;&nbsp; <b>world</b> &amp; “friends”!  ";
        assert_eq!(normalize_text(s), "Hello, world & \"friends\"!");
    }

    #[test]
    fn normalize_text_keeps_comparison_signs() {
        assert_eq!(normalize_text("GDP &lt; 2% &gt; forecast"), "GDP < 2% > forecast");
    }

    #[test]
    fn watermark_filter_is_strict() {
        let now = Utc::now();
        let wm = now - Duration::minutes(10);
        let items = vec![raw("new", 5, now), raw("at", 10, now), raw("old", 20, now)];
        let (kept, stale) = filter_after_watermark(items, wm);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "new");
        assert_eq!(stale, 2);
    }

    #[test]
    fn backfill_drops_old_and_caps() {
        let now = Utc::now();
        let day = 24 * 60;
        let items = vec![
            raw("a", day, now),
            raw("b", 2 * day, now),
            raw("c", 40 * day, now),
            raw("d", 3 * day, now),
        ];
        let (kept, dropped) = bound_backfill(items, now, 1, 2);
        let ids: Vec<_> = kept.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(dropped, 2);
    }
}
