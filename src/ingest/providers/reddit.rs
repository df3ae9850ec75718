use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::analyze::limiter::RetryPolicy;
use crate::config::RedditConfig;
use crate::error::SourceError;
use crate::ingest::backfill_cutoff;
use crate::ingest::types::SourceClient;
use crate::model::{Engagement, RawItem};

const PAGE_SIZE: usize = 100;
const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const OAUTH_BASE: &str = "https://oauth.reddit.com";
const PUBLIC_BASE: &str = "https://www.reddit.com";

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    after: Option<String>,
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: Option<String>,
    title: Option<String>,
    #[serde(default)]
    selftext: String,
    url: Option<String>,
    domain: Option<String>,
    permalink: Option<String>,
    author: Option<String>,
    created_utc: Option<f64>,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: i64,
    #[serde(default)]
    upvote_ratio: f64,
    #[serde(default)]
    over_18: bool,
    #[serde(default)]
    is_self: bool,
}

impl Post {
    /// Missing id or timestamp is left for `Item::from_raw` to reject and count.
    fn into_raw(self) -> RawItem {
        let created_at = self.created_utc.and_then(|secs| {
            DateTime::<Utc>::from_timestamp(secs.trunc() as i64, (secs.fract() * 1e9) as u32)
        });
        RawItem {
            id: self.id.unwrap_or_default(),
            title: self.title.filter(|t| !t.trim().is_empty()),
            body: self.selftext,
            url: self.url,
            domain: self.domain,
            permalink: self
                .permalink
                .map(|p| format!("https://www.reddit.com{p}")),
            author: self.author,
            created_at,
            engagement: Engagement {
                score: self.score,
                num_comments: self.num_comments,
                upvote_ratio: self.upvote_ratio,
            },
            over_18: self.over_18,
            is_self: self.is_self,
        }
    }
}

struct Page {
    items: Vec<RawItem>,
    after: Option<String>,
}

fn parse_listing(feed: &str, body: &str) -> Result<Page, SourceError> {
    let t0 = Instant::now();
    let listing: Listing =
        serde_json::from_str(body).map_err(|e| SourceError::decode(feed, e))?;
    let items: Vec<RawItem> = listing
        .data
        .children
        .into_iter()
        .map(|c| c.data.into_raw())
        .collect();
    let undated = items.iter().filter(|it| it.created_at.is_none()).count();
    if undated > 0 {
        debug!(target: "ingest", feed, undated, "listing entries without timestamp");
    }
    histogram!("reddit_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(Page {
        items,
        after: listing.data.after.filter(|a| !a.is_empty()),
    })
}

/// Reddit listings client. A feed is a subreddit name.
pub struct RedditSource {
    mode: Mode,
}

enum Mode {
    /// Listing JSON served for every request (offline tests).
    Fixture(String),
    Http {
        client: reqwest::Client,
        cfg: RedditConfig,
        token: Mutex<Option<(String, Instant)>>,
    },
}

impl RedditSource {
    pub fn from_fixture_str(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
        }
    }

    pub fn from_config(cfg: RedditConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .connect_timeout(Duration::from_secs(10))
            .timeout(cfg.timeout())
            .build()
            .map_err(|e| SourceError::permanent("*", e))?;
        Ok(Self {
            mode: Mode::Http {
                client,
                cfg,
                token: Mutex::new(None),
            },
        })
    }

    /// Collect up to `limit` items across pages, keeping those accepted by `keep`.
    /// Transient failures after retries end paging and return what was collected.
    async fn collect(
        &self,
        feed: &str,
        path: &str,
        query: &[(&str, &str)],
        limit: usize,
        keep: impl Fn(&RawItem) -> bool + Send + Sync,
    ) -> Result<Vec<RawItem>, SourceError> {
        let mut out = Vec::with_capacity(limit.min(1_000));
        match &self.mode {
            Mode::Fixture(body) => {
                let page = parse_listing(feed, body)?;
                out.extend(page.items.into_iter().filter(|it| keep(it)).take(limit));
            }
            Mode::Http { cfg, .. } => {
                let mut after: Option<String> = None;
                while out.len() < limit {
                    let page = match self.get_page(feed, path, query, after.as_deref()).await {
                        Ok(p) => p,
                        Err(e) if e.is_transient() => {
                            warn!(target: "ingest", feed, collected = out.len(), error = %e, "giving up on listing, keeping partial result");
                            counter!("reddit_degraded_fetches_total").increment(1);
                            break;
                        }
                        Err(e) => return Err(e),
                    };
                    let n = page.items.len();
                    for it in page.items {
                        if out.len() >= limit {
                            break;
                        }
                        if keep(&it) {
                            out.push(it);
                        }
                    }
                    after = page.after;
                    if n == 0 || after.is_none() {
                        break;
                    }
                    tokio::time::sleep(cfg.page_delay()).await;
                }
            }
        }
        Ok(out)
    }

    async fn get_page(
        &self,
        feed: &str,
        path: &str,
        query: &[(&str, &str)],
        after: Option<&str>,
    ) -> Result<Page, SourceError> {
        let Mode::Http { client, cfg, .. } = &self.mode else {
            return Err(SourceError::permanent(feed, "not an http source"));
        };
        let retry = RetryPolicy::new(cfg.max_attempts, Duration::from_millis(500));
        let mut attempt = 0;
        loop {
            match self.request_page(client, cfg, feed, path, query, after).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() && retry.has_attempts_left(attempt) => {
                    warn!(target: "ingest", feed, attempt = attempt + 1, error = %e, "listing request failed, retrying");
                    retry.wait(attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn request_page(
        &self,
        client: &reqwest::Client,
        cfg: &RedditConfig,
        feed: &str,
        path: &str,
        query: &[(&str, &str)],
        after: Option<&str>,
    ) -> Result<Page, SourceError> {
        let limit = PAGE_SIZE.to_string();
        let mut params: Vec<(&str, &str)> = query.to_vec();
        params.push(("limit", limit.as_str()));
        params.push(("raw_json", "1"));
        if let Some(a) = after {
            params.push(("after", a));
        }

        let req = match self.bearer(client, cfg, feed).await? {
            Some(token) => client
                .get(format!("{OAUTH_BASE}/r/{feed}/{path}"))
                .bearer_auth(token),
            None => client.get(format!("{PUBLIC_BASE}/r/{feed}/{path}.json")),
        };

        let resp = req.query(&params).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                SourceError::transient(feed, e)
            } else {
                SourceError::transient(feed, format!("request failed: {e}"))
            }
        })?;

        let status = resp.status().as_u16();
        match status {
            200 => {}
            401 | 403 | 404 => {
                counter!("reddit_permanent_errors_total").increment(1);
                return Err(SourceError::permanent(feed, format!("reddit responded {status}")));
            }
            429 | 500..=599 => {
                return Err(SourceError::transient(feed, format!("reddit responded {status}")));
            }
            other => {
                return Err(SourceError::permanent(feed, format!("unexpected status {other}")));
            }
        }
        let body = resp
            .text()
            .await
            .map_err(|e| SourceError::transient(feed, e))?;
        parse_listing(feed, &body)
    }

    /// App-only OAuth token, cached until a minute before expiry.
    async fn bearer(
        &self,
        client: &reqwest::Client,
        cfg: &RedditConfig,
        feed: &str,
    ) -> Result<Option<String>, SourceError> {
        let Some((id, secret)) = cfg.credentials() else {
            return Ok(None);
        };
        let Mode::Http { token, .. } = &self.mode else {
            return Ok(None);
        };
        let mut guard = token.lock().await;
        if let Some((tok, expires)) = guard.as_ref() {
            if Instant::now() < *expires {
                return Ok(Some(tok.clone()));
            }
        }

        #[derive(Deserialize)]
        struct TokenResp {
            access_token: String,
            #[serde(default = "default_expiry")]
            expires_in: u64,
        }
        fn default_expiry() -> u64 {
            3_600
        }

        let resp = client
            .post(TOKEN_URL)
            .basic_auth(id, Some(secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| SourceError::transient(feed, e))?;
        match resp.status().as_u16() {
            200 => {}
            401 | 403 => {
                return Err(SourceError::permanent(feed, "reddit rejected app credentials"));
            }
            s => return Err(SourceError::transient(feed, format!("token endpoint responded {s}"))),
        }
        let tr: TokenResp = resp
            .json()
            .await
            .map_err(|e| SourceError::decode(feed, e))?;
        let ttl = Duration::from_secs(tr.expires_in.saturating_sub(60).max(60));
        *guard = Some((tr.access_token.clone(), Instant::now() + ttl));
        Ok(Some(tr.access_token))
    }
}

#[async_trait]
impl SourceClient for RedditSource {
    async fn fetch_recent(&self, feed: &str, limit: usize) -> Result<Vec<RawItem>, SourceError> {
        let out = self.collect(feed, "new", &[], limit, |_| true).await?;
        counter!("reddit_posts_fetched_total").increment(out.len() as u64);
        Ok(out)
    }

    /// Top posts of the last year (or month), limited to `months_back` × 30 days.
    async fn fetch_historical(
        &self,
        feed: &str,
        months_back: u32,
        total_limit: usize,
    ) -> Result<Vec<RawItem>, SourceError> {
        let window = if months_back >= 1 { "year" } else { "month" };
        let out = match &self.mode {
            // Fixtures carry fixed timestamps; serve them capped.
            Mode::Fixture(_) => self.collect(feed, "top", &[], total_limit, |_| true).await?,
            Mode::Http { .. } => {
                let cutoff = backfill_cutoff(Utc::now(), months_back);
                self.collect(feed, "top", &[("t", window)], total_limit, move |it| {
                    it.created_at.map_or(true, |t| t >= cutoff)
                })
                .await?
            }
        };
        counter!("reddit_posts_fetched_total").increment(out.len() as u64);
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "reddit"
    }
}
