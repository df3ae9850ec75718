// src/store/postgres.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};
use std::time::Duration;
use tracing::info;

use super::{ItemQuery, ItemStore, StoreResult, Watermark, WatermarkStore};
use crate::model::{Engagement, Item, Prediction};

const ITEM_COLUMNS: &str = "item_id, feed_name, title, body, url, source_domain, permalink, \
     author, score, num_comments, upvote_ratio, over_18, is_self, created_at, inserted_at, prediction";

/// PostgreSQL-backed item and watermark store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and apply embedded migrations.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(target: "store", "postgres store ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    item_id: String,
    feed_name: String,
    title: String,
    body: String,
    url: Option<String>,
    source_domain: Option<String>,
    permalink: Option<String>,
    author: Option<String>,
    score: i64,
    num_comments: i64,
    upvote_ratio: f64,
    over_18: bool,
    is_self: bool,
    created_at: DateTime<Utc>,
    inserted_at: DateTime<Utc>,
    prediction: Option<Json<Prediction>>,
}

impl From<ItemRow> for Item {
    fn from(r: ItemRow) -> Self {
        Item {
            item_id: r.item_id,
            feed_name: r.feed_name,
            title: r.title,
            body: r.body,
            url: r.url,
            source_domain: r.source_domain,
            permalink: r.permalink,
            author: r.author,
            engagement: Engagement {
                score: r.score,
                num_comments: r.num_comments,
                upvote_ratio: r.upvote_ratio,
            },
            over_18: r.over_18,
            is_self: r.is_self,
            created_at: r.created_at,
            inserted_at: r.inserted_at,
            prediction: r.prediction.map(|Json(p)| p),
        }
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &ItemQuery) {
    let mut sep = " WHERE ";
    if let Some(feed) = &query.feed {
        qb.push(sep).push("feed_name = ").push_bind(feed.clone());
        sep = " AND ";
    }
    if query.unpredicted_only {
        qb.push(sep).push("prediction IS NULL");
        sep = " AND ";
    }
    if let Some(label) = query.label {
        qb.push(sep)
            .push("prediction_label = ")
            .push_bind(label.as_str());
    }
}

#[async_trait]
impl ItemStore for PgStore {
    async fn insert_if_absent(&self, item: &Item) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO items (item_id, feed_name, title, body, url, source_domain, permalink,
                author, score, num_comments, upvote_ratio, over_18, is_self, created_at, inserted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (item_id) DO NOTHING
            "#,
        )
        .bind(&item.item_id)
        .bind(&item.feed_name)
        .bind(&item.title)
        .bind(&item.body)
        .bind(&item.url)
        .bind(&item.source_domain)
        .bind(&item.permalink)
        .bind(&item.author)
        .bind(item.engagement.score)
        .bind(item.engagement.num_comments)
        .bind(item.engagement.upvote_ratio)
        .bind(item.over_18)
        .bind(item.is_self)
        .bind(item.created_at)
        .bind(item.inserted_at)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn find_by_id(&self, item_id: &str) -> StoreResult<Option<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE item_id = $1");
        let row = sqlx::query_as::<_, ItemRow>(&sql)
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Item::from))
    }

    async fn find_missing_prediction(&self, limit: usize) -> StoreResult<Vec<Item>> {
        self.find_recent(&ItemQuery::recent(limit).unpredicted())
            .await
    }

    async fn update_prediction(
        &self,
        item_id: &str,
        prediction: &Prediction,
    ) -> StoreResult<bool> {
        let res = sqlx::query(
            "UPDATE items SET prediction = $2, prediction_label = $3 WHERE item_id = $1",
        )
        .bind(item_id)
        .bind(Json(prediction))
        .bind(prediction.label.as_str())
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn find_recent(&self, query: &ItemQuery) -> StoreResult<Vec<Item>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {ITEM_COLUMNS} FROM items"));
        push_filters(&mut qb, query);
        qb.push(" ORDER BY created_at DESC, item_id ASC LIMIT ")
            .push_bind(query.limit as i64);
        let rows = qb
            .build_query_as::<ItemRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Item::from).collect())
    }

    async fn count(&self, query: &ItemQuery) -> StoreResult<u64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM items");
        push_filters(&mut qb, query);
        let n = qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }
}

#[derive(sqlx::FromRow)]
struct WatermarkRow {
    feed_name: String,
    last_crawl_time: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[async_trait]
impl WatermarkStore for PgStore {
    async fn get(&self, feed_name: &str) -> StoreResult<Option<DateTime<Utc>>> {
        let ts = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT last_crawl_time FROM watermarks WHERE feed_name = $1",
        )
        .bind(feed_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(ts)
    }

    async fn set(&self, feed_name: &str, last_crawl_time: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO watermarks (feed_name, last_crawl_time, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (feed_name) DO UPDATE
            SET last_crawl_time = GREATEST(watermarks.last_crawl_time, EXCLUDED.last_crawl_time),
                updated_at = now()
            "#,
        )
        .bind(feed_name)
        .bind(last_crawl_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<Watermark>> {
        let rows = sqlx::query_as::<_, WatermarkRow>(
            "SELECT feed_name, last_crawl_time, updated_at FROM watermarks ORDER BY feed_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Watermark {
                feed_name: r.feed_name,
                last_crawl_time: r.last_crawl_time,
                updated_at: r.updated_at,
            })
            .collect())
    }
}
