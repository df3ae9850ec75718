// src/model/item.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ingest::normalize_text;
use crate::model::prediction::Prediction;

/// Engagement counters captured once, at crawl time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Engagement {
    pub score: i64,
    pub num_comments: i64,
    pub upvote_ratio: f64,
}

/// A post as the source client returned it, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub id: String,
    /// `None` when the listing carried no usable title.
    pub title: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// `None` when the listing carried no usable timestamp.
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub engagement: Engagement,
    #[serde(default)]
    pub over_18: bool,
    #[serde(default)]
    pub is_self: bool,
}

impl RawItem {
    /// Minimal well-formed post, handy for fixtures and tests.
    pub fn new(id: impl Into<String>, title: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: Some(title.into()),
            body: String::new(),
            url: None,
            domain: None,
            permalink: None,
            author: None,
            created_at: Some(created_at),
            engagement: Engagement::default(),
            over_18: false,
            is_self: false,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn without_title(mut self) -> Self {
        self.title = None;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedItem {
    #[error("item has an empty id")]
    MissingId,
    #[error("item '{0}' has no title")]
    MissingTitle(String),
    #[error("item '{0}' has no creation time")]
    MissingCreatedAt(String),
}

/// One stored post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub item_id: String,
    pub feed_name: String,
    pub title: String,
    pub body: String,
    pub url: Option<String>,
    pub source_domain: Option<String>,
    pub permalink: Option<String>,
    pub author: Option<String>,
    pub engagement: Engagement,
    pub over_18: bool,
    pub is_self: bool,
    pub created_at: DateTime<Utc>,
    pub inserted_at: DateTime<Utc>,
    pub prediction: Option<Prediction>,
}

impl Item {
    /// Validate a raw post and stamp it with its feed and ingestion time.
    pub fn from_raw(
        raw: RawItem,
        feed_name: &str,
        inserted_at: DateTime<Utc>,
    ) -> Result<Self, MalformedItem> {
        let item_id = raw.id.trim().to_string();
        if item_id.is_empty() {
            return Err(MalformedItem::MissingId);
        }
        let created_at = raw
            .created_at
            .ok_or_else(|| MalformedItem::MissingCreatedAt(item_id.clone()))?;
        let title = raw
            .title
            .as_deref()
            .map(normalize_text)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| MalformedItem::MissingTitle(item_id.clone()))?;

        Ok(Self {
            item_id,
            feed_name: feed_name.to_string(),
            title,
            body: normalize_text(&raw.body),
            url: raw.url,
            source_domain: raw.domain,
            permalink: raw.permalink,
            author: raw.author,
            engagement: raw.engagement,
            over_18: raw.over_18,
            is_self: raw.is_self,
            created_at,
            inserted_at,
            prediction: None,
        })
    }
}
