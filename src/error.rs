// src/error.rs

//! Typed errors for the pipeline's collaborators.
//!
//! Each external boundary gets its own enum so callers can tell a transient
//! failure (retry, then degrade) from a permanent one (abandon the unit).

use thiserror::Error;

/// Errors raised by a [`SourceClient`](crate::ingest::types::SourceClient).
#[derive(Error, Debug)]
pub enum SourceError {
    /// Credentials rejected or the feed does not exist. Not retried.
    #[error("permanent source error for '{feed}': {message}")]
    Permanent { feed: String, message: String },

    /// Timeout, throttling or 5xx that survived the retry budget.
    #[error("transient source error for '{feed}': {message}")]
    Transient { feed: String, message: String },

    /// Listing payload could not be decoded.
    #[error("could not decode listing for '{feed}': {message}")]
    Decode { feed: String, message: String },
}

impl SourceError {
    pub fn permanent(feed: impl Into<String>, message: impl ToString) -> Self {
        Self::Permanent {
            feed: feed.into(),
            message: message.to_string(),
        }
    }

    pub fn transient(feed: impl Into<String>, message: impl ToString) -> Self {
        Self::Transient {
            feed: feed.into(),
            message: message.to_string(),
        }
    }

    pub fn decode(feed: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode {
            feed: feed.into(),
            message: message.to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Errors raised by the classifier HTTP clients.
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("API key is not configured")]
    MissingApiKey,

    #[error("request timed out")]
    Timeout,

    #[error("http error: {0}")]
    Http(#[source] reqwest::Error),

    #[error("api responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("model is loading, retry after {0:.1}s")]
    ModelLoading(f64),

    #[error("mock response queue is empty")]
    MockQueueEmpty,
}

impl ClassifierError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(err)
        }
    }

    /// Timeouts, transport failures, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Http(_) | Self::ModelLoading(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::MissingApiKey | Self::Decode(_) | Self::MockQueueEmpty => false,
        }
    }

    /// Throttling or quota exhaustion on the remote side.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::Status { status, body } => {
                *status == 429 || body.to_ascii_lowercase().contains("quota")
            }
            _ => false,
        }
    }
}

/// Errors raised by the item and watermark stores.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend cannot be reached at all (pool closed, connection refused).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    /// True when no further writes in this pass can succeed.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            Self::Migrate(_) | Self::Serde(_) => false,
        }
    }
}

/// Why an item could not be classified.
#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("text for item '{item_id}' is too short to classify")]
    TextTooShort { item_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a feed was abandoned for this pass. Its watermark is not advanced.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("store failed during feed: {0}")]
    Store(#[from] StoreError),
}
