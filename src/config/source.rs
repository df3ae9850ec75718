// src/config/source.rs
use std::time::Duration;

use super::{env_nonempty, env_parse};

/// Reddit API access. Without credentials the public JSON listings are used.
#[derive(Debug, Clone)]
pub struct RedditConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub page_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            user_agent: "FakeNewsDetector/1.0".to_string(),
            timeout_secs: 30,
            page_delay_ms: 200,
            max_attempts: 3,
        }
    }
}

impl RedditConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self {
            client_id: env_nonempty("REDDIT_CLIENT_ID"),
            client_secret: env_nonempty("REDDIT_CLIENT_SECRET"),
            ..Self::default()
        };
        if let Some(ua) = env_nonempty("REDDIT_USER_AGENT") {
            cfg.user_agent = ua;
        }
        if let Some(v) = env_parse("REDDIT_TIMEOUT_SECS") {
            cfg.timeout_secs = v;
        }
        cfg
    }

    /// Both halves of the app credentials are present.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => Some((id.as_str(), secret.as_str())),
            _ => None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }
}
