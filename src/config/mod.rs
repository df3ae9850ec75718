// src/config/mod.rs
//! Runtime configuration: pipeline knobs (TOML + env) and external client settings (env).

pub mod classifier;
pub mod pipeline;
pub mod source;

pub use classifier::{HuggingFaceConfig, LlmConfig};
pub use pipeline::PipelineConfig;
pub use source::RedditConfig;

/// Read an env var, treating unset and blank the same.
pub(crate) fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an env var, ignoring (and logging) values that do not parse.
pub(crate) fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_nonempty(key)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(target: "config", key, value = %raw, "ignoring unparsable env override");
            None
        }
    }
}

pub(crate) fn env_flag(key: &str) -> Option<bool> {
    let raw = env_nonempty(key)?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(target: "config", key, value = %raw, "ignoring unparsable boolean env");
            None
        }
    }
}
