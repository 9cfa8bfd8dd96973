//! Startup configuration for a webview window.

use serde::Deserialize;

use crate::engine::SizeHint;
use crate::error::Result;

/// Environment variable that turns on developer tooling.
pub const DEBUG_ENV: &str = "QLIPHOTH_WEBVIEW_DEBUG";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Enable developer extras and console output.
    pub debug: bool,
    pub title: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub hint: SizeHint,
    /// Start page; accepts `data:text/html,` documents.
    pub url: Option<String>,
}

impl Config {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Whether `QLIPHOTH_WEBVIEW_DEBUG` is set to `1` or `true`.
    pub fn debug_from_env() -> bool {
        std::env::var(DEBUG_ENV)
            .map(|value| is_truthy(&value))
            .unwrap_or(false)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true")
}
