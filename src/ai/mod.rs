mod claude;

pub use claude::ClaudeClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::Result;

/// Verdict of the deep classification service for one post.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Judgment {
    pub is_event: bool,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub explanation: String,
}

fn default_confidence() -> f64 {
    0.5
}

#[async_trait]
pub trait DeepClassifier: Send + Sync {
    fn name(&self) -> &str;

    async fn judge(&self, content: &str) -> Result<Judgment>;
}

/// Reads event details out of free text the regular reader cannot handle.
#[async_trait]
pub trait DeepExtractor: Send + Sync {
    /// Returns a JSON object with `title`, `description`, `start_time`,
    /// `end_time` and `location`. Relative dates and dates without a year
    /// are resolved against `posted_at`.
    async fn extract_details(&self, content: &str, posted_at: DateTime<Utc>) -> Result<Map<String, Value>>;
}
