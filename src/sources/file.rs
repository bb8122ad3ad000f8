use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{content_hash, NewRawPost};

use super::Scraper;

const ID_KEYS: &[&str] = &["source_id", "id", "urlId", "post_id"];

/// Replays a scraped snapshot stored on disk as a JSON array.
///
/// Objects carrying a plain-text `content` (and no `title`) are stored as
/// free-text posts; any other object is stored as structured JSON.
pub struct FileScraper {
    source: String,
    path: PathBuf,
}

impl FileScraper {
    pub fn new(source: &str, path: PathBuf) -> Self {
        Self {
            source: source.to_string(),
            path,
        }
    }

    fn parse(&self, raw: &str) -> Result<Vec<NewRawPost>> {
        let items: Vec<Value> = serde_json::from_str(raw)?;
        let now = Utc::now();

        let mut posts = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let Value::Object(object) = &item else {
                tracing::warn!("Skipping item {} of {}: not an object", index, self.path.display());
                continue;
            };

            let free_text = match (object.get("content"), object.get("title")) {
                (Some(Value::String(text)), None) => Some(text.clone()),
                _ => None,
            };
            let content = match free_text {
                Some(text) => text,
                None => serde_json::to_string(&item)?,
            };

            let source_id = ID_KEYS
                .iter()
                .find_map(|key| match object.get(*key)? {
                    Value::String(s) if !s.is_empty() => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .unwrap_or_else(|| content_hash(&content));

            let fetched_at = object
                .get("fetched_at")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or(now);

            posts.push(NewRawPost {
                source: self.source.clone(),
                source_id,
                url: object.get("url").and_then(Value::as_str).map(String::from),
                content,
                fetched_at,
            });
        }
        Ok(posts)
    }
}

#[async_trait]
impl Scraper for FileScraper {
    fn source(&self) -> &str {
        &self.source
    }

    async fn fetch(&self) -> Result<Vec<NewRawPost>> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            AppError::Other(anyhow::anyhow!("Failed to read snapshot {}: {}", self.path.display(), e))
        })?;
        self.parse(&raw)
    }
}
