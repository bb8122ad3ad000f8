use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::EventStatus;

/// A scraped item as delivered by a scraper, before it is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRawPost {
    pub source: String,
    pub source_id: String,
    pub url: Option<String>,
    pub content: String,
    pub fetched_at: DateTime<Utc>,
}

impl NewRawPost {
    pub fn content_hash(&self) -> String {
        content_hash(&self.content)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPost {
    pub id: i64,
    pub source: String,
    pub source_id: String,
    pub url: Option<String>,
    pub content: String,
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub status: Option<EventStatus>,
    pub confidence: Option<f64>,
    pub evidence: Option<String>,
    pub classified_hash: Option<String>,
    pub extracted_hash: Option<String>,
    pub review_reason: Option<String>,
}

impl RawPost {
    /// True when the stored classification was made against the current content.
    pub fn classification_is_current(&self) -> bool {
        self.classified_hash.as_deref() == Some(self.content_hash.as_str())
    }
}

pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        assert_eq!(content_hash("Career Fair"), content_hash("Career Fair"));
        assert_ne!(content_hash("Career Fair"), content_hash("Career Fair "));
        assert_eq!(content_hash("").len(), 64);
    }
}
