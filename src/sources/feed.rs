use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use feed_rs::parser;
use reqwest::Client;

use crate::error::Result;
use crate::models::{content_hash, NewRawPost};

use super::Scraper;

/// RSS/Atom listing. Each entry becomes one post: its title on the first
/// line, then the flattened body.
pub struct FeedScraper {
    client: Client,
    source: String,
    url: String,
}

impl FeedScraper {
    pub fn new(source: &str, url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("eventmerge/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            source: source.to_string(),
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Scraper for FeedScraper {
    fn source(&self) -> &str {
        &self.source
    }

    async fn fetch(&self) -> Result<Vec<NewRawPost>> {
        let response = self.client.get(&self.url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch feed: HTTP {}", response.status()).into());
        }

        let bytes = response.bytes().await?;
        let posts = parse_entries(&self.source, &bytes[..])?;
        tracing::debug!("Fetched {} entries from {}", posts.len(), self.url);
        Ok(posts)
    }
}

fn parse_entries(source: &str, bytes: &[u8]) -> Result<Vec<NewRawPost>> {
    let feed = parser::parse(bytes)?;
    let fetched_at = Utc::now();

    let posts = feed
        .entries
        .into_iter()
        .map(|entry| {
            // Try content first, then fall back to summary
            let body_html = entry
                .content
                .as_ref()
                .and_then(|c| c.body.as_ref())
                .or_else(|| entry.summary.as_ref().map(|s| &s.content));
            let body = body_html
                .and_then(|html| html2text::from_read(html.as_bytes(), 100).ok())
                .unwrap_or_default();

            let title = entry.title.map(|t| t.content).unwrap_or_default();
            let content = format!("{}\n{}", title.trim(), body.trim()).trim().to_string();
            let url = entry.links.first().map(|l| l.href.clone());
            let source_id = if entry.id.is_empty() {
                url.clone().unwrap_or_else(|| content_hash(&content))
            } else {
                entry.id
            };

            NewRawPost {
                source: source.to_string(),
                source_id,
                url,
                content,
                fetched_at,
            }
        })
        .collect();

    Ok(posts)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Navet</title>
    <link>https://ifinavet.no</link>
    <description>Bedriftspresentasjoner</description>
    <item>
      <guid>navet-101</guid>
      <title>Bedpres: Bekk</title>
      <link>https://ifinavet.no/events/101</link>
      <description>&lt;p&gt;Sted: Lille Aud&lt;/p&gt;&lt;p&gt;12.03.2025 kl. 17:15&lt;/p&gt;</description>
    </item>
    <item>
      <guid>navet-102</guid>
      <title>Career Fair</title>
      <link>https://ifinavet.no/events/102</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn entries_become_raw_posts() {
        let posts = parse_entries("Navet", RSS.as_bytes()).unwrap();
        assert_eq!(posts.len(), 2);

        let first = &posts[0];
        assert_eq!(first.source, "Navet");
        assert_eq!(first.source_id, "navet-101");
        assert_eq!(first.url.as_deref(), Some("https://ifinavet.no/events/101"));
        assert!(first.content.starts_with("Bedpres: Bekk\n"));
        assert!(first.content.contains("Sted: Lille Aud"));
        assert!(first.content.contains("12.03.2025 kl. 17:15"));

        assert_eq!(posts[1].content, "Career Fair");
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(parse_entries("Navet", b"not a feed").is_err());
    }
}
