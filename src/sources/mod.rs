mod feed;
mod file;

pub use feed::FeedScraper;
pub use file::FileScraper;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Config, FetcherConfig};
use crate::error::{AppError, Result};
use crate::models::NewRawPost;

/// A source of raw posts. One implementation per kind of site.
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Source name the posts are stored under.
    fn source(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<NewRawPost>>;
}

#[derive(Default)]
pub struct ScraperRegistry {
    scrapers: BTreeMap<String, Arc<dyn Scraper>>,
}

impl ScraperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        for source in &config.sources {
            let scraper: Arc<dyn Scraper> = match &source.fetcher {
                FetcherConfig::Feed { url } => Arc::new(FeedScraper::new(&source.name, url)?),
                FetcherConfig::File { path } => Arc::new(FileScraper::new(&source.name, path.clone())),
            };
            registry.register(scraper);
        }
        Ok(registry)
    }

    pub fn register(&mut self, scraper: Arc<dyn Scraper>) {
        self.scrapers.insert(scraper.source().to_string(), scraper);
    }

    pub fn get(&self, source: &str) -> Result<Arc<dyn Scraper>> {
        self.scrapers
            .get(source)
            .cloned()
            .ok_or_else(|| AppError::UnknownSource(source.to_string()))
    }

    /// Registered source names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.scrapers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;

    #[test]
    fn registry_is_built_from_config() {
        let mut config = Config::default();
        config.sources = vec![
            SourceConfig {
                name: "Peoply".to_string(),
                timezone: "Europe/Oslo".to_string(),
                trusted: true,
                fetcher: FetcherConfig::File {
                    path: "peoply.json".into(),
                },
            },
            SourceConfig {
                name: "Navet".to_string(),
                timezone: "Europe/Oslo".to_string(),
                trusted: true,
                fetcher: FetcherConfig::Feed {
                    url: "https://ifinavet.no/feed.xml".to_string(),
                },
            },
        ];

        let registry = ScraperRegistry::from_config(&config).unwrap();
        assert_eq!(registry.names(), vec!["Navet", "Peoply"]);
        assert_eq!(registry.get("Peoply").unwrap().source(), "Peoply");
        assert!(matches!(
            registry.get("Facebook"),
            Err(AppError::UnknownSource(name)) if name == "Facebook"
        ));
    }
}
