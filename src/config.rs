use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono_tz::Tz;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    pub anthropic_api_key: Option<String>,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Source names, highest priority first. Unlisted sources rank last.
    #[serde(default = "default_source_priority")]
    pub source_priority: Vec<String>,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_classifier_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_model")]
    pub model: String,
    /// Characters of post content sent to the deep classifier.
    #[serde(default = "default_content_limit")]
    pub content_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_title_similarity")]
    pub title_similarity: f64,
    #[serde(default = "default_max_start_delta")]
    pub max_start_delta_minutes: i64,
    #[serde(default = "default_true")]
    pub same_day: bool,
    /// Timezone whose calendar days define "same day" and the time buckets.
    #[serde(default = "default_timezone")]
    pub calendar_timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Listing sites whose structured items are events by construction.
    #[serde(default)]
    pub trusted: bool,
    pub fetcher: FetcherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FetcherConfig {
    Feed { url: String },
    File { path: PathBuf },
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("eventmerge");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("events.db").to_string_lossy().to_string()
}

fn default_classifier_timeout() -> u64 {
    30
}

fn default_model() -> String {
    "claude-3-5-haiku-20241022".to_string()
}

fn default_content_limit() -> usize {
    10000
}

fn default_title_similarity() -> f64 {
    0.85
}

fn default_max_start_delta() -> i64 {
    120
}

fn default_true() -> bool {
    true
}

fn default_timezone() -> String {
    "Europe/Oslo".to_string()
}

fn default_concurrency() -> usize {
    4
}

fn default_source_priority() -> Vec<String> {
    vec!["Navet".to_string(), "Peoply".to_string()]
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_classifier_timeout(),
            model: default_model(),
            content_limit: default_content_limit(),
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            title_similarity: default_title_similarity(),
            max_start_delta_minutes: default_max_start_delta(),
            same_day: true,
            calendar_timezone: default_timezone(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            anthropic_api_key: None,
            classifier: ClassifierConfig::default(),
            dedup: DedupConfig::default(),
            pipeline: PipelineConfig::default(),
            source_priority: default_source_priority(),
            sources: Vec::new(),
        }
    }
}

impl DedupConfig {
    pub fn calendar_tz(&self) -> Tz {
        self.calendar_timezone.parse().unwrap_or(Tz::UTC)
    }
}

impl SourceConfig {
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(Tz::UTC)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            if !key.is_empty() {
                config.anthropic_api_key = Some(key);
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("eventmerge")
            .join("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.dedup.title_similarity) {
            return Err(AppError::Config(format!(
                "dedup.title_similarity must be within [0, 1], got {}",
                self.dedup.title_similarity
            )));
        }
        if self.dedup.max_start_delta_minutes < 0 {
            return Err(AppError::Config(
                "dedup.max_start_delta_minutes must not be negative".to_string(),
            ));
        }
        if self.pipeline.concurrency == 0 {
            return Err(AppError::Config("pipeline.concurrency must be at least 1".to_string()));
        }
        parse_tz(&self.dedup.calendar_timezone)?;

        let mut seen = HashSet::new();
        for source in &self.sources {
            parse_tz(&source.timezone)?;
            if !seen.insert(source.name.as_str()) {
                return Err(AppError::Config(format!("duplicate source name: {}", source.name)));
            }
        }
        Ok(())
    }

    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Default timezone for a source, falling back to the calendar timezone.
    pub fn source_tz(&self, source: &str) -> Tz {
        self.source(source)
            .map(|s| s.tz())
            .unwrap_or_else(|| self.dedup.calendar_tz())
    }
}

/// Position of `source` in a priority list; unlisted sources share the last rank.
pub fn rank_in(priority: &[String], source: &str) -> i64 {
    priority
        .iter()
        .position(|s| s == source)
        .unwrap_or(priority.len()) as i64
}

fn parse_tz(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| AppError::Config(format!("unknown timezone: {}", name)))
}
