use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("feed parse error: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("Claude API error: {0}")]
    ClaudeApi(String),

    #[error("deep service call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("integrity violation: raw post {raw_post_id} is already linked to master event {existing}")]
    Integrity {
        raw_post_id: i64,
        existing: i64,
        attempted: Option<i64>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Errors that end a whole run instead of a single post.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Connection(tokio_rusqlite::Error::ConnectionClosed)
                | AppError::Connection(tokio_rusqlite::Error::Close(_))
        )
    }
}
