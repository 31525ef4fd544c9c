// src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Upstream returned HTTP {status} for {url}")]
    Http { status: u16, url: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("HTTP client error: {0}")]
    Reqwest(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Still rate limited after {attempts} attempts: {url}")]
    RateLimited { url: String, attempts: u32 },

    #[error("Request queue is closed")]
    QueueClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data not found: {0}")]
    DataNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Http { .. } => 502,
            AppError::Timeout(_) => 504,
            AppError::Reqwest(_) => 502,
            AppError::Serialization(_) => 502,
            AppError::RateLimited { .. } => 429,
            AppError::QueueClosed => 503,
            AppError::Config(_) => 500,
            AppError::DataNotFound(_) => 404,
            AppError::Validation(_) => 400,
        }
    }

    /// True for failures a caller may reasonably retry later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Timeout(_) | AppError::RateLimited { .. } | AppError::Reqwest(_)
        )
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            let url = err.url().map(|u| u.to_string()).unwrap_or_default();
            AppError::Timeout(url)
        } else {
            AppError::Reqwest(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

// Convenience type alias for Result
pub type Result<T> = std::result::Result<T, AppError>;
