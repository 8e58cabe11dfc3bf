use sea_orm::DbErr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AiError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("AI provider returned error: {0}")]
    Provider(String),

    #[error("AI provider timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Invalid AI provider configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Usage recording failed: {0}")]
    Usage(String),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Cache entry not found")]
    EntryNotFound,

    #[error("Corrupt cache entry {id}: {reason}")]
    Corrupt { id: i32, reason: String },
}
