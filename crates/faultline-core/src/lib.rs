//! Core types shared across all Faultline crates

pub mod config;
pub mod jobs;
pub mod types;

pub use config::*;
pub use jobs::*;
pub use types::*;

// Re-export standard datetime type for use across all crates
pub use types::UtcDateTime;

// Re-export external dependencies
pub use anyhow;
pub use async_trait;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tokio;
pub use tracing;
pub use uuid;
