//! AI-assisted error analysis.
//!
//! - [`provider`]: the `generate(prompt) -> text` capability and an OpenAI-compatible client
//! - [`cache`]: content-addressed cache of analyses keyed by fingerprint hash
//! - [`analysis`]: cache-first analysis of an error group
//! - [`usage`]: token/cost telemetry for billing

pub mod analysis;
pub mod cache;
pub mod error;
pub mod provider;
pub mod usage;

pub use analysis::{AnalysisConfig, AnalysisRequest, ErrorAnalysis, ErrorAnalysisService};
pub use cache::{
    AnalysisCache, AnalysisCacheStore, AnalysisType, CacheAnalysisOptions, CacheConfig,
    CacheEntry, CacheHit, CacheLookup, CacheStats, CacheUsageWorker, InMemoryCacheStore,
    NewCacheEntry, SeaOrmCacheStore,
};
pub use error::{AiError, CacheError};
pub use provider::{AiProvider, AiProviderConfig, Generation, GenerationOptions, OpenAiCompatibleProvider};
pub use usage::{CostModel, TracingUsageRecorder, UsageRecord, UsageRecorder};
