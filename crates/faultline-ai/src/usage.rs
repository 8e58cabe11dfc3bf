//! Token and cost telemetry for AI calls

use async_trait::async_trait;
use faultline_core::UtcDateTime;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AiError;

/// Price of a provider call in cents per thousand tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    pub input_cents_per_1k: f64,
    pub output_cents_per_1k: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            input_cents_per_1k: 0.015,
            output_cents_per_1k: 0.06,
        }
    }
}

impl CostModel {
    pub fn cost_cents(&self, prompt_tokens: i64, completion_tokens: i64) -> f64 {
        (prompt_tokens.max(0) as f64 / 1000.0) * self.input_cents_per_1k
            + (completion_tokens.max(0) as f64 / 1000.0) * self.output_cents_per_1k
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub project_id: i32,
    pub fingerprint_hash: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost_cents: f64,
    /// Served from the analysis cache; tokens and cost are what the hit saved
    pub cached: bool,
    pub recorded_at: UtcDateTime,
}

/// Receives one record per analysis served, for billing
#[async_trait]
pub trait UsageRecorder: Send + Sync {
    async fn record(&self, record: UsageRecord) -> Result<(), AiError>;
}

/// Emits usage records as structured log lines
#[derive(Debug, Default, Clone)]
pub struct TracingUsageRecorder;

#[async_trait]
impl UsageRecorder for TracingUsageRecorder {
    async fn record(&self, record: UsageRecord) -> Result<(), AiError> {
        info!(
            project_id = record.project_id,
            fingerprint_hash = %record.fingerprint_hash,
            provider = %record.provider,
            model = %record.model,
            prompt_tokens = record.prompt_tokens,
            completion_tokens = record.completion_tokens,
            cost_cents = record.cost_cents,
            cached = record.cached,
            "AI usage"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_model() {
        let model = CostModel {
            input_cents_per_1k: 1.0,
            output_cents_per_1k: 2.0,
        };
        assert!((model.cost_cents(1500, 500) - 2.5).abs() < 1e-9);
        assert_eq!(model.cost_cents(-10, 0), 0.0);
    }
}
