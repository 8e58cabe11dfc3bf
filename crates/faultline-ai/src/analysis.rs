//! Cache-first AI analysis of an error group

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::cache::{AnalysisCache, AnalysisType, CacheAnalysisOptions, CacheLookup};
use crate::error::AiError;
use crate::provider::{AiProvider, GenerationOptions};
use crate::usage::{UsageRecord, UsageRecorder};

const SYSTEM_PROMPT: &str = "You are an expert software engineer triaging production errors. \
Respond with a single JSON object with the keys \"summary\", \"root_cause\", \
\"suggested_fix\", \"severity\" (one of low, medium, high, critical) and \"confidence\" \
(a number between 0 and 1).";

const MAX_STACK_TRACE_CHARS: usize = 4000;
const MAX_FALLBACK_SUMMARY_CHARS: usize = 2000;
const FALLBACK_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ErrorAnalysis {
    pub summary: String,
    #[serde(default)]
    pub root_cause: Option<String>,
    #[serde(default)]
    pub suggested_fix: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    FALLBACK_CONFIDENCE
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub project_id: i32,
    pub fingerprint_hash: String,
    pub title: String,
    pub error_type: String,
    pub message: String,
    pub platform: String,
    pub stack_trace: Option<serde_json::Value>,
    pub event_count: i64,
}

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_tokens: 800,
            temperature: 0.2,
        }
    }
}

pub struct ErrorAnalysisService {
    provider: Arc<dyn AiProvider>,
    cache: Arc<AnalysisCache>,
    usage: Arc<dyn UsageRecorder>,
    config: AnalysisConfig,
}

impl ErrorAnalysisService {
    pub fn new(
        provider: Arc<dyn AiProvider>,
        cache: Arc<AnalysisCache>,
        usage: Arc<dyn UsageRecorder>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            provider,
            cache,
            usage,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<AnalysisCache> {
        &self.cache
    }

    /// Returns `None` when the provider produced nothing usable
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<Option<ErrorAnalysis>, AiError> {
        if let Some(analysis) = self.cached(request).await {
            return Ok(Some(analysis));
        }

        let prompt = build_prompt(request);
        let options = GenerationOptions {
            system_prompt: Some(SYSTEM_PROMPT.to_string()),
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
            json_response: true,
        };

        let generation = tokio::time::timeout(
            self.config.timeout,
            self.provider.generate(&prompt, &options),
        )
        .await
        .map_err(|_| AiError::Timeout(self.config.timeout))??;

        let Some(analysis) = parse_analysis_reply(&generation.text) else {
            warn!(
                fingerprint_hash = %request.fingerprint_hash,
                "AI provider returned an empty analysis"
            );
            return Ok(None);
        };

        let result = serde_json::to_value(&analysis)
            .map_err(|e| AiError::Provider(format!("unserializable analysis: {}", e)))?;
        let cache_options = CacheAnalysisOptions {
            provider: self.provider.name().to_string(),
            model: generation.model.clone(),
            prompt,
            project_id: Some(request.project_id),
            confidence_score: Some(analysis.confidence),
            is_public: None,
            error_patterns: vec![request.error_type.clone(), request.message.clone()],
            prompt_tokens: Some(generation.prompt_tokens),
            completion_tokens: Some(generation.completion_tokens),
        };
        if let Err(e) = self
            .cache
            .cache_analysis(
                &request.fingerprint_hash,
                AnalysisType::ErrorAnalysis,
                result,
                cache_options,
            )
            .await
        {
            warn!(
                fingerprint_hash = %request.fingerprint_hash,
                "Failed to cache AI analysis: {}", e
            );
        }

        let cost_cents = self
            .cache
            .cost_model()
            .cost_cents(generation.prompt_tokens, generation.completion_tokens);
        self.record_usage(UsageRecord {
            project_id: request.project_id,
            fingerprint_hash: request.fingerprint_hash.clone(),
            provider: self.provider.name().to_string(),
            model: generation.model,
            prompt_tokens: generation.prompt_tokens,
            completion_tokens: generation.completion_tokens,
            cost_cents,
            cached: false,
            recorded_at: Utc::now(),
        })
        .await;

        info!(
            project_id = request.project_id,
            fingerprint_hash = %request.fingerprint_hash,
            "Generated AI analysis"
        );
        Ok(Some(analysis))
    }

    async fn cached(&self, request: &AnalysisRequest) -> Option<ErrorAnalysis> {
        let lookup = CacheLookup {
            fingerprint_hash: request.fingerprint_hash.clone(),
            analysis_type: AnalysisType::ErrorAnalysis,
            project_id: Some(request.project_id),
            respect_privacy: true,
        };

        let entry = match self.cache.get_cached_analysis(&lookup).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(
                    fingerprint_hash = %request.fingerprint_hash,
                    "AI cache lookup failed, calling provider: {}", e
                );
                return None;
            }
        };

        let analysis = match serde_json::from_value::<ErrorAnalysis>(entry.analysis_result.clone()) {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(entry_id = entry.id, "Ignoring unreadable cached analysis: {}", e);
                return None;
            }
        };

        debug!(
            entry_id = entry.id,
            fingerprint_hash = %request.fingerprint_hash,
            "AI analysis served from cache"
        );
        self.record_usage(UsageRecord {
            project_id: request.project_id,
            fingerprint_hash: request.fingerprint_hash.clone(),
            provider: entry.provider,
            model: entry.model,
            prompt_tokens: entry.prompt_tokens,
            completion_tokens: entry.completion_tokens,
            cost_cents: entry.original_cost_cents,
            cached: true,
            recorded_at: Utc::now(),
        })
        .await;

        Some(analysis)
    }

    async fn record_usage(&self, record: UsageRecord) {
        if let Err(e) = self.usage.record(record).await {
            warn!("Failed to record AI usage: {}", e);
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

pub fn build_prompt(request: &AnalysisRequest) -> String {
    let mut prompt = format!(
        "Analyze this {} error that has occurred {} time(s).\n\nTitle: {}\nType: {}\nMessage: {}\n",
        request.platform, request.event_count, request.title, request.error_type, request.message
    );

    if let Some(stack_trace) = &request.stack_trace {
        let rendered = serde_json::to_string_pretty(stack_trace).unwrap_or_default();
        prompt.push_str("\nStack trace:\n");
        prompt.push_str(&truncate_chars(&rendered, MAX_STACK_TRACE_CHARS));
        prompt.push('\n');
    }

    prompt.push_str("\nExplain the likely root cause and how to fix it.");
    prompt
}

/// Parses a provider reply into an analysis.
///
/// Accepts a bare JSON object or one wrapped in a fenced code block. Any other
/// non-empty text becomes the summary.
pub fn parse_analysis_reply(reply: &str) -> Option<ErrorAnalysis> {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return None;
    }

    let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => Some(&trimmed[start..=end]),
        _ => None,
    };

    if let Some(json) = candidate {
        if let Ok(mut analysis) = serde_json::from_str::<ErrorAnalysis>(json) {
            if !analysis.summary.trim().is_empty() {
                analysis.confidence = analysis.confidence.clamp(0.0, 1.0);
                return Some(analysis);
            }
        }
    }

    let text = trimmed
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if text.is_empty() {
        return None;
    }

    Some(ErrorAnalysis {
        summary: truncate_chars(text, MAX_FALLBACK_SUMMARY_CHARS),
        root_cause: None,
        suggested_fix: None,
        severity: None,
        confidence: FALLBACK_CONFIDENCE,
    })
}
