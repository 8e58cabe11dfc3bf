//! Content-addressed cache of AI analyses.
//!
//! Entries are looked up by `(fingerprint_hash, analysis_type)`. Several rows can
//! match (one per provider, model and owning project), so lookups rank candidates by confidence and
//! then by usage. Usage statistics are written back off the read path through a
//! bounded channel drained by [`CacheUsageWorker`].

mod classifier;
mod memory;
mod sea_orm_store;
mod worker;

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use faultline_core::UtcDateTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::debug;
use utoipa::ToSchema;

use crate::error::CacheError;
use crate::usage::CostModel;

pub use classifier::is_public_pattern;
pub use memory::InMemoryCacheStore;
pub use sea_orm_store::SeaOrmCacheStore;
pub use worker::CacheUsageWorker;

/// Owner key of entries readable by every project
pub const SHARED_OWNER: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    ErrorAnalysis,
    SuggestedFix,
    SimilarErrors,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::ErrorAnalysis => "error_analysis",
            AnalysisType::SuggestedFix => "suggested_fix",
            AnalysisType::SimilarErrors => "similar_errors",
        }
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error_analysis" => Ok(AnalysisType::ErrorAnalysis),
            "suggested_fix" => Ok(AnalysisType::SuggestedFix),
            "similar_errors" => Ok(AnalysisType::SimilarErrors),
            other => Err(format!("unknown analysis type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: i32,
    pub fingerprint_hash: String,
    pub analysis_type: AnalysisType,
    pub provider: String,
    pub model: String,
    /// Project a private entry was produced for; [`SHARED_OWNER`] otherwise
    pub owner_project_id: i32,
    pub analysis_result: serde_json::Value,
    pub prompt_hash: String,
    pub confidence_score: f64,
    pub is_public: bool,
    pub usage_count: i64,
    pub last_used_at: UtcDateTime,
    pub projects_used: BTreeSet<i32>,
    pub avg_feedback_score: f64,
    pub feedback_count: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub original_cost_cents: f64,
    pub tokens_saved: i64,
    pub cost_saved_cents: f64,
    pub created_at: UtcDateTime,
}

impl CacheEntry {
    /// A private entry is only readable by projects that already used it
    pub fn visible_to(&self, project_id: Option<i32>, respect_privacy: bool) -> bool {
        match project_id {
            Some(project_id) if respect_privacy => {
                self.is_public || self.projects_used.contains(&project_id)
            }
            _ => true,
        }
    }

    pub fn apply_hit(&mut self, project_id: Option<i32>, at: UtcDateTime) {
        self.usage_count += 1;
        self.last_used_at = at;
        self.tokens_saved += self.prompt_tokens + self.completion_tokens;
        self.cost_saved_cents += self.original_cost_cents;
        if let Some(project_id) = project_id {
            self.projects_used.insert(project_id);
        }
    }

    pub fn apply_feedback(&mut self, score: f64) {
        let count = self.feedback_count as f64;
        self.avg_feedback_score = (self.avg_feedback_score * count + score) / (count + 1.0);
        self.feedback_count += 1;
    }

    /// Re-caching the same provider/model and owner replaces the result and resets
    /// feedback. Usage and savings history is kept.
    pub fn replace_with(&mut self, new: &NewCacheEntry, at: UtcDateTime) {
        self.analysis_result = new.analysis_result.clone();
        self.prompt_hash = new.prompt_hash.clone();
        self.confidence_score = new.confidence_score;
        self.is_public = new.is_public;
        self.prompt_tokens = new.prompt_tokens;
        self.completion_tokens = new.completion_tokens;
        self.original_cost_cents = new.original_cost_cents;
        self.avg_feedback_score = 0.0;
        self.feedback_count = 0;
        self.last_used_at = at;
        if let Some(project_id) = new.project_id {
            self.projects_used.insert(project_id);
        }
    }
}

/// Fully-resolved values for a fresh cache row
#[derive(Debug, Clone, PartialEq)]
pub struct NewCacheEntry {
    pub fingerprint_hash: String,
    pub analysis_type: AnalysisType,
    pub provider: String,
    pub model: String,
    pub analysis_result: serde_json::Value,
    pub prompt_hash: String,
    pub confidence_score: f64,
    pub is_public: bool,
    pub project_id: Option<i32>,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub original_cost_cents: f64,
}

impl NewCacheEntry {
    /// Private results stay scoped to the project that produced them, so one
    /// tenant's analysis never overwrites another's
    pub fn owner_project_id(&self) -> i32 {
        match self.project_id {
            Some(project_id) if !self.is_public => project_id,
            _ => SHARED_OWNER,
        }
    }

    pub fn into_entry(self, id: i32, at: UtcDateTime) -> CacheEntry {
        CacheEntry {
            id,
            owner_project_id: self.owner_project_id(),
            fingerprint_hash: self.fingerprint_hash,
            analysis_type: self.analysis_type,
            provider: self.provider,
            model: self.model,
            analysis_result: self.analysis_result,
            prompt_hash: self.prompt_hash,
            confidence_score: self.confidence_score,
            is_public: self.is_public,
            usage_count: 1,
            last_used_at: at,
            projects_used: self.project_id.into_iter().collect(),
            avg_feedback_score: 0.0,
            feedback_count: 0,
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            original_cost_cents: self.original_cost_cents,
            tokens_saved: 0,
            cost_saved_cents: 0.0,
            created_at: at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup {
    pub fingerprint_hash: String,
    pub analysis_type: AnalysisType,
    pub project_id: Option<i32>,
    pub respect_privacy: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CacheAnalysisOptions {
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub project_id: Option<i32>,
    pub confidence_score: Option<f64>,
    /// Overrides the public-pattern classifier
    pub is_public: Option<bool>,
    pub error_patterns: Vec<String>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
}

/// A served cache hit, queued for asynchronous write-back
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub entry_id: i32,
    pub project_id: Option<i32>,
    pub at: UtcDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CacheStats {
    pub total_entries: i64,
    pub public_entries: i64,
    pub total_usage: i64,
    pub tokens_saved: i64,
    pub cost_saved_cents: f64,
    /// Feedback average weighted by feedback count
    pub avg_feedback_score: f64,
}

#[async_trait]
pub trait AnalysisCacheStore: Send + Sync {
    async fn find_entries(
        &self,
        fingerprint_hash: &str,
        analysis_type: AnalysisType,
    ) -> Result<Vec<CacheEntry>, CacheError>;

    /// Insert, or replace the result of the row with the same provider, model and owner
    async fn upsert_entry(&self, entry: NewCacheEntry) -> Result<CacheEntry, CacheError>;

    async fn record_hit(&self, hit: &CacheHit) -> Result<(), CacheError>;

    async fn record_feedback(&self, entry_id: i32, score: f64) -> Result<CacheEntry, CacheError>;

    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub usage_channel_capacity: usize,
    /// Confidence stored when the caller does not provide one
    pub default_confidence: f64,
    pub cost_model: CostModel,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            usage_channel_capacity: 1024,
            default_confidence: 0.5,
            cost_model: CostModel::default(),
        }
    }
}

/// SHA-256 of the trimmed, lower-cased prompt
pub fn prompt_hash(prompt: &str) -> String {
    let normalized = prompt.trim().to_lowercase();
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

/// Best entry first: higher confidence, then higher usage, then oldest id
fn rank(a: &CacheEntry, b: &CacheEntry) -> Ordering {
    b.confidence_score
        .partial_cmp(&a.confidence_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.usage_count.cmp(&a.usage_count))
        .then_with(|| a.id.cmp(&b.id))
}

fn best_entry(entries: impl IntoIterator<Item = CacheEntry>) -> Option<CacheEntry> {
    entries.into_iter().min_by(rank)
}

pub struct AnalysisCache {
    store: Arc<dyn AnalysisCacheStore>,
    hits: mpsc::Sender<CacheHit>,
    config: CacheConfig,
}

impl AnalysisCache {
    /// The returned worker must be spawned for usage statistics to be persisted
    pub fn new(store: Arc<dyn AnalysisCacheStore>, config: CacheConfig) -> (Self, CacheUsageWorker) {
        let (sender, receiver) = mpsc::channel(config.usage_channel_capacity.max(1));
        let worker = CacheUsageWorker::new(store.clone(), receiver);
        (
            Self {
                store,
                hits: sender,
                config,
            },
            worker,
        )
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.config.cost_model
    }

    pub async fn get_cached_analysis(
        &self,
        lookup: &CacheLookup,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let entries = self
            .store
            .find_entries(&lookup.fingerprint_hash, lookup.analysis_type)
            .await?;

        let best = best_entry(
            entries
                .into_iter()
                .filter(|entry| entry.visible_to(lookup.project_id, lookup.respect_privacy)),
        );

        if let Some(entry) = &best {
            let hit = CacheHit {
                entry_id: entry.id,
                project_id: lookup.project_id,
                at: Utc::now(),
            };
            if let Err(e) = self.hits.try_send(hit) {
                debug!(entry_id = entry.id, "Dropping cache usage update: {}", e);
            }
        }

        Ok(best)
    }

    pub async fn cache_analysis(
        &self,
        fingerprint_hash: &str,
        analysis_type: AnalysisType,
        result: serde_json::Value,
        options: CacheAnalysisOptions,
    ) -> Result<CacheEntry, CacheError> {
        let prompt_tokens = options.prompt_tokens.unwrap_or(0);
        let completion_tokens = options.completion_tokens.unwrap_or(0);
        let is_public = options
            .is_public
            .unwrap_or_else(|| is_public_pattern(&options.error_patterns));

        let entry = NewCacheEntry {
            fingerprint_hash: fingerprint_hash.to_string(),
            analysis_type,
            provider: options.provider,
            model: options.model,
            analysis_result: result,
            prompt_hash: prompt_hash(&options.prompt),
            confidence_score: options
                .confidence_score
                .unwrap_or(self.config.default_confidence),
            is_public,
            project_id: options.project_id,
            prompt_tokens,
            completion_tokens,
            original_cost_cents: self
                .config
                .cost_model
                .cost_cents(prompt_tokens, completion_tokens),
        };

        let stored = self.store.upsert_entry(entry).await?;
        debug!(
            entry_id = stored.id,
            fingerprint_hash = %stored.fingerprint_hash,
            analysis_type = %stored.analysis_type,
            is_public = stored.is_public,
            "Cached AI analysis"
        );
        Ok(stored)
    }

    /// Applies the score to the top-ranked entry for the key
    pub async fn submit_feedback(
        &self,
        fingerprint_hash: &str,
        analysis_type: AnalysisType,
        score: f64,
    ) -> Result<CacheEntry, CacheError> {
        let entries = self.store.find_entries(fingerprint_hash, analysis_type).await?;
        let target = best_entry(entries).ok_or(CacheError::EntryNotFound)?;
        self.store.record_feedback(target.id, score).await
    }

    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        self.store.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(project_id: i32, is_public: bool) -> CacheAnalysisOptions {
        CacheAnalysisOptions {
            provider: "openai-compatible".to_string(),
            model: "gpt-4o-mini".to_string(),
            prompt: "Analyze this error".to_string(),
            project_id: Some(project_id),
            is_public: Some(is_public),
            prompt_tokens: Some(1000),
            completion_tokens: Some(500),
            ..Default::default()
        }
    }

    fn lookup(project_id: Option<i32>, respect_privacy: bool) -> CacheLookup {
        CacheLookup {
            fingerprint_hash: "hash".to_string(),
            analysis_type: AnalysisType::ErrorAnalysis,
            project_id,
            respect_privacy,
        }
    }

    fn cache() -> (AnalysisCache, CacheUsageWorker, Arc<InMemoryCacheStore>) {
        let store = Arc::new(InMemoryCacheStore::new());
        let (cache, worker) = AnalysisCache::new(store.clone(), CacheConfig::default());
        (cache, worker, store)
    }

    #[test]
    fn test_prompt_hash_normalizes() {
        assert_eq!(prompt_hash("  Hello World \n"), prompt_hash("hello world"));
        assert_ne!(prompt_hash("hello"), prompt_hash("world"));
        assert_eq!(prompt_hash("x").len(), 64);
    }

    #[test]
    fn test_analysis_type_round_trip() {
        for kind in [
            AnalysisType::ErrorAnalysis,
            AnalysisType::SuggestedFix,
            AnalysisType::SimilarErrors,
        ] {
            assert_eq!(kind.as_str().parse::<AnalysisType>().unwrap(), kind);
        }
        assert!("summary".parse::<AnalysisType>().is_err());
    }

    #[tokio::test]
    async fn test_private_entry_hidden_from_other_projects() {
        let (cache, _worker, _) = cache();
        cache
            .cache_analysis("hash", AnalysisType::ErrorAnalysis, json!({"summary": "a"}), options(1, false))
            .await
            .unwrap();

        assert!(cache.get_cached_analysis(&lookup(Some(2), true)).await.unwrap().is_none());
        assert!(cache.get_cached_analysis(&lookup(Some(1), true)).await.unwrap().is_some());
        assert!(cache.get_cached_analysis(&lookup(Some(2), false)).await.unwrap().is_some());
        assert!(cache.get_cached_analysis(&lookup(None, true)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_public_entry_shared() {
        let (cache, _worker, _) = cache();
        cache
            .cache_analysis("hash", AnalysisType::ErrorAnalysis, json!({}), options(1, true))
            .await
            .unwrap();
        assert!(cache.get_cached_analysis(&lookup(Some(2), true)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_private_entries_of_two_projects_stay_separate() {
        let (cache, _worker, store) = cache();
        cache
            .cache_analysis("hash", AnalysisType::ErrorAnalysis, json!({"summary": "A secret"}), options(1, false))
            .await
            .unwrap();
        assert!(cache.get_cached_analysis(&lookup(Some(2), true)).await.unwrap().is_none());
        cache
            .cache_analysis("hash", AnalysisType::ErrorAnalysis, json!({"summary": "B secret"}), options(2, false))
            .await
            .unwrap();

        let for_a = cache.get_cached_analysis(&lookup(Some(1), true)).await.unwrap().unwrap();
        assert_eq!(for_a.analysis_result, json!({"summary": "A secret"}));
        assert_eq!(for_a.projects_used, BTreeSet::from([1]));

        let for_b = cache.get_cached_analysis(&lookup(Some(2), true)).await.unwrap().unwrap();
        assert_eq!(for_b.analysis_result, json!({"summary": "B secret"}));
        assert_eq!(for_b.projects_used, BTreeSet::from([2]));

        assert_eq!(store.stats().await.unwrap().total_entries, 2);
    }

    #[tokio::test]
    async fn test_recaching_own_private_entry_replaces_it() {
        let (cache, _worker, store) = cache();
        for summary in ["first", "second"] {
            cache
                .cache_analysis("hash", AnalysisType::ErrorAnalysis, json!({"summary": summary}), options(1, false))
                .await
                .unwrap();
        }
        let entry = cache.get_cached_analysis(&lookup(Some(1), true)).await.unwrap().unwrap();
        assert_eq!(entry.analysis_result, json!({"summary": "second"}));
        assert_eq!(entry.owner_project_id, 1);
        assert_eq!(store.stats().await.unwrap().total_entries, 1);
    }

    #[tokio::test]
    async fn test_tie_break_prefers_confidence_over_usage() {
        let (cache, _worker, store) = cache();
        let now = Utc::now();
        let mut confident = NewCacheEntry {
            fingerprint_hash: "hash".to_string(),
            analysis_type: AnalysisType::ErrorAnalysis,
            provider: "p".to_string(),
            model: "large".to_string(),
            analysis_result: json!({"summary": "confident"}),
            prompt_hash: prompt_hash("p"),
            confidence_score: 0.95,
            is_public: true,
            project_id: Some(1),
            prompt_tokens: 0,
            completion_tokens: 0,
            original_cost_cents: 0.0,
        }
        .into_entry(1, now);
        confident.usage_count = 3;

        let mut popular = confident.clone();
        popular.id = 2;
        popular.model = "small".to_string();
        popular.confidence_score = 0.80;
        popular.usage_count = 50;
        popular.analysis_result = json!({"summary": "popular"});

        store.insert_entry(popular).await;
        store.insert_entry(confident).await;

        let best = cache
            .get_cached_analysis(&lookup(Some(1), true))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(best.confidence_score, 0.95);
        assert_eq!(best.model, "large");
    }

    #[tokio::test]
    async fn test_tie_break_falls_back_to_usage() {
        let now = Utc::now();
        let base = NewCacheEntry {
            fingerprint_hash: "hash".to_string(),
            analysis_type: AnalysisType::ErrorAnalysis,
            provider: "p".to_string(),
            model: "a".to_string(),
            analysis_result: json!({}),
            prompt_hash: String::new(),
            confidence_score: 0.9,
            is_public: true,
            project_id: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            original_cost_cents: 0.0,
        };
        let mut low = base.clone().into_entry(1, now);
        low.usage_count = 2;
        let mut high = base.into_entry(2, now);
        high.usage_count = 7;

        assert_eq!(best_entry(vec![low, high]).unwrap().id, 2);
    }

    #[tokio::test]
    async fn test_cache_analysis_seeds_counters() {
        let (cache, _worker, _) = cache();
        let entry = cache
            .cache_analysis("hash", AnalysisType::ErrorAnalysis, json!({"summary": "s"}), options(9, false))
            .await
            .unwrap();

        assert_eq!(entry.usage_count, 1);
        assert_eq!(entry.feedback_count, 0);
        assert_eq!(entry.projects_used, BTreeSet::from([9]));
        assert_eq!(entry.prompt_hash, prompt_hash("analyze this error"));
        assert!(entry.original_cost_cents > 0.0);
        assert_eq!(entry.confidence_score, 0.5);
    }

    #[tokio::test]
    async fn test_public_flag_defaults_to_classifier() {
        let (cache, _worker, _) = cache();
        let mut opts = options(1, false);
        opts.is_public = None;
        opts.error_patterns = vec!["TypeError".to_string(), "Cannot read property".to_string()];
        let entry = cache
            .cache_analysis("hash", AnalysisType::ErrorAnalysis, json!({}), opts)
            .await
            .unwrap();
        assert!(entry.is_public);

        let mut opts = options(1, false);
        opts.is_public = None;
        opts.error_patterns = vec!["AcmeBillingReconcileFailure".to_string()];
        let entry = cache
            .cache_analysis("hash", AnalysisType::SuggestedFix, json!({}), opts)
            .await
            .unwrap();
        assert!(!entry.is_public);
    }

    #[tokio::test]
    async fn test_feedback_running_average() {
        let (cache, _worker, store) = cache();
        let mut entry = cache
            .cache_analysis("hash", AnalysisType::ErrorAnalysis, json!({}), options(1, false))
            .await
            .unwrap();
        entry.avg_feedback_score = 4.0;
        entry.feedback_count = 3;
        store.insert_entry(entry).await;

        let updated = cache
            .submit_feedback("hash", AnalysisType::ErrorAnalysis, 2.0)
            .await
            .unwrap();
        assert!((updated.avg_feedback_score - 3.5).abs() < 1e-9);
        assert_eq!(updated.feedback_count, 4);
    }

    #[tokio::test]
    async fn test_feedback_without_entry() {
        let (cache, _worker, _) = cache();
        let result = cache
            .submit_feedback("missing", AnalysisType::ErrorAnalysis, 5.0)
            .await;
        assert!(matches!(result, Err(CacheError::EntryNotFound)));
    }

    #[tokio::test]
    async fn test_hit_written_back_by_worker() {
        let (cache, worker, store) = cache();
        cache
            .cache_analysis("hash", AnalysisType::ErrorAnalysis, json!({}), options(1, true))
            .await
            .unwrap();

        cache.get_cached_analysis(&lookup(Some(2), true)).await.unwrap();
        cache.get_cached_analysis(&lookup(Some(2), true)).await.unwrap();

        // Closing the channel lets the worker drain and stop
        drop(cache);
        worker.run().await;

        let entry = store
            .find_entries("hash", AnalysisType::ErrorAnalysis)
            .await
            .unwrap()
            .remove(0);
        assert_eq!(entry.usage_count, 3);
        assert_eq!(entry.tokens_saved, 3000);
        assert!((entry.cost_saved_cents - 2.0 * entry.original_cost_cents).abs() < 1e-9);
        assert_eq!(entry.projects_used, BTreeSet::from([1, 2]));
    }

    #[tokio::test]
    async fn test_recache_keeps_usage_and_resets_feedback() {
        let (cache, _worker, store) = cache();
        let first = cache
            .cache_analysis("hash", AnalysisType::ErrorAnalysis, json!({"v": 1}), options(1, false))
            .await
            .unwrap();
        store.record_hit(&CacheHit { entry_id: first.id, project_id: Some(1), at: Utc::now() }).await.unwrap();
        store.record_feedback(first.id, 5.0).await.unwrap();

        let second = cache
            .cache_analysis("hash", AnalysisType::ErrorAnalysis, json!({"v": 2}), options(3, false))
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.analysis_result, json!({"v": 2}));
        assert_eq!(second.usage_count, 2);
        assert_eq!(second.feedback_count, 0);
        assert_eq!(second.projects_used, BTreeSet::from([1, 3]));
    }

    #[tokio::test]
    async fn test_stats() {
        let (cache, _worker, store) = cache();
        let entry = cache
            .cache_analysis("a", AnalysisType::ErrorAnalysis, json!({}), options(1, true))
            .await
            .unwrap();
        cache
            .cache_analysis("b", AnalysisType::ErrorAnalysis, json!({}), options(1, false))
            .await
            .unwrap();
        store.record_feedback(entry.id, 4.0).await.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.public_entries, 1);
        assert_eq!(stats.total_usage, 2);
        assert!((stats.avg_feedback_score - 4.0).abs() < 1e-9);
    }
}
