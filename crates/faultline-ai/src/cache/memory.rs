use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{AnalysisCacheStore, AnalysisType, CacheEntry, CacheHit, CacheStats, NewCacheEntry};
use crate::error::CacheError;

#[derive(Default)]
struct State {
    next_id: i32,
    entries: Vec<CacheEntry>,
}

/// Process-local cache store for tests and single-node development
#[derive(Default)]
pub struct InMemoryCacheStore {
    state: RwLock<State>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `entry` as-is, replacing any entry with the same id
    pub async fn insert_entry(&self, entry: CacheEntry) {
        let mut state = self.state.write().await;
        state.next_id = state.next_id.max(entry.id);
        match state.entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => state.entries.push(entry),
        }
    }
}

#[async_trait]
impl AnalysisCacheStore for InMemoryCacheStore {
    async fn find_entries(
        &self,
        fingerprint_hash: &str,
        analysis_type: AnalysisType,
    ) -> Result<Vec<CacheEntry>, CacheError> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.fingerprint_hash == fingerprint_hash && e.analysis_type == analysis_type)
            .cloned()
            .collect())
    }

    async fn upsert_entry(&self, entry: NewCacheEntry) -> Result<CacheEntry, CacheError> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let owner_project_id = entry.owner_project_id();
        if let Some(existing) = state.entries.iter_mut().find(|e| {
            e.fingerprint_hash == entry.fingerprint_hash
                && e.analysis_type == entry.analysis_type
                && e.provider == entry.provider
                && e.model == entry.model
                && e.owner_project_id == owner_project_id
        }) {
            existing.replace_with(&entry, now);
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let stored = entry.into_entry(state.next_id, now);
        state.entries.push(stored.clone());
        Ok(stored)
    }

    async fn record_hit(&self, hit: &CacheHit) -> Result<(), CacheError> {
        let mut state = self.state.write().await;
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.id == hit.entry_id)
            .ok_or(CacheError::EntryNotFound)?;
        entry.apply_hit(hit.project_id, hit.at);
        Ok(())
    }

    async fn record_feedback(&self, entry_id: i32, score: f64) -> Result<CacheEntry, CacheError> {
        let mut state = self.state.write().await;
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.id == entry_id)
            .ok_or(CacheError::EntryNotFound)?;
        entry.apply_feedback(score);
        Ok(entry.clone())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let state = self.state.read().await;
        let mut stats = CacheStats::default();
        let mut feedback_sum = 0.0;
        let mut feedback_count = 0i64;

        for entry in &state.entries {
            stats.total_entries += 1;
            if entry.is_public {
                stats.public_entries += 1;
            }
            stats.total_usage += entry.usage_count;
            stats.tokens_saved += entry.tokens_saved;
            stats.cost_saved_cents += entry.cost_saved_cents;
            feedback_sum += entry.avg_feedback_score * entry.feedback_count as f64;
            feedback_count += entry.feedback_count;
        }
        if feedback_count > 0 {
            stats.avg_feedback_score = feedback_sum / feedback_count as f64;
        }
        Ok(stats)
    }
}
