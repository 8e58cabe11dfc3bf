use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use faultline_core::UtcDateTime;
use faultline_entities::ai_analysis_cache;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, FromQueryResult,
    QueryFilter, QuerySelect, Set, SqlErr, Statement, TransactionTrait,
};
use tracing::debug;

use super::{AnalysisCacheStore, AnalysisType, CacheEntry, CacheHit, CacheStats, NewCacheEntry};
use crate::error::CacheError;

/// Cache store backed by the `ai_analysis_cache` table
pub struct SeaOrmCacheStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmCacheStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn try_upsert(&self, entry: &NewCacheEntry) -> Result<CacheEntry, CacheError> {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let existing = ai_analysis_cache::Entity::find()
            .filter(ai_analysis_cache::Column::FingerprintHash.eq(entry.fingerprint_hash.as_str()))
            .filter(ai_analysis_cache::Column::AnalysisType.eq(entry.analysis_type.as_str()))
            .filter(ai_analysis_cache::Column::Provider.eq(entry.provider.as_str()))
            .filter(ai_analysis_cache::Column::Model.eq(entry.model.as_str()))
            .filter(ai_analysis_cache::Column::OwnerProjectId.eq(entry.owner_project_id()))
            .lock_exclusive()
            .one(&txn)
            .await?;

        let model = match existing {
            Some(row) => {
                let mut current = entry_from_model(row.clone())?;
                current.replace_with(entry, now);
                let mut active: ai_analysis_cache::ActiveModel = row.into();
                write_entry(&mut active, &current, now);
                active.update(&txn).await?
            }
            None => {
                let fresh = entry.clone().into_entry(0, now);
                let mut active = ai_analysis_cache::ActiveModel {
                    fingerprint_hash: Set(fresh.fingerprint_hash.clone()),
                    analysis_type: Set(fresh.analysis_type.as_str().to_string()),
                    provider: Set(fresh.provider.clone()),
                    model: Set(fresh.model.clone()),
                    owner_project_id: Set(fresh.owner_project_id),
                    created_at: Set(now),
                    ..Default::default()
                };
                write_entry(&mut active, &fresh, now);
                active.insert(&txn).await?
            }
        };

        txn.commit().await?;
        entry_from_model(model)
    }

    async fn update_locked<F>(&self, entry_id: i32, apply: F) -> Result<CacheEntry, CacheError>
    where
        F: FnOnce(&mut CacheEntry) + Send,
    {
        let now = Utc::now();
        let txn = self.db.begin().await?;

        let row = ai_analysis_cache::Entity::find_by_id(entry_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or(CacheError::EntryNotFound)?;

        let mut entry = entry_from_model(row.clone())?;
        apply(&mut entry);

        let mut active: ai_analysis_cache::ActiveModel = row.into();
        write_entry(&mut active, &entry, now);
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        entry_from_model(updated)
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn entry_from_model(model: ai_analysis_cache::Model) -> Result<CacheEntry, CacheError> {
    let analysis_type = model
        .analysis_type
        .parse::<AnalysisType>()
        .map_err(|reason| CacheError::Corrupt {
            id: model.id,
            reason,
        })?;
    let projects_used: BTreeSet<i32> = model.project_ids().into_iter().collect();

    Ok(CacheEntry {
        id: model.id,
        fingerprint_hash: model.fingerprint_hash,
        analysis_type,
        provider: model.provider,
        model: model.model,
        owner_project_id: model.owner_project_id,
        analysis_result: model.analysis_result,
        prompt_hash: model.prompt_hash,
        confidence_score: model.confidence_score,
        is_public: model.is_public,
        usage_count: model.usage_count,
        last_used_at: model.last_used_at,
        projects_used,
        avg_feedback_score: model.avg_feedback_score,
        feedback_count: model.feedback_count,
        prompt_tokens: model.prompt_tokens,
        completion_tokens: model.completion_tokens,
        original_cost_cents: model.original_cost_cents,
        tokens_saved: model.tokens_saved,
        cost_saved_cents: model.cost_saved_cents,
        created_at: model.created_at,
    })
}

/// Copies every mutable field of `entry` onto the active model
fn write_entry(active: &mut ai_analysis_cache::ActiveModel, entry: &CacheEntry, now: UtcDateTime) {
    active.analysis_result = Set(entry.analysis_result.clone());
    active.prompt_hash = Set(entry.prompt_hash.clone());
    active.confidence_score = Set(entry.confidence_score);
    active.is_public = Set(entry.is_public);
    active.usage_count = Set(entry.usage_count);
    active.last_used_at = Set(entry.last_used_at);
    active.projects_used = Set(serde_json::json!(entry.projects_used));
    active.avg_feedback_score = Set(entry.avg_feedback_score);
    active.feedback_count = Set(entry.feedback_count);
    active.prompt_tokens = Set(entry.prompt_tokens);
    active.completion_tokens = Set(entry.completion_tokens);
    active.original_cost_cents = Set(entry.original_cost_cents);
    active.tokens_saved = Set(entry.tokens_saved);
    active.cost_saved_cents = Set(entry.cost_saved_cents);
    active.updated_at = Set(now);
}

#[derive(Debug, FromQueryResult)]
struct StatsRow {
    total_entries: i64,
    public_entries: i64,
    total_usage: i64,
    tokens_saved: i64,
    cost_saved_cents: f64,
    feedback_sum: f64,
    feedback_count: i64,
}

#[async_trait]
impl AnalysisCacheStore for SeaOrmCacheStore {
    async fn find_entries(
        &self,
        fingerprint_hash: &str,
        analysis_type: AnalysisType,
    ) -> Result<Vec<CacheEntry>, CacheError> {
        let rows = ai_analysis_cache::Entity::find()
            .filter(ai_analysis_cache::Column::FingerprintHash.eq(fingerprint_hash))
            .filter(ai_analysis_cache::Column::AnalysisType.eq(analysis_type.as_str()))
            .all(self.db.as_ref())
            .await?;

        rows.into_iter().map(entry_from_model).collect()
    }

    async fn upsert_entry(&self, entry: NewCacheEntry) -> Result<CacheEntry, CacheError> {
        match self.try_upsert(&entry).await {
            Err(CacheError::Database(e)) if is_unique_violation(&e) => {
                debug!(
                    fingerprint_hash = %entry.fingerprint_hash,
                    "Concurrent cache insert, retrying as update"
                );
                self.try_upsert(&entry).await
            }
            other => other,
        }
    }

    async fn record_hit(&self, hit: &CacheHit) -> Result<(), CacheError> {
        let project_id = hit.project_id;
        let at = hit.at;
        self.update_locked(hit.entry_id, move |entry| entry.apply_hit(project_id, at))
            .await
            .map(|_| ())
    }

    async fn record_feedback(&self, entry_id: i32, score: f64) -> Result<CacheEntry, CacheError> {
        self.update_locked(entry_id, move |entry| entry.apply_feedback(score))
            .await
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let row = StatsRow::find_by_statement(Statement::from_string(
            self.db.get_database_backend(),
            r#"
            SELECT
                COUNT(*)::BIGINT AS total_entries,
                COUNT(*) FILTER (WHERE is_public)::BIGINT AS public_entries,
                COALESCE(SUM(usage_count), 0)::BIGINT AS total_usage,
                COALESCE(SUM(tokens_saved), 0)::BIGINT AS tokens_saved,
                COALESCE(SUM(cost_saved_cents), 0)::DOUBLE PRECISION AS cost_saved_cents,
                COALESCE(SUM(avg_feedback_score * feedback_count), 0)::DOUBLE PRECISION AS feedback_sum,
                COALESCE(SUM(feedback_count), 0)::BIGINT AS feedback_count
            FROM ai_analysis_cache
            "#,
        ))
        .one(self.db.as_ref())
        .await?;

        let Some(row) = row else {
            return Ok(CacheStats::default());
        };

        Ok(CacheStats {
            total_entries: row.total_entries,
            public_entries: row.public_entries,
            total_usage: row.total_usage,
            tokens_saved: row.tokens_saved,
            cost_saved_cents: row.cost_saved_cents,
            avg_feedback_score: if row.feedback_count > 0 {
                row.feedback_sum / row.feedback_count as f64
            } else {
                0.0
            },
        })
    }
}
