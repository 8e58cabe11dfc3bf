use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use faultline_ai::ErrorAnalysis;
use faultline_core::UtcDateTime;
use faultline_entities::error_groups;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};

use super::group_repository::GroupRepository;
use super::types::{
    CreateGroupError, ErrorGroup, ErrorTrackingError, GroupFilter, GroupMetadata, GroupStats,
    GroupStatus, MetadataPatch, NewErrorGroup,
};

/// Group repository backed by `error_groups`.
///
/// Creation relies on `idx_error_groups_project_fingerprint`; every other
/// mutation reads the row under `SELECT ... FOR UPDATE` so concurrent
/// pipeline runs never lose each other's writes.
pub struct SeaOrmGroupRepository {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmGroupRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn update_locked<F>(&self, group_id: i32, apply: F) -> Result<ErrorGroup, ErrorTrackingError>
    where
        F: FnOnce(&mut ErrorGroup) + Send,
    {
        let txn = self.db.begin().await?;

        let row = error_groups::Entity::find_by_id(group_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or(ErrorTrackingError::GroupNotFound)?;

        let mut group = from_model(row.clone());
        apply(&mut group);

        let mut active: error_groups::ActiveModel = row.into();
        write_group(&mut active, &group);
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        Ok(from_model(updated))
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn from_model(model: error_groups::Model) -> ErrorGroup {
    let fingerprint = model.fingerprint_tokens();
    let metadata = GroupMetadata::from_json(&model.metadata);
    let status = model.status.parse().unwrap_or_else(|e| {
        tracing::warn!(group_id = model.id, "{}", e);
        GroupStatus::Unresolved
    });

    ErrorGroup {
        id: model.id,
        project_id: model.project_id,
        fingerprint_hash: model.fingerprint_hash,
        fingerprint,
        title: model.title,
        error_type: model.error_type,
        message: model.message,
        platform: model.platform,
        first_seen: model.first_seen,
        last_seen: model.last_seen,
        status,
        event_count: model.event_count,
        user_count: model.user_count,
        ai_summary: model.ai_summary,
        metadata,
        created_at: model.created_at,
        updated_at: model.updated_at,
    }
}

/// Copies the mutable columns of `group` onto the active model
fn write_group(active: &mut error_groups::ActiveModel, group: &ErrorGroup) {
    active.last_seen = Set(group.last_seen);
    active.status = Set(group.status.as_str().to_string());
    active.event_count = Set(group.event_count);
    active.user_count = Set(group.user_count);
    active.ai_summary = Set(group.ai_summary.clone());
    active.metadata = Set(group.metadata.to_json());
    active.updated_at = Set(group.updated_at);
}

#[async_trait]
impl GroupRepository for SeaOrmGroupRepository {
    async fn find_by_fingerprint(
        &self,
        project_id: i32,
        fingerprint_hash: &str,
    ) -> Result<Option<ErrorGroup>, ErrorTrackingError> {
        let model = error_groups::Entity::find()
            .filter(error_groups::Column::ProjectId.eq(project_id))
            .filter(error_groups::Column::FingerprintHash.eq(fingerprint_hash))
            .one(self.db.as_ref())
            .await?;
        Ok(model.map(from_model))
    }

    async fn get(&self, project_id: i32, group_id: i32) -> Result<ErrorGroup, ErrorTrackingError> {
        error_groups::Entity::find_by_id(group_id)
            .filter(error_groups::Column::ProjectId.eq(project_id))
            .one(self.db.as_ref())
            .await?
            .map(from_model)
            .ok_or(ErrorTrackingError::GroupNotFound)
    }

    async fn create_group(&self, group: NewErrorGroup) -> Result<ErrorGroup, CreateGroupError> {
        let now = Utc::now();
        let active = error_groups::ActiveModel {
            project_id: Set(group.project_id),
            fingerprint_hash: Set(group.fingerprint_hash),
            fingerprint: Set(serde_json::json!(group.fingerprint)),
            title: Set(group.title),
            error_type: Set(group.error_type),
            message: Set(group.message),
            platform: Set(group.platform),
            first_seen: Set(group.first_seen),
            last_seen: Set(group.first_seen),
            status: Set(GroupStatus::Unresolved.as_str().to_string()),
            event_count: Set(0),
            user_count: Set(0),
            ai_summary: Set(None),
            metadata: Set(serde_json::json!({})),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        match active.insert(self.db.as_ref()).await {
            Ok(model) => Ok(from_model(model)),
            Err(e) if is_unique_violation(&e) => Err(CreateGroupError::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_last_seen(
        &self,
        group_id: i32,
        seen_at: UtcDateTime,
    ) -> Result<ErrorGroup, ErrorTrackingError> {
        let now = Utc::now();
        self.update_locked(group_id, |g| g.touch(seen_at, now)).await
    }

    async fn update_statistics(
        &self,
        group_id: i32,
        stats: &GroupStats,
        now: UtcDateTime,
    ) -> Result<ErrorGroup, ErrorTrackingError> {
        let stats = *stats;
        self.update_locked(group_id, |g| g.apply_stats(&stats, now))
            .await
    }

    async fn merge_metadata(
        &self,
        group_id: i32,
        patch: MetadataPatch,
    ) -> Result<ErrorGroup, ErrorTrackingError> {
        let now = Utc::now();
        self.update_locked(group_id, |g| {
            g.metadata.apply(patch);
            g.updated_at = now;
        })
        .await
    }

    async fn record_analysis(
        &self,
        group_id: i32,
        analysis: &ErrorAnalysis,
        analyzed_at: UtcDateTime,
        event_count: i64,
    ) -> Result<ErrorGroup, ErrorTrackingError> {
        let analysis = analysis.clone();
        self.update_locked(group_id, |g| {
            g.apply_analysis(&analysis, analyzed_at, event_count)
        })
        .await
    }

    async fn list_groups(
        &self,
        filter: &GroupFilter,
    ) -> Result<(Vec<ErrorGroup>, u64), ErrorTrackingError> {
        let mut select = error_groups::Entity::find()
            .filter(error_groups::Column::ProjectId.eq(filter.project_id));
        if let Some(status) = filter.status {
            select = select.filter(error_groups::Column::Status.eq(status.as_str()));
        }

        let total = select.clone().count(self.db.as_ref()).await?;

        let column = match filter.sort_by.as_deref().unwrap_or("last_seen") {
            "first_seen" => error_groups::Column::FirstSeen,
            "event_count" => error_groups::Column::EventCount,
            "created_at" => error_groups::Column::CreatedAt,
            _ => error_groups::Column::LastSeen,
        };
        select = if filter.ascending {
            select.order_by_asc(column)
        } else {
            select.order_by_desc(column)
        };

        let models = select
            .order_by_asc(error_groups::Column::Id)
            .offset(filter.offset())
            .limit(filter.page_size)
            .all(self.db.as_ref())
            .await?;

        Ok((models.into_iter().map(from_model).collect(), total))
    }

    async fn update_status(
        &self,
        project_id: i32,
        group_id: i32,
        status: GroupStatus,
    ) -> Result<ErrorGroup, ErrorTrackingError> {
        // Scope check before taking the lock
        self.get(project_id, group_id).await?;
        let now = Utc::now();
        self.update_locked(group_id, |g| {
            g.status = status;
            g.updated_at = now;
        })
        .await
    }
}
