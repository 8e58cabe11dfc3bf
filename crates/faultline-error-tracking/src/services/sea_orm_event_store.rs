use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use faultline_core::{TimeRange, UtcDateTime};
use faultline_entities::error_events::{self, ErrorEventData};
use sea_orm::prelude::Expr;
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::sea_query::{Cond, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseBackend, DatabaseConnection, DbErr, EntityTrait, FromQueryResult,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, Statement,
};

use super::event_store::EventStore;
use super::types::{
    stats_windows, ErrorEvent, ErrorTrackingError, EventLevel, EventQuery, EventSummary,
    GroupStats, TimeBucketPoint, TopErrorType,
};

pub struct SeaOrmEventStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmEventStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

fn to_active_model(event: &ErrorEvent) -> error_events::ActiveModel {
    let data = ErrorEventData {
        user: event.user.clone(),
        tags: event.tags.clone(),
        extra: event.extra.clone(),
        breadcrumbs: event.breadcrumbs.clone(),
        contexts: event.contexts.clone(),
        request: event.request.clone(),
        stack_trace: event.stack_trace.clone(),
    };

    error_events::ActiveModel {
        id: Set(event.id.clone()),
        project_id: Set(event.project_id),
        group_id: Set(event.group_id),
        has_been_processed: Set(event.has_been_processed),
        timestamp: Set(event.timestamp),
        received_at: Set(event.received_at),
        level: Set(event.level.as_str().to_string()),
        message: Set(event.message.clone()),
        error_type: Set(event.error_type.clone()),
        exception_type: Set(event.exception_type.clone()),
        exception_value: Set(event.exception_value.clone()),
        exception_module: Set(event.exception_module.clone()),
        fingerprint: Set(serde_json::json!(event.fingerprint)),
        platform: Set(event.platform.clone()),
        environment: Set(event.environment.clone()),
        release: Set(event.release.clone()),
        sdk_name: Set(event.sdk_name.clone()),
        sdk_version: Set(event.sdk_version.clone()),
        server_name: Set(event.server_name.clone()),
        transaction: Set(event.transaction.clone()),
        handled: Set(event.handled),
        sample_rate: Set(event.sample_rate),
        user_key: Set(event.user_key()),
        data: Set(data.to_json_value()),
    }
}

fn from_model(model: error_events::Model) -> ErrorEvent {
    let data = model.get_data();
    let fingerprint = model.fingerprint_tokens();

    ErrorEvent {
        level: EventLevel::from_sdk(Some(&model.level)),
        fingerprint,
        id: model.id,
        project_id: model.project_id,
        group_id: model.group_id,
        has_been_processed: model.has_been_processed,
        timestamp: model.timestamp,
        received_at: model.received_at,
        message: model.message,
        error_type: model.error_type,
        exception_type: model.exception_type,
        exception_value: model.exception_value,
        exception_module: model.exception_module,
        platform: model.platform,
        environment: model.environment,
        release: model.release,
        sdk_name: model.sdk_name,
        sdk_version: model.sdk_version,
        server_name: model.server_name,
        transaction: model.transaction,
        handled: model.handled,
        sample_rate: model.sample_rate,
        user: data.user,
        tags: data.tags,
        extra: data.extra,
        breadcrumbs: data.breadcrumbs,
        contexts: data.contexts,
        request: data.request,
        stack_trace: data.stack_trace,
    }
}

/// Escapes LIKE wildcards in user input
fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[derive(Debug, FromQueryResult)]
struct GroupStatsRow {
    event_count: i64,
    user_count: i64,
    count_24h: i64,
    count_7d: i64,
    count_30d: i64,
}

#[derive(Debug, FromQueryResult)]
struct BucketRow {
    bucket: UtcDateTime,
    count: i64,
}

#[derive(Debug, FromQueryResult)]
struct TopTypeRow {
    error_type: String,
    count: i64,
    last_seen: UtcDateTime,
}

#[derive(Debug, FromQueryResult)]
struct SummaryRow {
    total_events: i64,
    unprocessed_events: i64,
    unique_groups: i64,
    unique_users: i64,
    high_severity_events: i64,
}

#[async_trait]
impl EventStore for SeaOrmEventStore {
    async fn insert(&self, event: &ErrorEvent) -> Result<bool, ErrorTrackingError> {
        let result = error_events::Entity::insert(to_active_model(event))
            .on_conflict(
                OnConflict::column(error_events::Column::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .exec(self.db.as_ref())
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(DbErr::RecordNotInserted) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(
        &self,
        project_id: i32,
        event_id: &str,
    ) -> Result<Option<ErrorEvent>, ErrorTrackingError> {
        let model = error_events::Entity::find_by_id(event_id.to_string())
            .filter(error_events::Column::ProjectId.eq(project_id))
            .one(self.db.as_ref())
            .await?;
        Ok(model.map(from_model))
    }

    async fn query(&self, query: &EventQuery) -> Result<(Vec<ErrorEvent>, u64), ErrorTrackingError> {
        let mut select = error_events::Entity::find()
            .filter(error_events::Column::ProjectId.eq(query.project_id));

        if let Some(group_id) = query.group_id {
            select = select.filter(error_events::Column::GroupId.eq(group_id));
        }
        if let Some(from) = query.from {
            select = select.filter(error_events::Column::Timestamp.gte(from));
        }
        if let Some(to) = query.to {
            select = select.filter(error_events::Column::Timestamp.lt(to));
        }
        if let Some(level) = query.level {
            select = select.filter(error_events::Column::Level.eq(level.as_str()));
        }
        if let Some(environment) = &query.environment {
            select = select.filter(error_events::Column::Environment.eq(environment.as_str()));
        }
        if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let pattern = like_pattern(search.trim());
            select = select.filter(
                Cond::any()
                    .add(Expr::col(error_events::Column::Message).ilike(pattern.clone()))
                    .add(Expr::col(error_events::Column::ErrorType).ilike(pattern)),
            );
        }

        let total = select.clone().count(self.db.as_ref()).await?;
        let models = select
            .order_by_desc(error_events::Column::Timestamp)
            .order_by_asc(error_events::Column::Id)
            .offset(query.offset)
            .limit(query.effective_limit())
            .all(self.db.as_ref())
            .await?;

        Ok((models.into_iter().map(from_model).collect(), total))
    }

    async fn assign_group(&self, event_id: &str, group_id: i32) -> Result<(), ErrorTrackingError> {
        let result = error_events::Entity::update_many()
            .col_expr(error_events::Column::GroupId, Expr::value(group_id))
            .filter(error_events::Column::Id.eq(event_id))
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            return Err(ErrorTrackingError::EventNotFound);
        }
        Ok(())
    }

    async fn mark_processed(&self, event_id: &str) -> Result<(), ErrorTrackingError> {
        let result = error_events::Entity::update_many()
            .col_expr(error_events::Column::HasBeenProcessed, Expr::value(true))
            .filter(error_events::Column::Id.eq(event_id))
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            return Err(ErrorTrackingError::EventNotFound);
        }
        Ok(())
    }

    async fn unprocessed(&self, limit: u64) -> Result<Vec<ErrorEvent>, ErrorTrackingError> {
        let models = error_events::Entity::find()
            .filter(error_events::Column::HasBeenProcessed.eq(false))
            .order_by_asc(error_events::Column::ReceivedAt)
            .order_by_asc(error_events::Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await?;
        Ok(models.into_iter().map(from_model).collect())
    }

    async fn group_stats(
        &self,
        group_id: i32,
        now: UtcDateTime,
    ) -> Result<GroupStats, ErrorTrackingError> {
        let [day, week, month] = stats_windows(now);
        let sql = r#"
            SELECT
                COUNT(*)::BIGINT AS event_count,
                COUNT(DISTINCT user_key)::BIGINT AS user_count,
                COUNT(*) FILTER (WHERE timestamp >= $2)::BIGINT AS count_24h,
                COUNT(*) FILTER (WHERE timestamp >= $3)::BIGINT AS count_7d,
                COUNT(*) FILTER (WHERE timestamp >= $4)::BIGINT AS count_30d
            FROM error_events
            WHERE group_id = $1
        "#;

        let row = GroupStatsRow::find_by_statement(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            sql,
            vec![group_id.into(), day.into(), week.into(), month.into()],
        ))
        .one(self.db.as_ref())
        .await?;

        Ok(row
            .map(|r| GroupStats {
                event_count: r.event_count,
                user_count: r.user_count,
                count_24h: r.count_24h,
                count_7d: r.count_7d,
                count_30d: r.count_30d,
            })
            .unwrap_or_default())
    }

    async fn count_for_group(
        &self,
        group_id: i32,
        range: TimeRange,
    ) -> Result<i64, ErrorTrackingError> {
        let count = error_events::Entity::find()
            .filter(error_events::Column::GroupId.eq(group_id))
            .filter(error_events::Column::Timestamp.gte(range.from))
            .filter(error_events::Column::Timestamp.lt(range.to))
            .count(self.db.as_ref())
            .await?;
        Ok(count as i64)
    }

    async fn time_buckets(
        &self,
        project_id: i32,
        range: TimeRange,
        bucket: Duration,
    ) -> Result<Vec<TimeBucketPoint>, ErrorTrackingError> {
        let width = bucket.num_seconds().max(1) as f64;
        let sql = r#"
            SELECT
                to_timestamp(floor(extract(epoch FROM timestamp) / $1) * $1) AS bucket,
                COUNT(*)::BIGINT AS count
            FROM error_events
            WHERE project_id = $2
                AND timestamp >= $3
                AND timestamp < $4
            GROUP BY 1
            ORDER BY 1 ASC
        "#;

        let rows = BucketRow::find_by_statement(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            sql,
            vec![width.into(), project_id.into(), range.from.into(), range.to.into()],
        ))
        .all(self.db.as_ref())
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| TimeBucketPoint {
                bucket: r.bucket,
                count: r.count,
            })
            .collect())
    }

    async fn top_types(
        &self,
        project_id: i32,
        range: TimeRange,
        limit: u64,
    ) -> Result<Vec<TopErrorType>, ErrorTrackingError> {
        let sql = r#"
            SELECT
                error_type,
                COUNT(*)::BIGINT AS count,
                MAX(timestamp) AS last_seen
            FROM error_events
            WHERE project_id = $1
                AND timestamp >= $2
                AND timestamp < $3
            GROUP BY error_type
            ORDER BY count DESC, error_type ASC
            LIMIT $4
        "#;

        let rows = TopTypeRow::find_by_statement(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            sql,
            vec![
                project_id.into(),
                range.from.into(),
                range.to.into(),
                (limit as i64).into(),
            ],
        ))
        .all(self.db.as_ref())
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| TopErrorType {
                error_type: r.error_type,
                count: r.count,
                last_seen: r.last_seen,
            })
            .collect())
    }

    async fn summary(
        &self,
        project_id: i32,
        range: TimeRange,
    ) -> Result<EventSummary, ErrorTrackingError> {
        let sql = r#"
            SELECT
                COUNT(*)::BIGINT AS total_events,
                COUNT(*) FILTER (WHERE NOT has_been_processed)::BIGINT AS unprocessed_events,
                COUNT(DISTINCT group_id)::BIGINT AS unique_groups,
                COUNT(DISTINCT user_key)::BIGINT AS unique_users,
                COUNT(*) FILTER (WHERE level IN ('fatal', 'error'))::BIGINT AS high_severity_events
            FROM error_events
            WHERE project_id = $1
                AND timestamp >= $2
                AND timestamp < $3
        "#;

        let row = SummaryRow::find_by_statement(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            sql,
            vec![project_id.into(), range.from.into(), range.to.into()],
        ))
        .one(self.db.as_ref())
        .await?;

        Ok(row
            .map(|r| EventSummary {
                total_events: r.total_events,
                unprocessed_events: r.unprocessed_events,
                unique_groups: r.unique_groups,
                unique_users: r.unique_users,
                high_severity_events: r.high_severity_events,
            })
            .unwrap_or_default())
    }
}
