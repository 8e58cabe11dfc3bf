use std::sync::Arc;

use chrono::Duration;
use faultline_ai::{AnalysisCache, AnalysisType, CacheEntry, CacheStats};
use faultline_core::{JobQueue, PaginationParams, TimeRange, UtcDateTime};

use super::error_ingestion_service::{ErrorIngestionService, StoredEvent};
use super::event_store::EventStore;
use super::group_repository::GroupRepository;
use super::similarity::{SimilarGroup, SimilarityIndex};
use super::types::*;
use crate::sentry::types::SentryEventPayload;

/// Feedback scores must fall in this range
pub const MAX_FEEDBACK_SCORE: f64 = 5.0;

/// Upper bound on points in one time series response
pub const MAX_TIME_SERIES_POINTS: i64 = 5000;

/// Parses `1h`, `15m`, `1d`, `1w` or `30 minutes` style bucket sizes.
///
/// Anything unrecognised falls back to one hour.
pub fn parse_bucket_interval(bucket: &str) -> Duration {
    let bucket = bucket.trim().to_lowercase();

    let (amount, unit) = match bucket.split_once(' ') {
        Some((amount, unit)) => (amount.trim(), unit.trim()),
        None => {
            let split = bucket
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(bucket.len());
            bucket.split_at(split)
        }
    };

    let Ok(amount) = amount.parse::<i64>() else {
        return Duration::hours(1);
    };
    if amount <= 0 {
        return Duration::hours(1);
    }

    match unit.trim_end_matches('s') {
        "m" | "min" | "minute" => Duration::minutes(amount),
        "h" | "hour" => Duration::hours(amount),
        "d" | "day" => Duration::days(amount),
        "w" | "week" => Duration::weeks(amount),
        _ => Duration::hours(1),
    }
}

/// Facade over ingestion and the read side of the store.
///
/// Handlers go through this service; processing runs separately in
/// [`ErrorProcessingService`](super::ErrorProcessingService).
pub struct ErrorTrackingService {
    pub ingestion: ErrorIngestionService,
    events: Arc<dyn EventStore>,
    groups: Arc<dyn GroupRepository>,
    similarity: Option<Arc<dyn SimilarityIndex>>,
    analysis_cache: Option<Arc<AnalysisCache>>,
}

impl ErrorTrackingService {
    pub fn new(
        events: Arc<dyn EventStore>,
        groups: Arc<dyn GroupRepository>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            ingestion: ErrorIngestionService::new(events.clone(), queue),
            events,
            groups,
            similarity: None,
            analysis_cache: None,
        }
    }

    pub fn with_ingestion(mut self, ingestion: ErrorIngestionService) -> Self {
        self.ingestion = ingestion;
        self
    }

    pub fn with_similarity_index(mut self, index: Arc<dyn SimilarityIndex>) -> Self {
        self.similarity = Some(index);
        self
    }

    pub fn with_analysis_cache(mut self, cache: Arc<AnalysisCache>) -> Self {
        self.analysis_cache = Some(cache);
        self
    }

    /// Store a Sentry payload (delegates to ingestion service)
    pub async fn store_from_payload(
        &self,
        project_id: i32,
        payload: SentryEventPayload,
    ) -> Result<StoredEvent, ErrorTrackingError> {
        self.ingestion.store_from_payload(project_id, payload).await
    }

    pub async fn list_error_groups(
        &self,
        project_id: i32,
        pagination: &PaginationParams,
        status: Option<&str>,
    ) -> Result<(Vec<ErrorGroup>, u64), ErrorTrackingError> {
        let status = status
            .map(|s| s.parse::<GroupStatus>())
            .transpose()
            .map_err(ErrorTrackingError::Validation)?;
        let (page, page_size) = pagination.normalize();

        self.groups
            .list_groups(&GroupFilter {
                project_id,
                status,
                page,
                page_size,
                sort_by: pagination.sort_by.clone(),
                ascending: pagination.is_ascending(),
            })
            .await
    }

    pub async fn get_error_group(
        &self,
        project_id: i32,
        group_id: i32,
    ) -> Result<ErrorGroup, ErrorTrackingError> {
        self.groups.get(project_id, group_id).await
    }

    pub async fn update_error_group_status(
        &self,
        project_id: i32,
        group_id: i32,
        status: &str,
    ) -> Result<ErrorGroup, ErrorTrackingError> {
        let status = status
            .parse::<GroupStatus>()
            .map_err(ErrorTrackingError::Validation)?;
        self.groups.update_status(project_id, group_id, status).await
    }

    /// Events linked to one group, newest first
    pub async fn list_group_events(
        &self,
        project_id: i32,
        group_id: i32,
        pagination: &PaginationParams,
    ) -> Result<(Vec<ErrorEvent>, u64), ErrorTrackingError> {
        self.groups.get(project_id, group_id).await?;
        let (_, page_size) = pagination.normalize();
        self.events
            .query(&EventQuery {
                project_id,
                group_id: Some(group_id),
                limit: page_size,
                offset: pagination.offset(),
                ..Default::default()
            })
            .await
    }

    pub async fn list_error_events(
        &self,
        query: &EventQuery,
    ) -> Result<(Vec<ErrorEvent>, u64), ErrorTrackingError> {
        if let (Some(from), Some(to)) = (query.from, query.to) {
            if from >= to {
                return Err(ErrorTrackingError::Validation(
                    "Start time must be before end time".to_string(),
                ));
            }
        }
        self.events.query(query).await
    }

    pub async fn get_error_event(
        &self,
        project_id: i32,
        event_id: &str,
    ) -> Result<ErrorEvent, ErrorTrackingError> {
        self.events
            .get(project_id, event_id)
            .await?
            .ok_or(ErrorTrackingError::EventNotFound)
    }

    /// Event counts per bucket, with empty buckets filled in
    pub async fn get_error_time_series(
        &self,
        project_id: i32,
        start_time: UtcDateTime,
        end_time: UtcDateTime,
        bucket: &str,
    ) -> Result<Vec<TimeBucketPoint>, ErrorTrackingError> {
        let range = checked_range(start_time, end_time)?;
        let width = parse_bucket_interval(bucket);
        let points = (end_time - start_time).num_seconds() / width.num_seconds().max(1);
        if points > MAX_TIME_SERIES_POINTS {
            return Err(ErrorTrackingError::Validation(format!(
                "Requested {} buckets, at most {} are allowed",
                points, MAX_TIME_SERIES_POINTS
            )));
        }

        let counted = self.events.time_buckets(project_id, range, width).await?;
        Ok(fill_buckets(start_time, end_time, width, &counted))
    }

    pub async fn top_error_types(
        &self,
        project_id: i32,
        start_time: UtcDateTime,
        end_time: UtcDateTime,
        limit: u64,
    ) -> Result<Vec<TopErrorType>, ErrorTrackingError> {
        let range = checked_range(start_time, end_time)?;
        self.events
            .top_types(project_id, range, limit.clamp(1, MAX_EVENT_PAGE_SIZE))
            .await
    }

    pub async fn event_summary(
        &self,
        project_id: i32,
        start_time: UtcDateTime,
        end_time: UtcDateTime,
    ) -> Result<EventSummary, ErrorTrackingError> {
        let range = checked_range(start_time, end_time)?;
        self.events.summary(project_id, range).await
    }

    /// Empty when no similarity index is configured
    pub async fn similar_groups(
        &self,
        project_id: i32,
        group_id: i32,
        limit: usize,
    ) -> Result<Vec<SimilarGroup>, ErrorTrackingError> {
        self.groups.get(project_id, group_id).await?;
        match &self.similarity {
            Some(index) => index.similar_to(project_id, group_id, limit.clamp(1, 50)).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn submit_analysis_feedback(
        &self,
        fingerprint_hash: &str,
        analysis_type: AnalysisType,
        score: f64,
    ) -> Result<CacheEntry, ErrorTrackingError> {
        if !score.is_finite() || !(0.0..=MAX_FEEDBACK_SCORE).contains(&score) {
            return Err(ErrorTrackingError::Validation(format!(
                "Feedback score must be between 0 and {}",
                MAX_FEEDBACK_SCORE
            )));
        }
        let cache = self.require_cache()?;
        Ok(cache
            .submit_feedback(fingerprint_hash, analysis_type, score)
            .await?)
    }

    pub async fn analysis_cache_stats(&self) -> Result<CacheStats, ErrorTrackingError> {
        Ok(self.require_cache()?.stats().await?)
    }

    fn require_cache(&self) -> Result<&Arc<AnalysisCache>, ErrorTrackingError> {
        self.analysis_cache.as_ref().ok_or_else(|| {
            ErrorTrackingError::Validation("AI analysis is not configured".to_string())
        })
    }
}

fn checked_range(start: UtcDateTime, end: UtcDateTime) -> Result<TimeRange, ErrorTrackingError> {
    if start >= end {
        return Err(ErrorTrackingError::Validation(
            "Start time must be before end time".to_string(),
        ));
    }
    Ok(TimeRange::new(start, end))
}
