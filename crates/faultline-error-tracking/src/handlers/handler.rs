use super::types::AppState;
use crate::services::{
    ErrorEvent, ErrorGroup, ErrorTrackingError, EventLevel, EventQuery, EventSummary, SimilarGroup,
    TimeBucketPoint, TopErrorType,
};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use faultline_ai::{AnalysisType, CacheStats, ErrorAnalysis};
use faultline_core::{DateTime, PaginationParams};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, OpenApi, ToSchema};

#[derive(OpenApi)]
#[openapi(
    paths(
        list_error_groups,
        get_error_group,
        update_error_group,
        list_group_events,
        get_similar_groups,
        list_error_events,
        get_error_event,
        get_error_time_series,
        get_top_error_types,
        get_error_summary,
        submit_analysis_feedback,
        get_analysis_cache_stats,
    ),
    components(schemas(
        ErrorGroupResponse,
        ErrorEventResponse,
        ErrorTimeSeriesDataResponse,
        TopErrorTypeResponse,
        ErrorSummaryResponse,
        UpdateErrorGroupRequest,
        AnalysisFeedbackRequest,
        AnalysisFeedbackResponse,
        PaginatedErrorGroupsResponse,
        PaginatedErrorEventsResponse,
        PaginationMeta,
        SimilarGroup,
        ErrorAnalysis,
        AnalysisType,
        CacheStats,
        EventLevel,
    )),
    tags(
        (name = "error-tracking", description = "Error groups, events and statistics"),
        (name = "ai-cache", description = "AI analysis cache feedback")
    )
)]
pub struct ErrorTrackingApiDoc;

pub fn configure_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/projects/{project_id}/error-groups",
            get(list_error_groups),
        )
        .route(
            "/projects/{project_id}/error-groups/{group_id}",
            get(get_error_group).put(update_error_group),
        )
        .route(
            "/projects/{project_id}/error-groups/{group_id}/events",
            get(list_group_events),
        )
        .route(
            "/projects/{project_id}/error-groups/{group_id}/similar",
            get(get_similar_groups),
        )
        .route("/projects/{project_id}/error-events", get(list_error_events))
        .route(
            "/projects/{project_id}/error-events/{event_id}",
            get(get_error_event),
        )
        .route(
            "/projects/{project_id}/error-time-series",
            get(get_error_time_series),
        )
        .route(
            "/projects/{project_id}/error-top-types",
            get(get_top_error_types),
        )
        .route("/projects/{project_id}/error-summary", get(get_error_summary))
        .route("/ai-cache/feedback", post(submit_analysis_feedback))
        .route("/ai-cache/stats", get(get_analysis_cache_stats))
}

// ===== Request/Response Types =====

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct ListErrorGroupsQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    /// `unresolved`, `resolved` or `ignored`
    pub status: Option<String>,
    /// `last_seen`, `first_seen`, `event_count` or `created_at`
    pub sort_by: Option<String>,
    #[serde(default = "default_sort_order")]
    pub sort_order: String,
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct ListErrorEventsQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct SearchErrorEventsQuery {
    pub start_time: Option<DateTime>,
    pub end_time: Option<DateTime>,
    pub level: Option<String>,
    pub environment: Option<String>,
    /// Case-insensitive match on message or error type
    pub search: Option<String>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct ErrorTimeSeriesQuery {
    pub start_time: DateTime,
    pub end_time: DateTime,
    /// Time bucket size (e.g., "1h", "15m", "1d", "1 hour", "30 minutes")
    #[serde(default = "default_interval")]
    #[schema(example = "1h")]
    pub bucket: String,
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct TimeRangeQuery {
    pub start_time: DateTime,
    pub end_time: DateTime,
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct TopErrorTypesQuery {
    pub start_time: DateTime,
    pub end_time: DateTime,
    #[serde(default = "default_top_limit")]
    pub limit: u64,
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct SimilarGroupsQuery {
    #[serde(default = "default_similar_limit")]
    pub limit: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateErrorGroupRequest {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AnalysisFeedbackRequest {
    pub fingerprint_hash: String,
    #[serde(default = "default_analysis_type")]
    pub analysis_type: AnalysisType,
    /// Between 0 and 5
    pub score: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AnalysisFeedbackResponse {
    pub entry_id: i32,
    pub avg_feedback_score: f64,
    pub feedback_count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorGroupResponse {
    pub id: i32,
    pub project_id: i32,
    pub fingerprint_hash: String,
    pub title: String,
    pub error_type: String,
    pub message: String,
    pub platform: String,
    pub status: String,
    pub first_seen: String,
    pub last_seen: String,
    pub event_count: i64,
    pub user_count: i64,
    pub count_24h: Option<i64>,
    pub count_7d: Option<i64>,
    pub count_30d: Option<i64>,
    pub ai_summary: Option<String>,
    pub ai_analysis: Option<ErrorAnalysis>,
    pub last_analysis_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorEventResponse {
    pub id: String,
    pub project_id: i32,
    pub group_id: Option<i32>,
    pub processed: bool,
    pub timestamp: String,
    pub received_at: String,
    pub level: EventLevel,
    pub error_type: String,
    pub message: String,
    pub platform: String,
    pub environment: String,
    pub release: Option<String>,
    pub transaction: Option<String>,
    pub handled: bool,
    pub fingerprint: Vec<String>,
    pub user: Option<serde_json::Value>,
    pub tags: Option<serde_json::Value>,
    pub contexts: Option<serde_json::Value>,
    pub breadcrumbs: Option<serde_json::Value>,
    pub request: Option<serde_json::Value>,
    pub stack_trace: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorTimeSeriesDataResponse {
    pub timestamp: String,
    pub count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TopErrorTypeResponse {
    pub error_type: String,
    pub count: i64,
    pub last_seen: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorSummaryResponse {
    pub total_events: i64,
    pub unprocessed_events: i64,
    pub unique_groups: i64,
    pub unique_users: i64,
    pub high_severity_events: i64,
    pub start_time: DateTime,
    pub end_time: DateTime,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaginatedErrorGroupsResponse {
    pub data: Vec<ErrorGroupResponse>,
    pub pagination: PaginationMeta,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaginationMeta {
    pub page: u64,
    pub page_size: u64,
    pub total_count: u64,
    pub total_pages: u64,
}

impl PaginationMeta {
    fn new(page: u64, page_size: u64, total_count: u64) -> Self {
        Self {
            page,
            page_size,
            total_count,
            total_pages: total_count.div_ceil(page_size.max(1)),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaginatedErrorEventsResponse {
    pub data: Vec<ErrorEventResponse>,
    pub pagination: PaginationMeta,
}

fn default_page() -> u64 {
    1
}
fn default_page_size() -> u64 {
    20
}
fn default_sort_order() -> String {
    "desc".to_string()
}
fn default_interval() -> String {
    "1h".to_string()
}
fn default_top_limit() -> u64 {
    10
}
fn default_similar_limit() -> usize {
    5
}
fn default_analysis_type() -> AnalysisType {
    AnalysisType::ErrorAnalysis
}

fn pagination(page: u64, page_size: u64) -> PaginationParams {
    PaginationParams {
        page: Some(page),
        page_size: Some(page_size),
        sort_by: None,
        sort_order: None,
    }
}

// ===== Conversions =====

impl From<ErrorGroup> for ErrorGroupResponse {
    fn from(group: ErrorGroup) -> Self {
        let stats = group.metadata.stats;
        Self {
            id: group.id,
            project_id: group.project_id,
            fingerprint_hash: group.fingerprint_hash,
            title: group.title,
            error_type: group.error_type,
            message: group.message,
            platform: group.platform,
            status: group.status.to_string(),
            first_seen: group.first_seen.to_rfc3339(),
            last_seen: group.last_seen.to_rfc3339(),
            event_count: group.event_count,
            user_count: group.user_count,
            count_24h: stats.map(|s| s.count_24h),
            count_7d: stats.map(|s| s.count_7d),
            count_30d: stats.map(|s| s.count_30d),
            ai_summary: group.ai_summary,
            ai_analysis: group.metadata.ai_analysis,
            last_analysis_date: group.metadata.last_analysis_date.map(|d| d.to_rfc3339()),
            created_at: group.created_at.to_rfc3339(),
            updated_at: group.updated_at.to_rfc3339(),
        }
    }
}

impl From<ErrorEvent> for ErrorEventResponse {
    fn from(event: ErrorEvent) -> Self {
        Self {
            user: event.user.and_then(|u| serde_json::to_value(u).ok()),
            id: event.id,
            project_id: event.project_id,
            group_id: event.group_id,
            processed: event.has_been_processed,
            timestamp: event.timestamp.to_rfc3339(),
            received_at: event.received_at.to_rfc3339(),
            level: event.level,
            error_type: event.error_type,
            message: event.message,
            platform: event.platform,
            environment: event.environment,
            release: event.release,
            transaction: event.transaction,
            handled: event.handled,
            fingerprint: event.fingerprint,
            tags: event.tags,
            contexts: event.contexts,
            breadcrumbs: event.breadcrumbs,
            request: event.request,
            stack_trace: event.stack_trace,
        }
    }
}

impl From<TimeBucketPoint> for ErrorTimeSeriesDataResponse {
    fn from(point: TimeBucketPoint) -> Self {
        Self {
            timestamp: point.bucket.to_rfc3339(),
            count: point.count,
        }
    }
}

impl From<TopErrorType> for TopErrorTypeResponse {
    fn from(top: TopErrorType) -> Self {
        Self {
            error_type: top.error_type,
            count: top.count,
            last_seen: top.last_seen.to_rfc3339(),
        }
    }
}

// ===== Handlers =====

/// List error groups for a project
#[utoipa::path(
    get,
    path = "/projects/{project_id}/error-groups",
    responses(
        (status = 200, description = "Paginated list of error groups", body = PaginatedErrorGroupsResponse),
        (status = 400, description = "Invalid status filter"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("project_id" = i32, Path, description = "Project ID"),
        ListErrorGroupsQuery
    ),
    tag = "error-tracking"
)]
pub async fn list_error_groups(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<i32>,
    Query(query): Query<ListErrorGroupsQuery>,
) -> Result<Json<PaginatedErrorGroupsResponse>, ErrorTrackingError> {
    let params = PaginationParams {
        sort_by: query.sort_by,
        sort_order: Some(query.sort_order),
        ..pagination(query.page, query.page_size)
    };
    let (page, page_size) = params.normalize();

    let (groups, total_count) = state
        .error_tracking_service
        .list_error_groups(project_id, &params, query.status.as_deref())
        .await?;

    Ok(Json(PaginatedErrorGroupsResponse {
        data: groups.into_iter().map(ErrorGroupResponse::from).collect(),
        pagination: PaginationMeta::new(page, page_size, total_count),
    }))
}

/// Get a specific error group
#[utoipa::path(
    get,
    path = "/projects/{project_id}/error-groups/{group_id}",
    responses(
        (status = 200, description = "Error group details", body = ErrorGroupResponse),
        (status = 404, description = "Error group not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("project_id" = i32, Path, description = "Project ID"),
        ("group_id" = i32, Path, description = "Error group ID")
    ),
    tag = "error-tracking"
)]
pub async fn get_error_group(
    State(state): State<Arc<AppState>>,
    Path((project_id, group_id)): Path<(i32, i32)>,
) -> Result<Json<ErrorGroupResponse>, ErrorTrackingError> {
    let group = state
        .error_tracking_service
        .get_error_group(project_id, group_id)
        .await?;

    Ok(Json(ErrorGroupResponse::from(group)))
}

/// Update error group status
#[utoipa::path(
    put,
    path = "/projects/{project_id}/error-groups/{group_id}",
    request_body = UpdateErrorGroupRequest,
    responses(
        (status = 200, description = "Updated error group", body = ErrorGroupResponse),
        (status = 400, description = "Unknown status"),
        (status = 404, description = "Error group not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("project_id" = i32, Path, description = "Project ID"),
        ("group_id" = i32, Path, description = "Error group ID")
    ),
    tag = "error-tracking"
)]
pub async fn update_error_group(
    State(state): State<Arc<AppState>>,
    Path((project_id, group_id)): Path<(i32, i32)>,
    Json(request): Json<UpdateErrorGroupRequest>,
) -> Result<Json<ErrorGroupResponse>, ErrorTrackingError> {
    let group = state
        .error_tracking_service
        .update_error_group_status(project_id, group_id, &request.status)
        .await?;

    Ok(Json(ErrorGroupResponse::from(group)))
}

/// List error events for a specific group
#[utoipa::path(
    get,
    path = "/projects/{project_id}/error-groups/{group_id}/events",
    responses(
        (status = 200, description = "Paginated list of error events", body = PaginatedErrorEventsResponse),
        (status = 404, description = "Error group not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("project_id" = i32, Path, description = "Project ID"),
        ("group_id" = i32, Path, description = "Error group ID"),
        ListErrorEventsQuery
    ),
    tag = "error-tracking"
)]
pub async fn list_group_events(
    State(state): State<Arc<AppState>>,
    Path((project_id, group_id)): Path<(i32, i32)>,
    Query(query): Query<ListErrorEventsQuery>,
) -> Result<Json<PaginatedErrorEventsResponse>, ErrorTrackingError> {
    let params = pagination(query.page, query.page_size);
    let (page, page_size) = params.normalize();

    let (events, total_count) = state
        .error_tracking_service
        .list_group_events(project_id, group_id, &params)
        .await?;

    Ok(Json(PaginatedErrorEventsResponse {
        data: events.into_iter().map(ErrorEventResponse::from).collect(),
        pagination: PaginationMeta::new(page, page_size, total_count),
    }))
}

/// Groups whose type and message read alike
#[utoipa::path(
    get,
    path = "/projects/{project_id}/error-groups/{group_id}/similar",
    responses(
        (status = 200, description = "Similar groups, best match first", body = Vec<SimilarGroup>),
        (status = 404, description = "Error group not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("project_id" = i32, Path, description = "Project ID"),
        ("group_id" = i32, Path, description = "Error group ID"),
        SimilarGroupsQuery
    ),
    tag = "error-tracking"
)]
pub async fn get_similar_groups(
    State(state): State<Arc<AppState>>,
    Path((project_id, group_id)): Path<(i32, i32)>,
    Query(query): Query<SimilarGroupsQuery>,
) -> Result<Json<Vec<SimilarGroup>>, ErrorTrackingError> {
    let similar = state
        .error_tracking_service
        .similar_groups(project_id, group_id, query.limit)
        .await?;

    Ok(Json(similar))
}

/// Search a project's events
#[utoipa::path(
    get,
    path = "/projects/{project_id}/error-events",
    responses(
        (status = 200, description = "Matching events, newest first", body = PaginatedErrorEventsResponse),
        (status = 400, description = "Invalid filter"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("project_id" = i32, Path, description = "Project ID"),
        SearchErrorEventsQuery
    ),
    tag = "error-tracking"
)]
pub async fn list_error_events(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<i32>,
    Query(query): Query<SearchErrorEventsQuery>,
) -> Result<Json<PaginatedErrorEventsResponse>, ErrorTrackingError> {
    let level = query
        .level
        .as_deref()
        .map(str::parse::<EventLevel>)
        .transpose()
        .map_err(ErrorTrackingError::Validation)?;
    let params = pagination(query.page, query.page_size);
    let (page, page_size) = params.normalize();

    let (events, total_count) = state
        .error_tracking_service
        .list_error_events(&EventQuery {
            project_id,
            group_id: None,
            from: query.start_time.map(Into::into),
            to: query.end_time.map(Into::into),
            level,
            environment: query.environment,
            search: query.search.filter(|s| !s.trim().is_empty()),
            limit: page_size,
            offset: params.offset(),
        })
        .await?;

    Ok(Json(PaginatedErrorEventsResponse {
        data: events.into_iter().map(ErrorEventResponse::from).collect(),
        pagination: PaginationMeta::new(page, page_size, total_count),
    }))
}

/// Get a specific error event
#[utoipa::path(
    get,
    path = "/projects/{project_id}/error-events/{event_id}",
    responses(
        (status = 200, description = "Error event details", body = ErrorEventResponse),
        (status = 404, description = "Event not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("project_id" = i32, Path, description = "Project ID"),
        ("event_id" = String, Path, description = "Event ID (32 hex characters)")
    ),
    tag = "error-tracking"
)]
pub async fn get_error_event(
    State(state): State<Arc<AppState>>,
    Path((project_id, event_id)): Path<(i32, String)>,
) -> Result<Json<ErrorEventResponse>, ErrorTrackingError> {
    let event = state
        .error_tracking_service
        .get_error_event(project_id, &event_id)
        .await?;

    Ok(Json(ErrorEventResponse::from(event)))
}

/// Get error time series data for charts
#[utoipa::path(
    get,
    path = "/projects/{project_id}/error-time-series",
    responses(
        (status = 200, description = "Error time series data", body = Vec<ErrorTimeSeriesDataResponse>),
        (status = 400, description = "Invalid range"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("project_id" = i32, Path, description = "Project ID"),
        ErrorTimeSeriesQuery
    ),
    tag = "error-tracking"
)]
pub async fn get_error_time_series(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<i32>,
    Query(query): Query<ErrorTimeSeriesQuery>,
) -> Result<Json<Vec<ErrorTimeSeriesDataResponse>>, ErrorTrackingError> {
    let data = state
        .error_tracking_service
        .get_error_time_series(
            project_id,
            query.start_time.into(),
            query.end_time.into(),
            &query.bucket,
        )
        .await?;

    Ok(Json(data.into_iter().map(Into::into).collect()))
}

/// Most frequent error types in a range
#[utoipa::path(
    get,
    path = "/projects/{project_id}/error-top-types",
    responses(
        (status = 200, description = "Error types by event count", body = Vec<TopErrorTypeResponse>),
        (status = 400, description = "Invalid range"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("project_id" = i32, Path, description = "Project ID"),
        TopErrorTypesQuery
    ),
    tag = "error-tracking"
)]
pub async fn get_top_error_types(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<i32>,
    Query(query): Query<TopErrorTypesQuery>,
) -> Result<Json<Vec<TopErrorTypeResponse>>, ErrorTrackingError> {
    let top = state
        .error_tracking_service
        .top_error_types(
            project_id,
            query.start_time.into(),
            query.end_time.into(),
            query.limit,
        )
        .await?;

    Ok(Json(top.into_iter().map(Into::into).collect()))
}

/// Event totals for a range
#[utoipa::path(
    get,
    path = "/projects/{project_id}/error-summary",
    responses(
        (status = 200, description = "Event summary", body = ErrorSummaryResponse),
        (status = 400, description = "Invalid range"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("project_id" = i32, Path, description = "Project ID"),
        TimeRangeQuery
    ),
    tag = "error-tracking"
)]
pub async fn get_error_summary(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<i32>,
    Query(query): Query<TimeRangeQuery>,
) -> Result<Json<ErrorSummaryResponse>, ErrorTrackingError> {
    let EventSummary {
        total_events,
        unprocessed_events,
        unique_groups,
        unique_users,
        high_severity_events,
    } = state
        .error_tracking_service
        .event_summary(project_id, query.start_time.into(), query.end_time.into())
        .await?;

    Ok(Json(ErrorSummaryResponse {
        total_events,
        unprocessed_events,
        unique_groups,
        unique_users,
        high_severity_events,
        start_time: query.start_time,
        end_time: query.end_time,
    }))
}

/// Rate a cached AI analysis
#[utoipa::path(
    post,
    path = "/ai-cache/feedback",
    request_body = AnalysisFeedbackRequest,
    responses(
        (status = 200, description = "Feedback recorded", body = AnalysisFeedbackResponse),
        (status = 400, description = "Score out of range"),
        (status = 404, description = "No cached analysis for this fingerprint"),
        (status = 500, description = "Internal server error")
    ),
    tag = "ai-cache"
)]
pub async fn submit_analysis_feedback(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AnalysisFeedbackRequest>,
) -> Result<Json<AnalysisFeedbackResponse>, ErrorTrackingError> {
    let entry = state
        .error_tracking_service
        .submit_analysis_feedback(&request.fingerprint_hash, request.analysis_type, request.score)
        .await?;

    Ok(Json(AnalysisFeedbackResponse {
        entry_id: entry.id,
        avg_feedback_score: entry.avg_feedback_score,
        feedback_count: entry.feedback_count,
    }))
}

/// AI analysis cache savings
#[utoipa::path(
    get,
    path = "/ai-cache/stats",
    responses(
        (status = 200, description = "Cache statistics", body = CacheStats),
        (status = 400, description = "AI analysis is not configured"),
        (status = 500, description = "Internal server error")
    ),
    tag = "ai-cache"
)]
pub async fn get_analysis_cache_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CacheStats>, ErrorTrackingError> {
    let stats = state.error_tracking_service.analysis_cache_stats().await?;
    Ok(Json(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::event_store::test_support::event;
    use crate::services::{
        ErrorProcessingService, ErrorTrackingService, EventStore, InMemoryEventStore,
        InMemoryGroupRepository,
    };
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use chrono::Utc;
    use faultline_queue::BroadcastQueueService;
    use serde_json::json;

    struct TestContext {
        server: TestServer,
        events: Arc<InMemoryEventStore>,
        processing: ErrorProcessingService,
    }

    fn create_test_context() -> TestContext {
        let events = Arc::new(InMemoryEventStore::new());
        let groups = Arc::new(InMemoryGroupRepository::new());
        let (queue, _) = BroadcastQueueService::create_job_queue_arc_with_receiver(16);
        let service = Arc::new(ErrorTrackingService::new(events.clone(), groups.clone(), queue));
        let app = configure_routes().with_state(Arc::new(AppState {
            error_tracking_service: service,
        }));
        TestContext {
            server: TestServer::new(app).expect("Failed to create test server"),
            processing: ErrorProcessingService::new(events.clone(), groups),
            events,
        }
    }

    async fn seed_processed(ctx: &TestContext, id: &str) -> i32 {
        let at = (Utc::now() - chrono::Duration::minutes(5)).to_rfc3339();
        ctx.events.insert(&event(id, 1, &at)).await.unwrap();
        ctx.processing.process_event(id, 1).await.unwrap().group_id
    }

    #[tokio::test]
    async fn test_list_and_get_groups() {
        let ctx = create_test_context();
        let group_id = seed_processed(&ctx, "e1").await;

        let response = ctx.server.get("/projects/1/error-groups").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: serde_json::Value = response.json();
        assert_eq!(body["pagination"]["total_count"], 1);
        assert_eq!(body["pagination"]["total_pages"], 1);
        assert_eq!(body["data"][0]["title"], "ReferenceError: x is not defined");
        assert_eq!(body["data"][0]["status"], "unresolved");
        assert_eq!(body["data"][0]["count_24h"], 1);

        let response = ctx
            .server
            .get(&format!("/projects/1/error-groups/{}", group_id))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let response = ctx
            .server
            .get(&format!("/projects/2/error-groups/{}", group_id))
            .await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_group_status() {
        let ctx = create_test_context();
        let group_id = seed_processed(&ctx, "e1").await;
        let path = format!("/projects/1/error-groups/{}", group_id);

        let response = ctx.server.put(&path).json(&json!({"status": "resolved"})).await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: serde_json::Value = response.json();
        assert_eq!(body["status"], "resolved");

        let response = ctx.server.put(&path).json(&json!({"status": "snoozed"})).await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let response = ctx
            .server
            .get("/projects/1/error-groups")
            .add_query_param("status", "unresolved")
            .await;
        let body: serde_json::Value = response.json();
        assert_eq!(body["pagination"]["total_count"], 0);
    }

    #[tokio::test]
    async fn test_group_events_and_event_lookup() {
        let ctx = create_test_context();
        let group_id = seed_processed(&ctx, "e1").await;
        seed_processed(&ctx, "e2").await;

        let response = ctx
            .server
            .get(&format!("/projects/1/error-groups/{}/events", group_id))
            .await;
        let body: serde_json::Value = response.json();
        assert_eq!(body["pagination"]["total_count"], 2);
        assert_eq!(body["data"][0]["processed"], true);

        let response = ctx.server.get("/projects/1/error-events/e2").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: serde_json::Value = response.json();
        assert_eq!(body["group_id"], group_id);

        let response = ctx.server.get("/projects/1/error-events/missing").await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_event_search_filters() {
        let ctx = create_test_context();
        seed_processed(&ctx, "e1").await;

        let response = ctx
            .server
            .get("/projects/1/error-events")
            .add_query_param("search", "NOT DEFINED")
            .add_query_param("level", "error")
            .await;
        let body: serde_json::Value = response.json();
        assert_eq!(body["pagination"]["total_count"], 1);

        let response = ctx
            .server
            .get("/projects/1/error-events")
            .add_query_param("level", "verbose")
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_range_endpoints() {
        let ctx = create_test_context();
        seed_processed(&ctx, "e1").await;
        let start = (Utc::now() - chrono::Duration::hours(3)).to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let end = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

        let response = ctx
            .server
            .get("/projects/1/error-time-series")
            .add_query_param("start_time", &start)
            .add_query_param("end_time", &end)
            .add_query_param("bucket", "1h")
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Vec<serde_json::Value> = response.json();
        let total: i64 = body.iter().map(|p| p["count"].as_i64().unwrap()).sum();
        assert_eq!(total, 1);

        let response = ctx
            .server
            .get("/projects/1/error-top-types")
            .add_query_param("start_time", &start)
            .add_query_param("end_time", &end)
            .await;
        let body: serde_json::Value = response.json();
        assert_eq!(body[0]["error_type"], "ReferenceError");

        let response = ctx
            .server
            .get("/projects/1/error-summary")
            .add_query_param("start_time", &start)
            .add_query_param("end_time", &end)
            .await;
        let body: serde_json::Value = response.json();
        assert_eq!(body["total_events"], 1);
        assert_eq!(body["unprocessed_events"], 0);

        let response = ctx
            .server
            .get("/projects/1/error-summary")
            .add_query_param("start_time", &end)
            .add_query_param("end_time", &start)
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_similar_groups_without_index() {
        let ctx = create_test_context();
        let group_id = seed_processed(&ctx, "e1").await;
        let response = ctx
            .server
            .get(&format!("/projects/1/error-groups/{}/similar", group_id))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Vec<serde_json::Value> = response.json();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_feedback_requires_configured_cache() {
        let ctx = create_test_context();
        let response = ctx
            .server
            .post("/ai-cache/feedback")
            .json(&json!({"fingerprint_hash": "abc", "score": 4.0}))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }
}
