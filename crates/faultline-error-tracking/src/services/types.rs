use std::fmt;
use std::str::FromStr;

use axum::{http::StatusCode, response::IntoResponse, Json};
use chrono::Duration;
use faultline_ai::{AiError, CacheError, ErrorAnalysis};
use faultline_core::{QueueError, UtcDateTime};
use faultline_entities::error_events::UserContext;
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Group titles are cut to this many characters
pub const TITLE_MAX_CHARS: usize = 100;

#[derive(Error, Debug)]
pub enum ErrorTrackingError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Error event not found")]
    EventNotFound,

    #[error("Error group not found")]
    GroupNotFound,

    #[error("Project not found")]
    ProjectNotFound,

    #[error("Invalid project ID or authentication")]
    Unauthorized,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("AI analysis error: {0}")]
    Ai(#[from] AiError),

    #[error("Analysis cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Storage error: {0}")]
    Storage(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for ErrorTrackingError {
    fn into_response(self) -> axum::response::Response {
        let (status, error, details) = match &self {
            ErrorTrackingError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error",
                    Some(e.to_string()),
                )
            }
            ErrorTrackingError::EventNotFound => {
                (StatusCode::NOT_FOUND, "Error event not found", None)
            }
            ErrorTrackingError::GroupNotFound => {
                (StatusCode::NOT_FOUND, "Error group not found", None)
            }
            ErrorTrackingError::ProjectNotFound => {
                (StatusCode::NOT_FOUND, "Project not found", None)
            }
            ErrorTrackingError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Invalid project ID or authentication",
                None,
            ),
            ErrorTrackingError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "Validation error", Some(msg.clone()))
            }
            ErrorTrackingError::Queue(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Queue unavailable",
                Some(e.to_string()),
            ),
            ErrorTrackingError::Ai(e) => (
                StatusCode::BAD_GATEWAY,
                "AI provider error",
                Some(e.to_string()),
            ),
            ErrorTrackingError::Cache(CacheError::EntryNotFound) => {
                (StatusCode::NOT_FOUND, "Cached analysis not found", None)
            }
            ErrorTrackingError::Cache(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Analysis cache error",
                Some(e.to_string()),
            ),
            ErrorTrackingError::Storage(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Storage error",
                Some(msg.clone()),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: error.to_string(),
                details,
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Fatal,
    Error,
    Warning,
    Info,
    Debug,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Fatal => "fatal",
            EventLevel::Error => "error",
            EventLevel::Warning => "warning",
            EventLevel::Info => "info",
            EventLevel::Debug => "debug",
        }
    }

    /// SDK level strings; anything unrecognized is treated as `error`
    pub fn from_sdk(level: Option<&str>) -> Self {
        level
            .and_then(|l| l.parse().ok())
            .unwrap_or(EventLevel::Error)
    }

    /// Levels that count toward high-volume alerts
    pub fn is_high_severity(&self) -> bool {
        matches!(self, EventLevel::Fatal | EventLevel::Error)
    }
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fatal" | "critical" => Ok(EventLevel::Fatal),
            "error" => Ok(EventLevel::Error),
            "warning" | "warn" => Ok(EventLevel::Warning),
            "info" | "log" => Ok(EventLevel::Info),
            "debug" => Ok(EventLevel::Debug),
            other => Err(format!("unknown event level '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    #[default]
    Unresolved,
    Resolved,
    Ignored,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupStatus::Unresolved => "unresolved",
            GroupStatus::Resolved => "resolved",
            GroupStatus::Ignored => "ignored",
        }
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unresolved" => Ok(GroupStatus::Unresolved),
            "resolved" => Ok(GroupStatus::Resolved),
            "ignored" => Ok(GroupStatus::Ignored),
            other => Err(format!(
                "unknown status '{}', expected unresolved, resolved or ignored",
                other
            )),
        }
    }
}

/// A single occurrence of an error, as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// 32-char lowercase hex
    pub id: String,
    pub project_id: i32,
    pub group_id: Option<i32>,
    pub has_been_processed: bool,
    pub timestamp: UtcDateTime,
    pub received_at: UtcDateTime,
    pub level: EventLevel,
    pub message: String,
    pub error_type: String,
    pub exception_type: Option<String>,
    pub exception_value: Option<String>,
    pub exception_module: Option<String>,
    pub fingerprint: Vec<String>,
    pub platform: String,
    pub environment: String,
    pub release: Option<String>,
    pub sdk_name: Option<String>,
    pub sdk_version: Option<String>,
    pub server_name: Option<String>,
    pub transaction: Option<String>,
    pub handled: bool,
    pub sample_rate: f64,
    pub user: Option<UserContext>,
    pub tags: Option<serde_json::Value>,
    pub extra: Option<serde_json::Value>,
    pub breadcrumbs: Option<serde_json::Value>,
    pub contexts: Option<serde_json::Value>,
    pub request: Option<serde_json::Value>,
    pub stack_trace: Option<serde_json::Value>,
}

impl ErrorEvent {
    /// Key used for distinct-user counting
    pub fn user_key(&self) -> Option<String> {
        self.user.as_ref().and_then(UserContext::identity)
    }

    pub fn title(&self) -> String {
        group_title(
            self.exception_type.as_deref(),
            self.exception_value.as_deref(),
            &self.message,
        )
    }
}

/// `"{type}: {value}"` when the exception carries both, otherwise the message,
/// truncated to [`TITLE_MAX_CHARS`] characters.
pub fn group_title(
    exception_type: Option<&str>,
    exception_value: Option<&str>,
    message: &str,
) -> String {
    let title = match (exception_type, exception_value) {
        (Some(ty), Some(value)) if !ty.is_empty() && !value.is_empty() => {
            format!("{}: {}", ty, value)
        }
        _ => message.to_string(),
    };
    title.chars().take(TITLE_MAX_CHARS).collect()
}

/// Rolling counts computed from the event store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStats {
    pub event_count: i64,
    pub user_count: i64,
    pub count_24h: i64,
    pub count_7d: i64,
    pub count_30d: i64,
}

impl GroupStats {
    pub fn snapshot(&self, computed_at: UtcDateTime) -> GroupStatsSnapshot {
        GroupStatsSnapshot {
            count_24h: self.count_24h,
            count_7d: self.count_7d,
            count_30d: self.count_30d,
            computed_at,
        }
    }
}

/// Cutoffs for the rolling windows in [`GroupStats`]
pub fn stats_windows(now: UtcDateTime) -> [UtcDateTime; 3] {
    [
        now - Duration::hours(24),
        now - Duration::days(7),
        now - Duration::days(30),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStatsSnapshot {
    pub count_24h: i64,
    pub count_7d: i64,
    pub count_30d: i64,
    pub computed_at: UtcDateTime,
}

/// Keys of `error_groups.metadata` owned by [`GroupMetadata`]'s typed fields
const TYPED_METADATA_KEYS: [&str; 5] = [
    "ai_analysis",
    "last_analysis_date",
    "last_analysis_count",
    "stats",
    "last_spike_alert",
];

/// Typed view of `error_groups.metadata`.
///
/// Keys this crate does not own are kept in `extra` and written back untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<ErrorAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_analysis_date: Option<UtcDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_analysis_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<GroupStatsSnapshot>,
    /// When the last spike alert went out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_spike_alert: Option<UtcDateTime>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn take_typed<T: serde::de::DeserializeOwned>(
    object: &mut serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Option<T> {
    let value = object.remove(key)?;
    if value.is_null() {
        return None;
    }
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!(key, "Dropping unreadable group metadata key: {}", e);
            None
        }
    }
}

impl GroupMetadata {
    /// Never fails. A typed key that does not parse is dropped, so the next
    /// write replaces it; everything else lands in `extra`.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut object = match value {
            serde_json::Value::Object(object) => object.clone(),
            serde_json::Value::Null => return Self::default(),
            other => {
                tracing::warn!("Group metadata is not an object, ignoring: {}", other);
                return Self::default();
            }
        };
        GroupMetadata {
            ai_analysis: take_typed(&mut object, "ai_analysis"),
            last_analysis_date: take_typed(&mut object, "last_analysis_date"),
            last_analysis_count: take_typed(&mut object, "last_analysis_count"),
            stats: take_typed(&mut object, "stats"),
            last_spike_alert: take_typed(&mut object, "last_spike_alert"),
            extra: object,
        }
    }

    /// Typed fields always win over same-named keys in `extra`
    pub fn to_json(&self) -> serde_json::Value {
        let mut clean = self.clone();
        clean
            .extra
            .retain(|key, _| !TYPED_METADATA_KEYS.contains(&key.as_str()));
        serde_json::to_value(&clean)
            .unwrap_or_else(|_| serde_json::Value::Object(Default::default()))
    }

    /// Writes one sub-key, leaving its siblings alone
    pub fn apply(&mut self, patch: MetadataPatch) {
        match patch {
            MetadataPatch::Stats(snapshot) => self.stats = Some(snapshot),
            MetadataPatch::Analysis {
                analysis,
                analyzed_at,
                event_count,
            } => {
                self.ai_analysis = Some(analysis);
                self.last_analysis_date = Some(analyzed_at);
                self.last_analysis_count = Some(event_count);
            }
            MetadataPatch::SpikeAlerted(at) => self.last_spike_alert = Some(at),
            MetadataPatch::Extra { key, value } => {
                self.extra.insert(key, value);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetadataPatch {
    Stats(GroupStatsSnapshot),
    Analysis {
        analysis: ErrorAnalysis,
        analyzed_at: UtcDateTime,
        event_count: i64,
    },
    SpikeAlerted(UtcDateTime),
    Extra {
        key: String,
        value: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorGroup {
    pub id: i32,
    pub project_id: i32,
    pub fingerprint_hash: String,
    pub fingerprint: Vec<String>,
    pub title: String,
    pub error_type: String,
    pub message: String,
    pub platform: String,
    pub first_seen: UtcDateTime,
    pub last_seen: UtcDateTime,
    pub status: GroupStatus,
    pub event_count: i64,
    pub user_count: i64,
    pub ai_summary: Option<String>,
    pub metadata: GroupMetadata,
    pub created_at: UtcDateTime,
    pub updated_at: UtcDateTime,
}

impl ErrorGroup {
    /// Counts only grow: a snapshot computed before a concurrent worker's
    /// refresh is older than what is stored and leaves the group untouched.
    pub(crate) fn apply_stats(&mut self, stats: &GroupStats, now: UtcDateTime) {
        if stats.event_count < self.event_count {
            return;
        }
        self.event_count = stats.event_count;
        self.user_count = self.user_count.max(stats.user_count);
        self.metadata.apply(MetadataPatch::Stats(stats.snapshot(now)));
        self.updated_at = now;
    }

    pub(crate) fn apply_analysis(
        &mut self,
        analysis: &ErrorAnalysis,
        analyzed_at: UtcDateTime,
        event_count: i64,
    ) {
        self.ai_summary = Some(analysis.summary.clone());
        self.metadata.apply(MetadataPatch::Analysis {
            analysis: analysis.clone(),
            analyzed_at,
            event_count,
        });
        self.updated_at = analyzed_at;
    }

    /// `last_seen` only moves forward
    pub(crate) fn touch(&mut self, seen_at: UtcDateTime, now: UtcDateTime) {
        if seen_at > self.last_seen {
            self.last_seen = seen_at;
        }
        self.updated_at = now;
    }
}

/// Everything needed to insert a group for an event's fingerprint
#[derive(Debug, Clone, PartialEq)]
pub struct NewErrorGroup {
    pub project_id: i32,
    pub fingerprint_hash: String,
    pub fingerprint: Vec<String>,
    pub title: String,
    pub error_type: String,
    pub message: String,
    pub platform: String,
    pub first_seen: UtcDateTime,
}

impl NewErrorGroup {
    pub fn from_event(event: &ErrorEvent, fingerprint_hash: String) -> Self {
        Self {
            project_id: event.project_id,
            fingerprint_hash,
            fingerprint: event.fingerprint.clone(),
            title: event.title(),
            error_type: event.error_type.clone(),
            message: event.message.clone(),
            platform: event.platform.clone(),
            first_seen: event.timestamp,
        }
    }

    pub(crate) fn into_group(self, id: i32, now: UtcDateTime) -> ErrorGroup {
        ErrorGroup {
            id,
            project_id: self.project_id,
            fingerprint_hash: self.fingerprint_hash,
            fingerprint: self.fingerprint,
            title: self.title,
            error_type: self.error_type,
            message: self.message,
            platform: self.platform,
            first_seen: self.first_seen,
            last_seen: self.first_seen,
            status: GroupStatus::Unresolved,
            event_count: 0,
            user_count: 0,
            ai_summary: None,
            metadata: GroupMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Error, Debug)]
pub enum CreateGroupError {
    #[error("Error group already exists for this fingerprint")]
    AlreadyExists,
    #[error(transparent)]
    Other(#[from] ErrorTrackingError),
}

impl From<DbErr> for CreateGroupError {
    fn from(e: DbErr) -> Self {
        CreateGroupError::Other(ErrorTrackingError::Database(e))
    }
}

/// How find-or-create resolved the group
#[derive(Debug, Clone, PartialEq)]
pub enum FindOrCreate {
    Created(ErrorGroup),
    Found(ErrorGroup),
    /// Lost the insert race and re-read the winner's row
    ConflictRetried(ErrorGroup),
}

impl FindOrCreate {
    pub fn group(&self) -> &ErrorGroup {
        match self {
            FindOrCreate::Created(g) | FindOrCreate::Found(g) | FindOrCreate::ConflictRetried(g) => g,
        }
    }

    pub fn into_group(self) -> ErrorGroup {
        match self {
            FindOrCreate::Created(g) | FindOrCreate::Found(g) | FindOrCreate::ConflictRetried(g) => g,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, FindOrCreate::Created(_))
    }

    pub fn kind(&self) -> GroupOutcome {
        match self {
            FindOrCreate::Created(_) => GroupOutcome::Created,
            FindOrCreate::Found(_) => GroupOutcome::Found,
            FindOrCreate::ConflictRetried(_) => GroupOutcome::ConflictRetried,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GroupOutcome {
    Created,
    Found,
    ConflictRetried,
}

#[derive(Debug, Clone, Default)]
pub struct GroupFilter {
    pub project_id: i32,
    pub status: Option<GroupStatus>,
    pub page: u64,
    pub page_size: u64,
    /// `last_seen` (default), `first_seen`, `event_count` or `created_at`
    pub sort_by: Option<String>,
    pub ascending: bool,
}

impl GroupFilter {
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1) * self.page_size
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub project_id: i32,
    pub group_id: Option<i32>,
    pub from: Option<UtcDateTime>,
    pub to: Option<UtcDateTime>,
    pub level: Option<EventLevel>,
    pub environment: Option<String>,
    /// Case-insensitive substring of message or error type
    pub search: Option<String>,
    pub limit: u64,
    pub offset: u64,
}

pub const MAX_EVENT_PAGE_SIZE: u64 = 100;

impl EventQuery {
    pub fn effective_limit(&self) -> u64 {
        self.limit.clamp(1, MAX_EVENT_PAGE_SIZE)
    }

    pub fn matches(&self, event: &ErrorEvent) -> bool {
        if event.project_id != self.project_id {
            return false;
        }
        if self.group_id.is_some() && event.group_id != self.group_id {
            return false;
        }
        if self.from.is_some_and(|from| event.timestamp < from) {
            return false;
        }
        if self.to.is_some_and(|to| event.timestamp >= to) {
            return false;
        }
        if self.level.is_some_and(|level| event.level != level) {
            return false;
        }
        if let Some(env) = &self.environment {
            if &event.environment != env {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            if !event.message.to_lowercase().contains(&needle)
                && !event.error_type.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBucketPoint {
    pub bucket: UtcDateTime,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopErrorType {
    pub error_type: String,
    pub count: i64,
    pub last_seen: UtcDateTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventSummary {
    pub total_events: i64,
    pub unprocessed_events: i64,
    pub unique_groups: i64,
    pub unique_users: i64,
    pub high_severity_events: i64,
}

/// Start of the bucket containing `at`, aligned to the unix epoch
pub fn bucket_start(at: UtcDateTime, bucket: Duration) -> UtcDateTime {
    let width = bucket.num_seconds().max(1);
    let secs = at.timestamp().div_euclid(width) * width;
    chrono::DateTime::from_timestamp(secs, 0).unwrap_or(at)
}

/// Adds zero-count points so every bucket in `[from, to)` is present
pub fn fill_buckets(
    from: UtcDateTime,
    to: UtcDateTime,
    bucket: Duration,
    points: &[TimeBucketPoint],
) -> Vec<TimeBucketPoint> {
    let width = if bucket.num_seconds() > 0 {
        bucket
    } else {
        Duration::hours(1)
    };
    let mut filled = Vec::new();
    let mut cursor = bucket_start(from, width);
    while cursor < to {
        let count = points
            .iter()
            .filter(|p| p.bucket == cursor)
            .map(|p| p.count)
            .sum();
        filled.push(TimeBucketPoint {
            bucket: cursor,
            count,
        });
        cursor += width;
    }
    filled
}
