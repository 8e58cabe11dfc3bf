//! Alert intents raised by the processing pipeline.
//!
//! Evaluation is pure; delivery goes through an [`AlertDispatcher`].

use async_trait::async_trait;
use faultline_core::UtcDateTime;
use serde::Serialize;
use tracing::info;

use super::types::{ErrorGroup, ErrorTrackingError, EventLevel};

/// Hourly count must reach this multiple of the previous hour
pub const SPIKE_FACTOR: i64 = 10;

/// A group raises at most one spike alert per window of this length
pub fn spike_cooldown() -> chrono::Duration {
    chrono::Duration::hours(1)
}

/// High-severity groups alert every time their count crosses a multiple of this
pub const HIGH_VOLUME_STEP: i64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertIntent {
    NewGroup,
    Spike { last_hour: i64, previous_hour: i64 },
    HighVolume { event_count: i64 },
}

/// What the pipeline knows about a group after refreshing its stats
#[derive(Debug, Clone, Copy)]
pub struct AlertInput {
    pub created: bool,
    pub level: EventLevel,
    pub event_count: i64,
    /// `None` when the hourly counts could not be read
    pub hourly: Option<(i64, i64)>,
    pub last_spike_alert: Option<UtcDateTime>,
    pub now: UtcDateTime,
}

pub fn evaluate_alerts(input: &AlertInput) -> Vec<AlertIntent> {
    let mut intents = Vec::new();

    if input.created {
        intents.push(AlertIntent::NewGroup);
    }

    let spike_recently_alerted = input
        .last_spike_alert
        .is_some_and(|at| input.now - at < spike_cooldown());
    if let Some((last_hour, previous_hour)) = input.hourly.filter(|_| !spike_recently_alerted) {
        if previous_hour > 0 && last_hour >= previous_hour.saturating_mul(SPIKE_FACTOR) {
            intents.push(AlertIntent::Spike {
                last_hour,
                previous_hour,
            });
        }
    }

    if input.level.is_high_severity()
        && input.event_count > 0
        && input.event_count % HIGH_VOLUME_STEP == 0
    {
        intents.push(AlertIntent::HighVolume {
            event_count: input.event_count,
        });
    }

    intents
}

#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn dispatch(&self, group: &ErrorGroup, intent: &AlertIntent) -> Result<(), ErrorTrackingError>;
}

/// Writes alerts to the log; the default when no notifier is configured
pub struct LoggingAlertDispatcher;

#[async_trait]
impl AlertDispatcher for LoggingAlertDispatcher {
    async fn dispatch(&self, group: &ErrorGroup, intent: &AlertIntent) -> Result<(), ErrorTrackingError> {
        match intent {
            AlertIntent::NewGroup => info!(
                project_id = group.project_id,
                group_id = group.id,
                "New error group: {}",
                group.title
            ),
            AlertIntent::Spike {
                last_hour,
                previous_hour,
            } => info!(
                project_id = group.project_id,
                group_id = group.id,
                last_hour,
                previous_hour,
                "Error spike: {}",
                group.title
            ),
            AlertIntent::HighVolume { event_count } => info!(
                project_id = group.project_id,
                group_id = group.id,
                event_count,
                "High volume error group: {}",
                group.title
            ),
        }
        Ok(())
    }
}
