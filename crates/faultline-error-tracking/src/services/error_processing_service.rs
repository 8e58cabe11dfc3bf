//! Asynchronous processing of stored events.
//!
//! For each event: resolve its group, link the event, refresh group stats,
//! optionally run AI analysis and similarity indexing, raise alerts, and
//! finally mark the event processed. Reprocessing an event is idempotent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use faultline_ai::{AnalysisRequest, ErrorAnalysisService};
use faultline_core::{Job, TimeRange, UtcDateTime};
use faultline_queue::JobHandler;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::alerts::{evaluate_alerts, AlertDispatcher, AlertInput, AlertIntent, LoggingAlertDispatcher};
use super::event_store::EventStore;
use super::group_repository::GroupRepository;
use super::similarity::SimilarityIndex;
use super::types::{
    ErrorEvent, ErrorGroup, ErrorTrackingError, GroupOutcome, MetadataPatch, NewErrorGroup,
};
use crate::fingerprint::fingerprint_hash;

/// Similarity indexing also runs whenever the event count hits a multiple of this
pub const REINDEX_EVERY: i64 = 100;

#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    /// Upper bound for the whole AI step
    pub ai_timeout: Duration,
    pub index_timeout: Duration,
    /// Upper bound for delivering one alert
    pub alert_timeout: Duration,
    /// Re-analyze once the last analysis is older than this
    pub reanalysis_interval: chrono::Duration,
    /// Re-analyze once the count reaches this multiple of the analyzed count
    pub reanalysis_growth_factor: i64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            ai_timeout: Duration::from_secs(45),
            index_timeout: Duration::from_secs(10),
            alert_timeout: Duration::from_secs(10),
            reanalysis_interval: chrono::Duration::days(7),
            reanalysis_growth_factor: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingReport {
    pub event_id: String,
    pub group_id: i32,
    pub outcome: GroupOutcome,
    pub event_count: i64,
    pub analyzed: bool,
    pub indexed: bool,
    pub alerts: Vec<AlertIntent>,
}

/// Whether the group's AI summary is missing or stale
pub fn should_trigger_ai_analysis(
    group: &ErrorGroup,
    now: UtcDateTime,
    config: &ProcessingConfig,
) -> bool {
    if group.ai_summary.is_none() {
        return true;
    }
    let (Some(analyzed_at), Some(analyzed_count)) = (
        group.metadata.last_analysis_date,
        group.metadata.last_analysis_count,
    ) else {
        return true;
    };

    let grown = group.event_count
        >= analyzed_count
            .max(1)
            .saturating_mul(config.reanalysis_growth_factor);
    let stale = now - analyzed_at > config.reanalysis_interval;
    grown || stale
}

pub struct ErrorProcessingService {
    events: Arc<dyn EventStore>,
    groups: Arc<dyn GroupRepository>,
    analysis: Option<Arc<ErrorAnalysisService>>,
    similarity: Option<Arc<dyn SimilarityIndex>>,
    alerts: Arc<dyn AlertDispatcher>,
    config: ProcessingConfig,
}

impl ErrorProcessingService {
    pub fn new(events: Arc<dyn EventStore>, groups: Arc<dyn GroupRepository>) -> Self {
        Self {
            events,
            groups,
            analysis: None,
            similarity: None,
            alerts: Arc::new(LoggingAlertDispatcher),
            config: ProcessingConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ProcessingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_analysis(mut self, analysis: Arc<ErrorAnalysisService>) -> Self {
        self.analysis = Some(analysis);
        self
    }

    pub fn with_similarity_index(mut self, index: Arc<dyn SimilarityIndex>) -> Self {
        self.similarity = Some(index);
        self
    }

    pub fn with_alert_dispatcher(mut self, alerts: Arc<dyn AlertDispatcher>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    pub async fn process_event(
        &self,
        event_id: &str,
        project_id: i32,
    ) -> Result<ProcessingReport, ErrorTrackingError> {
        let now = Utc::now();

        // 1. Load
        let event = self
            .events
            .get(project_id, event_id)
            .await?
            .ok_or(ErrorTrackingError::EventNotFound)?;

        // 2-3. Fingerprint and resolve the group
        let hash = fingerprint_hash(&event.fingerprint);
        let resolved = self
            .groups
            .find_or_create(NewErrorGroup::from_event(&event, hash), event.timestamp)
            .await?;
        let outcome = resolved.kind();
        let created = resolved.is_created();
        let group = resolved.into_group();
        debug!(
            event_id,
            group_id = group.id,
            outcome = ?outcome,
            "Resolved error group"
        );

        // 4. Link
        self.events.assign_group(&event.id, group.id).await?;

        // 5. Refresh stats
        let stats = self.events.group_stats(group.id, now).await?;
        let mut group = self.groups.update_statistics(group.id, &stats, now).await?;

        // 6. AI analysis, never fatal
        let mut analyzed = false;
        if let Some(analysis) = &self.analysis {
            if should_trigger_ai_analysis(&group, now, &self.config) {
                if let Some(updated) = self.run_analysis(analysis, &group, &event, now).await {
                    group = updated;
                    analyzed = true;
                }
            }
        }

        // 7. Similarity index, never fatal
        let mut indexed = false;
        if let Some(index) = &self.similarity {
            if created || (group.event_count > 0 && group.event_count % REINDEX_EVERY == 0) {
                indexed = self.run_indexing(index.as_ref(), &group, &event).await;
            }
        }

        // 8. Alerts
        let hourly = self.hourly_counts(group.id, now).await;
        let alerts = evaluate_alerts(&AlertInput {
            created,
            level: event.level,
            event_count: group.event_count,
            hourly,
            last_spike_alert: group.metadata.last_spike_alert,
            now,
        });
        if alerts.iter().any(|a| matches!(a, AlertIntent::Spike { .. })) {
            if let Err(e) = self
                .groups
                .merge_metadata(group.id, MetadataPatch::SpikeAlerted(now))
                .await
            {
                warn!(group_id = group.id, "Failed to record spike alert: {}", e);
            }
        }
        for intent in &alerts {
            self.dispatch_alert(&group, intent).await;
        }

        // 9. Done
        self.events.mark_processed(&event.id).await?;

        Ok(ProcessingReport {
            event_id: event.id,
            group_id: group.id,
            outcome,
            event_count: group.event_count,
            analyzed,
            indexed,
            alerts,
        })
    }

    async fn run_analysis(
        &self,
        analysis: &ErrorAnalysisService,
        group: &ErrorGroup,
        event: &ErrorEvent,
        now: UtcDateTime,
    ) -> Option<ErrorGroup> {
        let request = AnalysisRequest {
            project_id: group.project_id,
            fingerprint_hash: group.fingerprint_hash.clone(),
            title: group.title.clone(),
            error_type: group.error_type.clone(),
            message: group.message.clone(),
            platform: group.platform.clone(),
            stack_trace: event.stack_trace.clone(),
            event_count: group.event_count,
        };

        let result = match tokio::time::timeout(self.config.ai_timeout, analysis.analyze(&request)).await {
            Ok(Ok(Some(result))) => result,
            Ok(Ok(None)) => {
                debug!(group_id = group.id, "AI analysis produced no result");
                return None;
            }
            Ok(Err(e)) => {
                warn!(group_id = group.id, "AI analysis failed: {}", e);
                return None;
            }
            Err(_) => {
                warn!(
                    group_id = group.id,
                    "AI analysis timed out after {:?}", self.config.ai_timeout
                );
                return None;
            }
        };

        match self
            .groups
            .record_analysis(group.id, &result, now, group.event_count)
            .await
        {
            Ok(updated) => {
                info!(group_id = group.id, "Stored AI analysis");
                Some(updated)
            }
            Err(e) => {
                warn!(group_id = group.id, "Failed to store AI analysis: {}", e);
                None
            }
        }
    }

    async fn run_indexing(&self, index: &dyn SimilarityIndex, group: &ErrorGroup, event: &ErrorEvent) -> bool {
        match tokio::time::timeout(self.config.index_timeout, index.index_group(group, event)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(group_id = group.id, "Similarity indexing failed: {}", e);
                false
            }
            Err(_) => {
                warn!(group_id = group.id, "Similarity indexing timed out");
                false
            }
        }
    }

    async fn dispatch_alert(&self, group: &ErrorGroup, intent: &AlertIntent) {
        match tokio::time::timeout(self.config.alert_timeout, self.alerts.dispatch(group, intent)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(group_id = group.id, "Failed to dispatch alert {:?}: {}", intent, e);
            }
            Err(_) => {
                warn!(
                    group_id = group.id,
                    "Alert {:?} timed out after {:?}", intent, self.config.alert_timeout
                );
            }
        }
    }

    /// `(last hour, the hour before)`, or `None` if either count fails
    async fn hourly_counts(&self, group_id: i32, now: UtcDateTime) -> Option<(i64, i64)> {
        let hour = chrono::Duration::hours(1);
        let last = self
            .events
            .count_for_group(group_id, TimeRange::ending_at(now, hour))
            .await;
        let previous = self
            .events
            .count_for_group(group_id, TimeRange::ending_at(now - hour, hour))
            .await;
        match (last, previous) {
            (Ok(last), Ok(previous)) => Some((last, previous)),
            (Err(e), _) | (_, Err(e)) => {
                warn!(group_id, "Skipping spike detection: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl JobHandler for ErrorProcessingService {
    async fn handle(&self, job: Job) -> anyhow::Result<()> {
        match job {
            Job::ProcessErrorEvent(job) => {
                let report = self.process_event(&job.event_id, job.project_id).await?;
                debug!(
                    event_id = %report.event_id,
                    group_id = report.group_id,
                    "Processed error event"
                );
                Ok(())
            }
        }
    }
}
