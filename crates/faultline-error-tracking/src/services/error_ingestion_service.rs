use std::sync::Arc;

use chrono::Utc;
use faultline_core::{Job, JobQueue, ProcessErrorEventJob};
use tracing::{debug, info, warn};

use super::event_store::EventStore;
use super::types::{ErrorEvent, ErrorTrackingError};
use crate::fingerprint::FingerprintStrategy;
use crate::sentry::mapper::map_event;
use crate::sentry::types::SentryEventPayload;

/// Result of accepting one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub id: String,
    /// The id was already stored; nothing was written or enqueued
    pub duplicate: bool,
}

/// Persists raw events and hands them to the processing pipeline.
///
/// Grouping never happens here. The event is stored first; a failed enqueue is
/// logged and the event stays unprocessed until [`requeue_unprocessed`] picks it
/// up again.
///
/// [`requeue_unprocessed`]: ErrorIngestionService::requeue_unprocessed
pub struct ErrorIngestionService {
    events: Arc<dyn EventStore>,
    queue: Arc<dyn JobQueue>,
    strategy: FingerprintStrategy,
}

impl ErrorIngestionService {
    pub fn new(events: Arc<dyn EventStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            events,
            queue,
            strategy: FingerprintStrategy::default(),
        }
    }

    pub fn with_fingerprint_strategy(mut self, strategy: FingerprintStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn fingerprint_strategy(&self) -> FingerprintStrategy {
        self.strategy
    }

    /// Maps a Sentry payload and stores it
    pub async fn store_from_payload(
        &self,
        project_id: i32,
        payload: SentryEventPayload,
    ) -> Result<StoredEvent, ErrorTrackingError> {
        let event = map_event(project_id, payload, Utc::now(), self.strategy)
            .map_err(|e| ErrorTrackingError::Validation(e.to_string()))?;
        self.store_event(event).await
    }

    pub async fn store_event(&self, event: ErrorEvent) -> Result<StoredEvent, ErrorTrackingError> {
        if event.platform.trim().is_empty() {
            return Err(ErrorTrackingError::Validation(
                "Event is missing a platform".to_string(),
            ));
        }
        if event.fingerprint.is_empty() {
            return Err(ErrorTrackingError::Validation(
                "Event has an empty fingerprint".to_string(),
            ));
        }

        let inserted = self.events.insert(&event).await?;
        if !inserted {
            debug!(
                event_id = %event.id,
                project_id = event.project_id,
                "Duplicate event id, skipping"
            );
            return Ok(StoredEvent {
                id: event.id,
                duplicate: true,
            });
        }

        let job = Job::ProcessErrorEvent(ProcessErrorEventJob {
            event_id: event.id.clone(),
            project_id: event.project_id,
        });
        if let Err(e) = self.queue.send(job).await {
            warn!(
                event_id = %event.id,
                project_id = event.project_id,
                "Stored event but failed to enqueue processing: {}",
                e
            );
        }

        Ok(StoredEvent {
            id: event.id,
            duplicate: false,
        })
    }

    /// Enqueues again up to `limit` events that were stored but never
    /// processed, oldest first. Events received within `min_age` are left
    /// alone since their original job is most likely still queued.
    ///
    /// Returns how many jobs were sent. Reprocessing is idempotent, so a job
    /// that was only slow rather than lost does no harm.
    pub async fn requeue_unprocessed(
        &self,
        limit: u64,
        min_age: chrono::Duration,
    ) -> Result<usize, ErrorTrackingError> {
        let cutoff = Utc::now() - min_age;
        let pending = self.events.unprocessed(limit).await?;

        let mut sent = 0;
        for event in pending.iter().filter(|e| e.received_at <= cutoff) {
            self.queue
                .send(Job::ProcessErrorEvent(ProcessErrorEventJob {
                    event_id: event.id.clone(),
                    project_id: event.project_id,
                }))
                .await?;
            sent += 1;
        }

        if sent > 0 {
            info!(count = sent, "Re-enqueued unprocessed error events");
        }
        Ok(sent)
    }
}
