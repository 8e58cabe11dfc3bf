use super::*;
use crate::services::event_store::InMemoryEventStore;
use async_trait::async_trait;
use faultline_core::{JobReceiver, QueueError};
use faultline_queue::BroadcastQueueService;
use serde_json::json;

/// Queue whose sends always fail
struct ClosedQueue;

#[async_trait]
impl JobQueue for ClosedQueue {
    async fn send(&self, _job: Job) -> Result<(), QueueError> {
        Err(QueueError::ChannelClosed)
    }

    fn subscribe(&self) -> Box<dyn JobReceiver> {
        unreachable!("not subscribed in tests")
    }
}

fn payload(value: serde_json::Value) -> SentryEventPayload {
    serde_json::from_value(value).unwrap()
}

fn reference_error() -> SentryEventPayload {
    payload(json!({
        "event_id": "9ec79c33ec9942ab8353589fcb2e04dc",
        "platform": "javascript",
        "message": "x is not defined",
        "exception": {"values": [{"type": "ReferenceError", "value": "x is not defined"}]}
    }))
}

#[tokio::test]
async fn test_store_persists_and_enqueues() {
    let events = Arc::new(InMemoryEventStore::new());
    let (queue, mut receiver) = BroadcastQueueService::create_job_queue_arc_with_receiver(16);
    let service = ErrorIngestionService::new(events.clone(), queue);

    let stored = service.store_from_payload(7, reference_error()).await.unwrap();
    assert_eq!(stored.id, "9ec79c33ec9942ab8353589fcb2e04dc");
    assert!(!stored.duplicate);

    let event = events.get(7, &stored.id).await.unwrap().unwrap();
    assert!(!event.has_been_processed);
    assert!(event.group_id.is_none());

    match receiver.recv().await.unwrap() {
        Job::ProcessErrorEvent(job) => {
            assert_eq!(job.event_id, stored.id);
            assert_eq!(job.project_id, 7);
        }
    }
}

#[tokio::test]
async fn test_duplicate_event_is_not_reenqueued() {
    let events = Arc::new(InMemoryEventStore::new());
    let (queue, mut receiver) = BroadcastQueueService::create_job_queue_arc_with_receiver(16);
    let service = ErrorIngestionService::new(events.clone(), queue);

    service.store_from_payload(7, reference_error()).await.unwrap();
    let again = service.store_from_payload(7, reference_error()).await.unwrap();
    assert!(again.duplicate);
    assert_eq!(events.len().await, 1);

    receiver.recv().await.unwrap();
    assert!(receiver.try_recv().is_err());
}

#[tokio::test]
async fn test_enqueue_failure_still_stores() {
    let events = Arc::new(InMemoryEventStore::new());
    let service = ErrorIngestionService::new(events.clone(), Arc::new(ClosedQueue));

    let stored = service.store_from_payload(7, reference_error()).await.unwrap();
    assert!(events.get(7, &stored.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_missing_platform_is_rejected() {
    let events = Arc::new(InMemoryEventStore::new());
    let (queue, _receiver) = BroadcastQueueService::create_job_queue_arc_with_receiver(16);
    let service = ErrorIngestionService::new(events.clone(), queue);

    let result = service
        .store_from_payload(7, payload(json!({"message": "boom"})))
        .await;
    assert!(matches!(result, Err(ErrorTrackingError::Validation(_))));
    assert!(events.is_empty().await);
}

#[tokio::test]
async fn test_normalized_strategy_is_applied() {
    let events = Arc::new(InMemoryEventStore::new());
    let (queue, _receiver) = BroadcastQueueService::create_job_queue_arc_with_receiver(16);
    let service = ErrorIngestionService::new(events.clone(), queue)
        .with_fingerprint_strategy(FingerprintStrategy::Normalized);

    let stored = service
        .store_from_payload(
            7,
            payload(json!({"platform": "python", "message": "order 1234 not found"})),
        )
        .await
        .unwrap();
    let event = events.get(7, &stored.id).await.unwrap().unwrap();
    assert_eq!(event.fingerprint, vec!["Error", "order <num> not found"]);
    assert_eq!(event.message, "order 1234 not found");
}

#[tokio::test]
async fn test_sweep_recovers_event_whose_job_was_lost() {
    let events = Arc::new(InMemoryEventStore::new());
    let lost = ErrorIngestionService::new(events.clone(), Arc::new(ClosedQueue));
    let stored = lost.store_from_payload(7, reference_error()).await.unwrap();

    let (queue, mut receiver) = BroadcastQueueService::create_job_queue_arc_with_receiver(16);
    let service = ErrorIngestionService::new(events.clone(), queue);
    let sent = service
        .requeue_unprocessed(100, chrono::Duration::zero())
        .await
        .unwrap();
    assert_eq!(sent, 1);

    match receiver.recv().await.unwrap() {
        Job::ProcessErrorEvent(job) => {
            assert_eq!(job.event_id, stored.id);
            assert_eq!(job.project_id, 7);
        }
    }
}

#[tokio::test]
async fn test_sweep_skips_processed_and_fresh_events() {
    let events = Arc::new(InMemoryEventStore::new());
    let (queue, mut receiver) = BroadcastQueueService::create_job_queue_arc_with_receiver(16);
    let service = ErrorIngestionService::new(events.clone(), queue);

    let stored = service.store_from_payload(7, reference_error()).await.unwrap();
    receiver.recv().await.unwrap();

    // Just received, so its job is presumably still in flight
    let sent = service
        .requeue_unprocessed(100, chrono::Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(sent, 0);

    events.mark_processed(&stored.id).await.unwrap();
    let sent = service
        .requeue_unprocessed(100, chrono::Duration::zero())
        .await
        .unwrap();
    assert_eq!(sent, 0);
    assert!(receiver.try_recv().is_err());
}
