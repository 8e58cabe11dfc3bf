use std::sync::Arc;

use async_trait::async_trait;
use faultline_core::{Job, JobQueue, JobReceiver, QueueError};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

#[derive(Clone)]
pub struct BroadcastQueueService {
    broadcast_sender: broadcast::Sender<Job>,
}

/// A lagging receiver skips the overwritten jobs; the ingestion sweep picks
/// their events up again.
pub struct BroadcastJobReceiver {
    receiver: broadcast::Receiver<Job>,
}

#[async_trait]
impl JobReceiver for BroadcastJobReceiver {
    async fn recv(&mut self) -> Result<Job, QueueError> {
        let result = self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => QueueError::ChannelClosed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!(skipped = n, "Job receiver lagged behind the queue");
                QueueError::ReceiveError(format!("Receiver lagged by {} messages", n))
            }
        });

        if let Ok(job) = &result {
            debug!("Received job: {}", job);
        }

        result
    }
}

#[async_trait]
impl JobQueue for BroadcastQueueService {
    async fn send(&self, job: Job) -> Result<(), QueueError> {
        let subscriber_count = self.broadcast_sender.receiver_count();
        if subscriber_count == 0 {
            error!("No subscribers listening to the job queue, job will be lost: {}", job);
        }

        self.broadcast_sender.send(job.clone()).map_err(|e| {
            error!("Failed to broadcast job {}: {}", job, e);
            QueueError::SendError(format!("Broadcast send failed: {}", e))
        })?;

        debug!(subscribers = subscriber_count, "Broadcasted job: {}", job);
        Ok(())
    }

    fn subscribe(&self) -> Box<dyn JobReceiver> {
        Box::new(BroadcastJobReceiver {
            receiver: self.broadcast_sender.subscribe(),
        })
    }
}

impl BroadcastQueueService {
    pub fn new(broadcast_sender: broadcast::Sender<Job>) -> Self {
        Self { broadcast_sender }
    }

    /// Bounded queue behind the `JobQueue` trait plus its first receiver.
    ///
    /// Sends fail once every receiver is gone, so callers that subscribe
    /// later should hold on to the returned one until then.
    pub fn create_job_queue_arc_with_receiver(
        buffer_size: usize,
    ) -> (Arc<dyn JobQueue>, broadcast::Receiver<Job>) {
        let (sender, receiver) = broadcast::channel(buffer_size);
        (Arc::new(BroadcastQueueService::new(sender)), receiver)
    }

    pub fn subscriber_count(&self) -> usize {
        self.broadcast_sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_core::ProcessErrorEventJob;
    use tokio::time::{timeout, Duration};

    fn job(event_id: &str, project_id: i32) -> ProcessErrorEventJob {
        ProcessErrorEventJob {
            event_id: event_id.to_string(),
            project_id,
        }
    }

    #[tokio::test]
    async fn test_trait_send_and_receive() {
        let (queue, _keep_alive) = BroadcastQueueService::create_job_queue_arc_with_receiver(10);
        let mut receiver = queue.subscribe();

        queue
            .send(Job::ProcessErrorEvent(job("abc", 42)))
            .await
            .unwrap();

        let received = timeout(Duration::from_secs(1), receiver.recv())
            .await
            .expect("Should receive job within timeout")
            .expect("Should receive a job");

        match received {
            Job::ProcessErrorEvent(data) => {
                assert_eq!(data.event_id, "abc");
                assert_eq!(data.project_id, 42);
            }
        }
    }

    #[tokio::test]
    async fn test_jobs_arrive_in_send_order() {
        let (sender, _keep_alive) = broadcast::channel(10);
        let queue = BroadcastQueueService::new(sender);
        let mut receiver = queue.subscribe();

        for i in 0..3 {
            queue
                .send(Job::ProcessErrorEvent(job(&format!("event-{}", i), 1)))
                .await
                .unwrap();
        }

        for i in 0..3 {
            let Job::ProcessErrorEvent(data) = receiver.recv().await.unwrap();
            assert_eq!(data.event_id, format!("event-{}", i));
        }
    }

    #[tokio::test]
    async fn test_send_without_subscribers_fails() {
        let (sender, receiver) = broadcast::channel(10);
        let queue = BroadcastQueueService::new(sender);
        drop(receiver);
        let result = queue.send(Job::ProcessErrorEvent(job("abc", 1))).await;
        assert!(matches!(result, Err(QueueError::SendError(_))));
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_receive() {
        let (sender, _keep_alive) = broadcast::channel(10);
        let queue = BroadcastQueueService::new(sender);
        let mut first = queue.subscribe();
        let mut second = queue.subscribe();
        assert_eq!(queue.subscriber_count(), 3);

        queue
            .send(Job::ProcessErrorEvent(job("shared", 5)))
            .await
            .unwrap();

        let Job::ProcessErrorEvent(a) = first.recv().await.unwrap();
        let Job::ProcessErrorEvent(b) = second.recv().await.unwrap();
        assert_eq!(a, b);
    }
}
