use serde::{Deserialize, Serialize};
use std::fmt;

/// Asks the processing pipeline to group a freshly stored event
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ProcessErrorEventJob {
    pub event_id: String,
    pub project_id: i32,
}

/// Core job enum containing all possible job types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Job {
    ProcessErrorEvent(ProcessErrorEventJob),
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::ProcessErrorEvent(job) => write!(
                f,
                "ProcessErrorEvent(event_id: {}, project_id: {})",
                job.event_id, job.project_id
            ),
        }
    }
}

// Core queue abstraction - faultline-queue implements this
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to send job: {0}")]
    SendError(String),
    #[error("Failed to receive job: {0}")]
    ReceiveError(String),
    #[error("Queue channel closed")]
    ChannelClosed,
    #[error("Invalid job data: {0}")]
    InvalidData(String),
}

/// Core trait for job queue operations
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Send a job to the queue
    async fn send(&self, job: Job) -> Result<(), QueueError>;

    /// Create a new receiver for jobs
    fn subscribe(&self) -> Box<dyn JobReceiver>;
}

/// Core trait for receiving jobs
#[async_trait]
pub trait JobReceiver: Send {
    /// Receive the next job
    async fn recv(&mut self) -> Result<Job, QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_display() {
        let job = Job::ProcessErrorEvent(ProcessErrorEventJob {
            event_id: "9ec79c33ec9942ab8353589fcb2e04dc".to_string(),
            project_id: 7,
        });
        assert_eq!(
            job.to_string(),
            "ProcessErrorEvent(event_id: 9ec79c33ec9942ab8353589fcb2e04dc, project_id: 7)"
        );
    }
}
