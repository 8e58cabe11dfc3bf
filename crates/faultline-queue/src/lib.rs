//! Implementation of the job queue using tokio channels
//!
//! `BroadcastQueueService` implements the `JobQueue` trait from faultline-core and
//! `JobWorker` drains a subscription into a `JobHandler`.

pub mod queue;
pub mod worker;

pub use queue::*;
pub use worker::*;

// Re-export core traits for convenience
pub use faultline_core::{Job, JobQueue, JobReceiver, ProcessErrorEventJob, QueueError};
