//! Background consumer for the job queue

use std::sync::Arc;

use async_trait::async_trait;
use faultline_core::{Job, JobReceiver, QueueError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Something that knows how to execute a job.
///
/// Failures are reported back to the worker, which logs them. Retrying and
/// dead-lettering are the responsibility of the queue backend.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> anyhow::Result<()>;
}

pub struct JobWorker {
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
}

impl JobWorker {
    pub fn new(handler: Arc<dyn JobHandler>, concurrency: usize) -> Self {
        Self {
            handler,
            concurrency: concurrency.max(1),
        }
    }

    /// Runs until the channel closes. Each job gets its own task; at most
    /// `concurrency` run at the same time.
    pub async fn run(self, mut receiver: Box<dyn JobReceiver>) {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        info!(concurrency = self.concurrency, "Job worker started");

        loop {
            let job = match receiver.recv().await {
                Ok(job) => job,
                Err(QueueError::ChannelClosed) => {
                    info!("Job queue closed, stopping worker");
                    break;
                }
                Err(e) => {
                    warn!("Job receive failed: {}", e);
                    continue;
                }
            };

            let permit = match permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let handler = self.handler.clone();
            tokio::spawn(async move {
                let label = job.to_string();
                debug!("Handling job {}", label);
                if let Err(e) = handler.handle(job).await {
                    error!("Job {} failed: {:#}", label, e);
                }
                drop(permit);
            });
        }

        // Wait for in-flight jobs before returning
        let _ = permits.acquire_many(self.concurrency as u32).await;
    }

    pub fn spawn(self, receiver: Box<dyn JobReceiver>) -> JoinHandle<()> {
        tokio::spawn(self.run(receiver))
    }
}
