use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{AnalysisCacheStore, CacheHit};

/// Persists cache hits queued by [`super::AnalysisCache`].
///
/// Counters are approximate: hits dropped on a full channel or lost to a failed
/// write are not retried.
pub struct CacheUsageWorker {
    store: Arc<dyn AnalysisCacheStore>,
    receiver: mpsc::Receiver<CacheHit>,
}

impl CacheUsageWorker {
    pub(super) fn new(store: Arc<dyn AnalysisCacheStore>, receiver: mpsc::Receiver<CacheHit>) -> Self {
        Self { store, receiver }
    }

    /// Runs until every `AnalysisCache` sender is dropped
    pub async fn run(mut self) {
        while let Some(hit) = self.receiver.recv().await {
            if let Err(e) = self.store.record_hit(&hit).await {
                warn!(entry_id = hit.entry_id, "Failed to record cache hit: {}", e);
            }
        }
        debug!("Cache usage worker stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
