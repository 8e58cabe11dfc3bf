use axum::Router;
use clap::Args;
use faultline_ai::{
    AiProviderConfig, AnalysisCache, AnalysisConfig, CacheConfig, ErrorAnalysisService,
    OpenAiCompatibleProvider, SeaOrmCacheStore, TracingUsageRecorder,
};
use faultline_core::{DatabaseConfig, JobQueue};
use faultline_embeddings::HashTokenizer;
use faultline_error_tracking::{
    handlers::{self, ErrorTrackingApiDoc},
    sentry::{self, SeaOrmProjectResolver},
    EmbeddingSimilarityIndex, ErrorIngestionService, ErrorProcessingService, ErrorTrackingService,
    EventStore, FingerprintStrategy, GroupRepository, LoggingAlertDispatcher, ProcessingConfig,
    SeaOrmEventStore, SeaOrmGroupRepository, SentryIngestionService, SimilarityIndex,
};
use faultline_queue::{BroadcastQueueService, JobWorker};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Args)]
pub struct ServeCommand {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1:8000", env = "FAULTLINE_ADDRESS")]
    pub address: String,

    /// Database connection URL
    #[arg(long, env = "FAULTLINE_DATABASE_URL")]
    pub database_url: String,

    /// Pending processing jobs kept before the oldest are dropped
    #[arg(long, default_value_t = 1024, env = "FAULTLINE_QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    /// Events processed in parallel
    #[arg(long, default_value_t = 4, env = "FAULTLINE_WORKER_CONCURRENCY")]
    pub worker_concurrency: usize,

    /// How events are split into groups: exact, normalized
    #[arg(long, default_value = "exact", env = "FAULTLINE_FINGERPRINT_STRATEGY")]
    pub fingerprint_strategy: FingerprintStrategy,

    /// OpenAI-compatible API base URL; AI analysis is disabled when unset
    #[arg(long, env = "FAULTLINE_AI_BASE_URL")]
    pub ai_base_url: Option<String>,

    #[arg(long, env = "FAULTLINE_AI_API_KEY", hide_env_values = true)]
    pub ai_api_key: Option<String>,

    #[arg(long, default_value = "gpt-4o-mini", env = "FAULTLINE_AI_MODEL")]
    pub ai_model: String,

    /// Upper bound in seconds for analyzing one group
    #[arg(long, default_value_t = 45, env = "FAULTLINE_AI_TIMEOUT_SECS")]
    pub ai_timeout_secs: u64,

    /// Upper bound in seconds for indexing one group for similarity search
    #[arg(long, default_value_t = 10, env = "FAULTLINE_INDEX_TIMEOUT_SECS")]
    pub index_timeout_secs: u64,

    /// Upper bound in seconds for delivering one alert
    #[arg(long, default_value_t = 10, env = "FAULTLINE_ALERT_TIMEOUT_SECS")]
    pub alert_timeout_secs: u64,

    /// Seconds between sweeps that re-enqueue events left unprocessed
    #[arg(long, default_value_t = 300, env = "FAULTLINE_REQUEUE_INTERVAL_SECS")]
    pub requeue_interval_secs: u64,

    /// Unprocessed events re-enqueued per sweep
    #[arg(long, default_value_t = 500, env = "FAULTLINE_REQUEUE_BATCH")]
    pub requeue_batch: u64,

    /// Seconds to wait for in-flight jobs on shutdown
    #[arg(long, default_value_t = 30, env = "FAULTLINE_SHUTDOWN_TIMEOUT_SECS")]
    pub shutdown_timeout_secs: u64,
}

impl ServeCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run())
    }

    async fn run(self) -> anyhow::Result<()> {
        debug!("Initializing database connection...");
        let db = faultline_database::establish_connection(&DatabaseConfig::new(
            self.database_url.clone(),
        ))
        .await?;

        let events: Arc<dyn EventStore> = Arc::new(SeaOrmEventStore::new(db.clone()));
        let groups: Arc<dyn GroupRepository> = Arc::new(SeaOrmGroupRepository::new(db.clone()));
        let (queue, _) =
            BroadcastQueueService::create_job_queue_arc_with_receiver(self.queue_capacity);
        let similarity: Arc<dyn SimilarityIndex> = Arc::new(EmbeddingSimilarityIndex::new(
            Arc::new(HashTokenizer::new(10000)),
        ));

        let (cache, cache_worker) =
            AnalysisCache::new(Arc::new(SeaOrmCacheStore::new(db.clone())), CacheConfig::default());
        let cache = Arc::new(cache);
        tokio::spawn(cache_worker.run());

        let mut processing = ErrorProcessingService::new(events.clone(), groups.clone())
            .with_config(ProcessingConfig {
                ai_timeout: Duration::from_secs(self.ai_timeout_secs),
                index_timeout: Duration::from_secs(self.index_timeout_secs),
                alert_timeout: Duration::from_secs(self.alert_timeout_secs),
                ..ProcessingConfig::default()
            })
            .with_similarity_index(similarity.clone())
            .with_alert_dispatcher(Arc::new(LoggingAlertDispatcher));
        match self.analysis_service(cache.clone()) {
            Ok(Some(analysis)) => {
                info!("AI analysis enabled with model {}", self.ai_model);
                processing = processing.with_analysis(Arc::new(analysis));
            }
            Ok(None) => info!("AI analysis disabled, no provider configured"),
            Err(e) => warn!("AI analysis disabled: {}", e),
        }

        // Subscribe before the first request can enqueue anything
        let worker = JobWorker::new(Arc::new(processing), self.worker_concurrency);
        let worker_handle = worker.spawn(queue.subscribe());
        info!(
            "Processing worker started with concurrency {}",
            self.worker_concurrency
        );

        // Nothing is queued yet, so every unprocessed event lost its job
        let sweeper = ErrorIngestionService::new(events.clone(), queue.clone());
        match sweeper
            .requeue_unprocessed(self.requeue_batch, chrono::Duration::zero())
            .await
        {
            Ok(count) => debug!("Startup sweep re-enqueued {} events", count),
            Err(e) => warn!("Startup sweep failed: {}", e),
        }
        let sweep_handle = tokio::spawn(requeue_loop(
            sweeper,
            Duration::from_secs(self.requeue_interval_secs.max(1)),
            self.requeue_batch,
        ));

        let tracking = Arc::new(
            ErrorTrackingService::new(events.clone(), groups, queue.clone())
                .with_ingestion(
                    ErrorIngestionService::new(events, queue)
                        .with_fingerprint_strategy(self.fingerprint_strategy),
                )
                .with_similarity_index(similarity)
                .with_analysis_cache(cache),
        );
        let ingestion = Arc::new(SentryIngestionService::new(
            tracking.clone(),
            Arc::new(SeaOrmProjectResolver::new(db)),
        ));

        let app = build_application(tracking, ingestion);
        let listener = TcpListener::bind(&self.address).await?;
        info!("Faultline listening on {}", self.address);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        // The worker stops once the last queue sender is gone
        sweep_handle.abort();
        let _ = sweep_handle.await;
        info!("Waiting for in-flight processing jobs...");
        let shutdown_timeout = Duration::from_secs(self.shutdown_timeout_secs);
        let abort_handle = worker_handle.abort_handle();
        match tokio::time::timeout(shutdown_timeout, worker_handle).await {
            Ok(Ok(())) => info!("Processing worker drained"),
            Ok(Err(e)) => warn!("Processing worker ended abnormally: {}", e),
            Err(_) => {
                warn!(
                    "Processing worker still busy after {:?}, abandoning remaining jobs",
                    shutdown_timeout
                );
                abort_handle.abort();
            }
        }
        info!("Faultline server exited");
        Ok(())
    }

    fn analysis_service(
        &self,
        cache: Arc<AnalysisCache>,
    ) -> anyhow::Result<Option<ErrorAnalysisService>> {
        let Some(base_url) = self.ai_base_url.clone() else {
            return Ok(None);
        };
        let provider = OpenAiCompatibleProvider::new(AiProviderConfig {
            base_url,
            api_key: self.ai_api_key.clone().unwrap_or_default(),
            model: self.ai_model.clone(),
            request_timeout: Duration::from_secs(self.ai_timeout_secs),
        })?;
        Ok(Some(ErrorAnalysisService::new(
            Arc::new(provider),
            cache,
            Arc::new(TracingUsageRecorder),
            AnalysisConfig {
                timeout: Duration::from_secs(self.ai_timeout_secs),
                ..AnalysisConfig::default()
            },
        )))
    }
}

/// Ingest routes live under `/api` the way Sentry SDKs expect them
fn build_application(
    tracking: Arc<ErrorTrackingService>,
    ingestion: Arc<SentryIngestionService>,
) -> Router {
    let sentry_routes = sentry::handlers::configure_routes().with_state(Arc::new(
        sentry::handlers::AppState {
            sentry_ingestion: ingestion,
        },
    ));
    let query_routes = handlers::configure_routes().with_state(Arc::new(handlers::AppState {
        error_tracking_service: tracking,
    }));

    let mut api_doc = ErrorTrackingApiDoc::openapi();
    api_doc.merge(sentry::handlers::ApiDoc::openapi());

    Router::new()
        .nest("/api", sentry_routes.merge(query_routes))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api_doc))
        .layer(TraceLayer::new_for_http())
}

/// Re-enqueues events whose jobs were dropped by a full queue or a failed send
async fn requeue_loop(sweeper: ErrorIngestionService, every: Duration, batch: u64) {
    let min_age = chrono::Duration::from_std(every).unwrap_or_else(|_| chrono::Duration::minutes(5));
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately and the startup sweep already ran
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(e) = sweeper.requeue_unprocessed(batch, min_age).await {
            warn!("Requeue sweep failed: {}", e);
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        return std::future::pending().await;
    }
    info!("Received Ctrl+C, initiating graceful shutdown...");
}
