pub mod types;
pub mod event_store;
pub mod sea_orm_event_store;
pub mod group_repository;
pub mod sea_orm_group_repository;
pub mod alerts;
pub mod similarity;
pub mod error_ingestion_service;
pub mod error_processing_service;
pub mod error_tracking_service;

pub use types::*;
pub use event_store::{EventStore, InMemoryEventStore};
pub use sea_orm_event_store::SeaOrmEventStore;
pub use group_repository::{GroupRepository, InMemoryGroupRepository};
pub use sea_orm_group_repository::SeaOrmGroupRepository;
pub use alerts::{evaluate_alerts, AlertDispatcher, AlertInput, AlertIntent, LoggingAlertDispatcher};
pub use similarity::{EmbeddingSimilarityIndex, SimilarGroup, SimilarityIndex};
pub use error_ingestion_service::{ErrorIngestionService, StoredEvent};
pub use error_processing_service::{
    should_trigger_ai_analysis, ErrorProcessingService, ProcessingConfig, ProcessingReport,
};
pub use error_tracking_service::{parse_bucket_interval, ErrorTrackingService};
