//! Sentry Ingestion Service
//!
//! Resolves the project named in the ingest URL, parses the body and hands
//! each event to the ingestion service.

use std::sync::Arc;

use async_trait::async_trait;
use faultline_entities::projects;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tracing::{debug, warn};
use uuid::Uuid;

use super::envelope::{Envelope, EnvelopeItem};
use super::mapper::normalize_event_id;
use super::types::SentryEventPayload;
use crate::services::error_tracking_service::ErrorTrackingService;
use crate::services::types::ErrorTrackingError;

/// The project fields ingestion needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRecord {
    pub id: i32,
    pub uuid: Uuid,
    pub public_key: String,
    pub is_active: bool,
}

impl From<projects::Model> for ProjectRecord {
    fn from(model: projects::Model) -> Self {
        Self {
            id: model.id,
            uuid: model.uuid,
            public_key: model.public_key,
            is_active: model.is_active,
        }
    }
}

#[async_trait]
pub trait ProjectResolver: Send + Sync {
    async fn find_by_id(&self, id: i32) -> Result<Option<ProjectRecord>, ErrorTrackingError>;

    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<ProjectRecord>, ErrorTrackingError>;

    async fn find_by_public_key(
        &self,
        public_key: &str,
    ) -> Result<Option<ProjectRecord>, ErrorTrackingError>;
}

pub struct SeaOrmProjectResolver {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmProjectResolver {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProjectResolver for SeaOrmProjectResolver {
    async fn find_by_id(&self, id: i32) -> Result<Option<ProjectRecord>, ErrorTrackingError> {
        Ok(projects::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .map(ProjectRecord::from))
    }

    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<ProjectRecord>, ErrorTrackingError> {
        Ok(projects::Entity::find()
            .filter(projects::Column::Uuid.eq(uuid))
            .one(self.db.as_ref())
            .await?
            .map(ProjectRecord::from))
    }

    async fn find_by_public_key(
        &self,
        public_key: &str,
    ) -> Result<Option<ProjectRecord>, ErrorTrackingError> {
        Ok(projects::Entity::find()
            .filter(projects::Column::PublicKey.eq(public_key))
            .one(self.db.as_ref())
            .await?
            .map(ProjectRecord::from))
    }
}

/// Fixed project list, for tests and single-project setups
#[derive(Debug, Clone, Default)]
pub struct StaticProjectResolver {
    projects: Vec<ProjectRecord>,
}

impl StaticProjectResolver {
    pub fn new(projects: Vec<ProjectRecord>) -> Self {
        Self { projects }
    }

    fn find(&self, predicate: impl Fn(&ProjectRecord) -> bool) -> Option<ProjectRecord> {
        self.projects.iter().find(|p| predicate(p)).cloned()
    }
}

#[async_trait]
impl ProjectResolver for StaticProjectResolver {
    async fn find_by_id(&self, id: i32) -> Result<Option<ProjectRecord>, ErrorTrackingError> {
        Ok(self.find(|p| p.id == id))
    }

    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<ProjectRecord>, ErrorTrackingError> {
        Ok(self.find(|p| p.uuid == uuid))
    }

    async fn find_by_public_key(
        &self,
        public_key: &str,
    ) -> Result<Option<ProjectRecord>, ErrorTrackingError> {
        Ok(self.find(|p| p.public_key == public_key))
    }
}

#[derive(Clone)]
pub struct SentryIngestionService {
    error_tracking_service: Arc<ErrorTrackingService>,
    projects: Arc<dyn ProjectResolver>,
}

impl SentryIngestionService {
    pub fn new(
        error_tracking_service: Arc<ErrorTrackingService>,
        projects: Arc<dyn ProjectResolver>,
    ) -> Self {
        Self {
            error_tracking_service,
            projects,
        }
    }

    /// Resolves the `{project}` path segment to an active project id.
    ///
    /// The segment is a project UUID or public key. A numeric project id is
    /// only accepted together with that project's DSN key. When a DSN key is
    /// sent it must belong to the resolved project.
    pub async fn authenticate(
        &self,
        project_ref: &str,
        dsn_key: Option<&str>,
    ) -> Result<i32, ErrorTrackingError> {
        let project_ref = project_ref.trim();

        let project = if let Ok(uuid) = Uuid::parse_str(project_ref) {
            self.projects.find_by_uuid(uuid).await?
        } else if let Ok(id) = project_ref.parse::<i32>() {
            if dsn_key.is_none() {
                return Err(ErrorTrackingError::Unauthorized);
            }
            self.projects.find_by_id(id).await?
        } else {
            self.projects.find_by_public_key(project_ref).await?
        };

        let project = match project {
            Some(p) if p.is_active => p,
            Some(p) => {
                debug!(project_id = p.id, "Rejecting event for inactive project");
                return Err(ErrorTrackingError::Unauthorized);
            }
            None => return Err(ErrorTrackingError::Unauthorized),
        };

        if let Some(key) = dsn_key {
            if key != project.public_key {
                warn!(project_id = project.id, "DSN key does not match project");
                return Err(ErrorTrackingError::Unauthorized);
            }
        }

        Ok(project.id)
    }

    /// Process single JSON event (for /store/ endpoint)
    pub async fn process_json_event(
        &self,
        project_id: i32,
        body: &[u8],
    ) -> Result<String, ErrorTrackingError> {
        let payload: SentryEventPayload = serde_json::from_slice(body)
            .map_err(|e| ErrorTrackingError::Validation(format!("Invalid event JSON: {}", e)))?;
        let stored = self
            .error_tracking_service
            .store_from_payload(project_id, payload)
            .await?;
        Ok(stored.id)
    }

    /// Stores every event item; returns the first event id, if any
    pub async fn process_envelope(
        &self,
        project_id: i32,
        envelope_data: &[u8],
    ) -> Result<Option<String>, ErrorTrackingError> {
        let envelope = Envelope::from_slice(envelope_data)
            .map_err(|e| ErrorTrackingError::Validation(e.to_string()))?;

        let header_event_id = envelope
            .header()
            .event_id
            .as_deref()
            .and_then(|id| normalize_event_id(id).ok());

        let mut first_id = None;
        for item in envelope.into_items() {
            match item {
                EnvelopeItem::Event(mut payload) => {
                    if payload.event_id.is_none() {
                        payload.event_id = header_event_id.clone();
                    }
                    let stored = self
                        .error_tracking_service
                        .store_from_payload(project_id, *payload)
                        .await?;
                    first_id.get_or_insert(stored.id);
                }
            }
        }

        if first_id.is_none() {
            debug!(project_id, "Envelope carried no event items");
        }
        Ok(first_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::event_store::{EventStore, InMemoryEventStore};
    use crate::services::group_repository::InMemoryGroupRepository;
    use faultline_queue::BroadcastQueueService;

    const KEY: &str = "pk_live_3f9a";

    fn project_uuid() -> Uuid {
        Uuid::parse_str("5b1f0c1e-8a59-4f0e-9a0b-7c5d2e3f4a10").unwrap()
    }

    fn resolver() -> StaticProjectResolver {
        StaticProjectResolver::new(vec![
            ProjectRecord {
                id: 1,
                uuid: project_uuid(),
                public_key: KEY.to_string(),
                is_active: true,
            },
            ProjectRecord {
                id: 2,
                uuid: Uuid::new_v4(),
                public_key: "pk_archived".to_string(),
                is_active: false,
            },
        ])
    }

    fn service() -> (SentryIngestionService, Arc<InMemoryEventStore>) {
        let events = Arc::new(InMemoryEventStore::new());
        let (queue, _) = BroadcastQueueService::create_job_queue_arc_with_receiver(16);
        let tracking = Arc::new(ErrorTrackingService::new(
            events.clone(),
            Arc::new(InMemoryGroupRepository::new()),
            queue,
        ));
        (
            SentryIngestionService::new(tracking, Arc::new(resolver())),
            events,
        )
    }

    #[tokio::test]
    async fn test_authenticate_by_uuid_and_key() {
        let (svc, _) = service();
        let uuid = project_uuid().to_string();
        assert_eq!(svc.authenticate(&uuid, None).await.unwrap(), 1);
        assert_eq!(svc.authenticate(&uuid, Some(KEY)).await.unwrap(), 1);
        assert_eq!(svc.authenticate(KEY, None).await.unwrap(), 1);
        assert_eq!(svc.authenticate("1", Some(KEY)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_authenticate_rejections() {
        let (svc, _) = service();
        let uuid = project_uuid().to_string();
        let unknown = Uuid::new_v4().to_string();
        for (project_ref, key) in [
            ("no-such-key", None),
            (uuid.as_str(), Some("wrong")),
            ("1", None),
            ("pk_archived", None),
            (unknown.as_str(), None),
        ] {
            assert!(
                matches!(
                    svc.authenticate(project_ref, key).await,
                    Err(ErrorTrackingError::Unauthorized)
                ),
                "{} should be rejected",
                project_ref
            );
        }
    }

    #[tokio::test]
    async fn test_envelope_event_takes_header_id() {
        let (svc, events) = service();
        let data = "{\"event_id\":\"9ec79c33ec9942ab8353589fcb2e04dc\"}\n{\"type\":\"event\"}\n{\"platform\":\"javascript\",\"message\":\"boom\"}\n";
        let id = svc.process_envelope(1, data.as_bytes()).await.unwrap();
        assert_eq!(id.as_deref(), Some("9ec79c33ec9942ab8353589fcb2e04dc"));
        assert!(events
            .get(1, "9ec79c33ec9942ab8353589fcb2e04dc")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_envelope_without_events() {
        let (svc, events) = service();
        let data = "{}\n{\"type\":\"session\"}\n{\"sid\":\"abc\"}\n";
        assert_eq!(svc.process_envelope(1, data.as_bytes()).await.unwrap(), None);
        assert!(events.is_empty().await);
    }

    #[tokio::test]
    async fn test_malformed_json_is_validation_error() {
        let (svc, _) = service();
        assert!(matches!(
            svc.process_json_event(1, b"{not json").await,
            Err(ErrorTrackingError::Validation(_))
        ));
    }
}
