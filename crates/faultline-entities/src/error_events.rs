use faultline_core::UtcDateTime;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

// ============= STRUCTURED DATA TYPES =============

/// Open-ended event context stored in the `data` JSONB column
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct ErrorEventData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserContext>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub breadcrumbs: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contexts: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct UserContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl UserContext {
    /// Stable key used for distinct-user counting
    pub fn identity(&self) -> Option<String> {
        self.id
            .as_ref()
            .map(|id| format!("id:{}", id))
            .or_else(|| self.email.as_ref().map(|email| format!("email:{}", email)))
            .or_else(|| self.username.as_ref().map(|name| format!("username:{}", name)))
            .or_else(|| self.ip_address.as_ref().map(|ip| format!("ip:{}", ip)))
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "error_events")]
pub struct Model {
    /// 32-char hex event id supplied by the SDK or generated on ingest
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub project_id: i32,

    // Written once by the processing pipeline
    pub group_id: Option<i32>,
    pub has_been_processed: bool,

    pub timestamp: UtcDateTime,
    pub received_at: UtcDateTime,

    pub level: String,
    pub message: String,
    pub error_type: String,
    pub exception_type: Option<String>,
    pub exception_value: Option<String>,
    pub exception_module: Option<String>,

    /// Ordered fingerprint tokens
    #[sea_orm(column_type = "JsonBinary")]
    pub fingerprint: serde_json::Value,

    pub platform: String,
    pub environment: String,
    pub release: Option<String>,
    pub sdk_name: Option<String>,
    pub sdk_version: Option<String>,
    pub server_name: Option<String>,
    pub transaction: Option<String>,
    pub handled: bool,
    pub sample_rate: f64,

    /// Derived from the user context, see [`UserContext::identity`]
    pub user_key: Option<String>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub data: Option<serde_json::Value>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::error_groups::Entity",
        from = "Column::GroupId",
        to = "super::error_groups::Column::Id",
        on_update = "NoAction",
        on_delete = "SetNull"
    )]
    ErrorGroups,
    #[sea_orm(
        belongs_to = "super::projects::Entity",
        from = "Column::ProjectId",
        to = "super::projects::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Projects,
}

impl Related<super::error_groups::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ErrorGroups.def()
    }
}

impl Related<super::projects::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Projects.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

// ============= HELPER METHODS =============

impl Model {
    /// Get typed data from JSONB column
    pub fn get_data(&self) -> ErrorEventData {
        self.data
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    pub fn fingerprint_tokens(&self) -> Vec<String> {
        serde_json::from_value(self.fingerprint.clone()).unwrap_or_default()
    }
}

impl ErrorEventData {
    /// Convert to JSONB value for database storage
    pub fn to_json_value(&self) -> Option<serde_json::Value> {
        serde_json::to_value(self).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_identity_prefers_id() {
        let user = UserContext {
            id: Some("42".to_string()),
            email: Some("a@b.io".to_string()),
            ..Default::default()
        };
        assert_eq!(user.identity().as_deref(), Some("id:42"));

        let user = UserContext {
            ip_address: Some("10.0.0.1".to_string()),
            ..Default::default()
        };
        assert_eq!(user.identity().as_deref(), Some("ip:10.0.0.1"));

        assert_eq!(UserContext::default().identity(), None);
    }

    #[test]
    fn test_event_data_skips_empty_fields() {
        let data = ErrorEventData {
            tags: Some(serde_json::json!({"browser": "firefox"})),
            ..Default::default()
        };
        assert_eq!(
            data.to_json_value().unwrap(),
            serde_json::json!({"tags": {"browser": "firefox"}})
        );
    }
}
