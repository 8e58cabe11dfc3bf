use faultline_core::UtcDateTime;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "error_groups")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub project_id: i32,

    // Unique together with project_id (idx_error_groups_project_fingerprint)
    pub fingerprint_hash: String,
    #[sea_orm(column_type = "JsonBinary")]
    pub fingerprint: serde_json::Value,

    pub title: String,
    pub error_type: String,
    pub message: String,
    pub platform: String,

    pub first_seen: UtcDateTime,
    pub last_seen: UtcDateTime,

    pub status: String, // 'unresolved', 'resolved', 'ignored'
    pub event_count: i64,
    pub user_count: i64,

    pub ai_summary: Option<String>,
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: serde_json::Value,

    pub created_at: UtcDateTime,
    pub updated_at: UtcDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::projects::Entity",
        from = "Column::ProjectId",
        to = "super::projects::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Projects,
    #[sea_orm(has_many = "super::error_events::Entity")]
    ErrorEvents,
}

impl Related<super::projects::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Projects.def()
    }
}

impl Related<super::error_events::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ErrorEvents.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn fingerprint_tokens(&self) -> Vec<String> {
        serde_json::from_value(self.fingerprint.clone()).unwrap_or_default()
    }
}
