use faultline_core::UtcDateTime;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "projects")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Identifier used in ingest URLs
    #[sea_orm(unique)]
    pub uuid: Uuid,
    /// DSN public key; also accepted in place of the uuid
    #[sea_orm(unique)]
    pub public_key: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: UtcDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::error_events::Entity")]
    ErrorEvents,
    #[sea_orm(has_many = "super::error_groups::Entity")]
    ErrorGroups,
}

impl Related<super::error_events::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ErrorEvents.def()
    }
}

impl Related<super::error_groups::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ErrorGroups.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
