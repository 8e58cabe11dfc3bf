use faultline_core::UtcDateTime;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Cached model output, shared across projects when `is_public` is set.
///
/// One row per `(fingerprint_hash, analysis_type, provider, model, owner_project_id)`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "ai_analysis_cache")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub fingerprint_hash: String,
    pub analysis_type: String,
    pub provider: String,
    pub model: String,
    /// Project a private entry belongs to; 0 for shared entries
    pub owner_project_id: i32,

    #[sea_orm(column_type = "JsonBinary")]
    pub analysis_result: serde_json::Value,
    pub prompt_hash: String,
    pub confidence_score: f64,
    pub is_public: bool,

    pub usage_count: i64,
    pub last_used_at: UtcDateTime,
    /// JSON array of project ids that consumed this entry
    #[sea_orm(column_type = "JsonBinary")]
    pub projects_used: serde_json::Value,

    pub avg_feedback_score: f64,
    pub feedback_count: i64,

    // Cost of the call that produced the entry
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub original_cost_cents: f64,

    pub tokens_saved: i64,
    pub cost_saved_cents: f64,

    pub created_at: UtcDateTime,
    pub updated_at: UtcDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn project_ids(&self) -> Vec<i32> {
        serde_json::from_value(self.projects_used.clone()).unwrap_or_default()
    }
}
