pub mod ai_analysis_cache;
pub mod error_events;
pub mod error_groups;
pub mod projects;

pub mod prelude {
    pub use super::ai_analysis_cache::Entity as AiAnalysisCache;
    pub use super::error_events::Entity as ErrorEvents;
    pub use super::error_groups::Entity as ErrorGroups;
    pub use super::projects::Entity as Projects;
}
