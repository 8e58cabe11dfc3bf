pub mod handler;
pub mod types;

pub use handler::{configure_routes, ErrorTrackingApiDoc};
pub use types::AppState;
