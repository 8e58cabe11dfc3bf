mod migrate;
mod project;
mod serve;

pub use migrate::MigrateCommand;
pub use project::ProjectCommand;
pub use serve::ServeCommand;
