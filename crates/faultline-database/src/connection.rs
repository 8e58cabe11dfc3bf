//! Database connection management

use faultline_core::DatabaseConfig;
use faultline_migrations::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub type DbConnection = DatabaseConnection;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to connect to the database: {0}")]
    Connect(#[source] DbErr),

    #[error("Failed to apply database migrations: {0}")]
    Migrate(#[source] DbErr),
}

/// Connects and brings the schema up to date
pub async fn establish_connection(
    config: &DatabaseConfig,
) -> Result<Arc<DbConnection>, DatabaseError> {
    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);

    let db = Database::connect(opt).await.map_err(DatabaseError::Connect)?;

    Migrator::up(&db, None)
        .await
        .map_err(DatabaseError::Migrate)?;
    info!("Database migrations applied");

    Ok(Arc::new(db))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_database_is_a_connect_error() {
        let config = DatabaseConfig::new("not-a-database-url".to_string());
        let result = establish_connection(&config).await;
        assert!(matches!(result, Err(DatabaseError::Connect(_))));
    }
}
