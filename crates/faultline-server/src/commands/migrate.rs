use clap::Args;
use faultline_core::DatabaseConfig;
use tracing::info;

#[derive(Args)]
pub struct MigrateCommand {
    /// Database connection URL
    #[arg(long, env = "FAULTLINE_DATABASE_URL")]
    pub database_url: String,
}

impl MigrateCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        // Connecting applies every pending migration
        rt.block_on(faultline_database::establish_connection(
            &DatabaseConfig::new(self.database_url),
        ))?;
        info!("Database schema is up to date");
        Ok(())
    }
}
