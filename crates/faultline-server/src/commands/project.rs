//! Project registration command
//!
//! Inserts a project row and prints the DSN SDKs should be configured with.

use clap::Args;
use faultline_core::DatabaseConfig;
use faultline_entities::projects;
use sea_orm::{ActiveModelTrait, Set};
use tracing::debug;

/// Output format for the create-project command
#[derive(Debug, Clone, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args)]
pub struct ProjectCommand {
    /// Database connection URL
    #[arg(long, env = "FAULTLINE_DATABASE_URL")]
    pub database_url: String,

    /// Display name of the project
    #[arg(long)]
    pub name: String,

    /// Public URL SDKs reach this server on, used to build the DSN
    #[arg(long, default_value = "http://localhost:8000", env = "FAULTLINE_PUBLIC_URL")]
    pub public_url: String,

    #[arg(long, value_enum, default_value = "text")]
    pub output_format: OutputFormat,
}

impl ProjectCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.create())
    }

    async fn create(self) -> anyhow::Result<()> {
        let db = faultline_database::establish_connection(&DatabaseConfig::new(
            self.database_url.clone(),
        ))
        .await?;

        let project = projects::ActiveModel {
            uuid: Set(uuid::Uuid::new_v4()),
            public_key: Set(uuid::Uuid::new_v4().simple().to_string()),
            name: Set(self.name.clone()),
            is_active: Set(true),
            created_at: Set(chrono::Utc::now()),
            ..Default::default()
        }
        .insert(db.as_ref())
        .await?;
        debug!("Created project {} ({})", project.id, project.uuid);

        let dsn = build_dsn(&self.public_url, &project.public_key, &project.uuid)?;
        match self.output_format {
            OutputFormat::Text => {
                println!("Project: {} (id {})", project.name, project.id);
                println!("DSN:     {}", dsn);
            }
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "id": project.id,
                    "uuid": project.uuid,
                    "name": project.name,
                    "public_key": project.public_key,
                    "dsn": dsn,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
        }
        Ok(())
    }
}

/// `{scheme}://{public_key}@{host}/{project_uuid}`; SDKs add the `/api/` prefix themselves
fn build_dsn(public_url: &str, public_key: &str, project: &uuid::Uuid) -> anyhow::Result<String> {
    let (scheme, rest) = public_url
        .split_once("://")
        .ok_or_else(|| anyhow::anyhow!("Public URL must include a scheme: {}", public_url))?;
    Ok(format!(
        "{}://{}@{}/{}",
        scheme,
        public_key,
        rest.trim_end_matches('/'),
        project
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_dsn() {
        let project = uuid::Uuid::nil();
        let dsn = build_dsn("https://errors.example.com/", "abc123", &project).unwrap();
        assert_eq!(
            dsn,
            "https://abc123@errors.example.com/00000000-0000-0000-0000-000000000000"
        );
        assert!(build_dsn("errors.example.com", "abc123", &project).is_err());
    }
}
