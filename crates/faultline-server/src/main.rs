//! Faultline server entrypoint
//!
//! Runs the ingest and query API together with the background processing
//! workers, and provides small admin commands for the database.

mod commands;

use clap::{Parser, Subcommand};
use commands::{MigrateCommand, ProjectCommand, ServeCommand};
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "FAULTLINE_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "FAULTLINE_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server and processing workers
    Serve(ServeCommand),
    /// Apply pending database migrations and exit
    Migrate(MigrateCommand),
    /// Register a project and print its DSN
    CreateProject(ProjectCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins when set; otherwise our crates log at the requested level
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) =>tracing_subscriber::EnvFilter::new(format!(
            "faultline={level},\
             faultline_server={level},\
             faultline_core={level},\
             faultline_database={level},\
             faultline_migrations={level},\
             faultline_queue={level},\
             faultline_ai={level},\
             faultline_embeddings={level},\
             faultline_error_tracking={level},\
             tower_http={level},\
             sqlx=warn,\
             sea_orm=warn,\
             h2=warn,\
             tower=warn,\
             hyper=warn,\
             reqwest=warn,\
             rustls=warn",
            level = cli.log_level
        )),
    };

    let fmt_layer = match cli.log_format.as_str() {
        "full" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Serve(serve_cmd) => serve_cmd.execute(),
        Commands::Migrate(migrate_cmd) => migrate_cmd.execute(),
        Commands::CreateProject(project_cmd) => project_cmd.execute(),
    }
}
