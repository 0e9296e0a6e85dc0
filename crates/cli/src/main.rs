mod commands;

use std::io;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use spark_migrations::MigrationConfig;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use commands::migrate;

#[derive(Parser, Debug)]
#[command(name = "spark-migrate")]
#[command(about = "Apply and revert database schema migrations")]
#[command(version)]
struct Cli {
    /// Database connection URL (sqlite: or postgres://)
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    database_url: Option<String>,

    /// Directory holding the .sql migration files
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Name of the ledger table
    #[arg(long, global = true)]
    table: Option<String>,

    /// Apply pending migrations registered before already applied ones
    #[arg(long, global = true)]
    allow_out_of_order: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run pending migrations
    Run,

    /// Roll back the last batch, or the last N migrations with --steps
    Rollback {
        #[arg(long)]
        steps: Option<usize>,
    },

    /// Roll back every applied migration
    Reset,

    /// Show migration status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a new migration file
    Create {
        /// Migration name
        name: String,
    },
}

/// Merge command line overrides into configuration loaded from the environment
fn build_config(cli: &Cli, base: MigrationConfig) -> anyhow::Result<MigrationConfig> {
    let mut config = base;
    if let Some(url) = &cli.database_url {
        config = config.with_database_url(url.clone());
    }
    if let Some(dir) = &cli.dir {
        config = config.with_migrations_dir(dir.clone());
    }
    if let Some(table) = &cli.table {
        config = config.with_migrations_table(table.clone());
    }
    if cli.allow_out_of_order {
        config = config.with_out_of_order(true);
    }
    config.validate().context("invalid migration configuration")?;
    Ok(config)
}

fn init_logging(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,sqlx=warn"))
        .context("invalid RUST_LOG filter")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).with_target(false))
            .try_init()?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json)?;

    let base = MigrationConfig::from_env().context("invalid migration environment")?;
    let config = build_config(&cli, base)?;

    match cli.command {
        Commands::Run => migrate::run(&config).await?,
        Commands::Rollback { steps } => migrate::rollback(&config, steps).await?,
        Commands::Reset => migrate::reset(&config).await?,
        Commands::Status { json } => migrate::status(&config, json).await?,
        Commands::Create { name } => migrate::create(&config, &name)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_environment() {
        let cli = Cli::parse_from([
            "spark-migrate",
            "--database-url",
            "sqlite::memory:",
            "--dir",
            "db/migrations",
            "--table",
            "app_migrations",
            "status",
            "--json",
        ]);
        let base = MigrationConfig::default().with_database_url("postgres://localhost/other");

        let config = build_config(&cli, base).unwrap();
        assert_eq!(config.database_url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(config.migrations_dir, PathBuf::from("db/migrations"));
        assert_eq!(config.migrations_table, "app_migrations");
        assert!(matches!(cli.command, Commands::Status { json: true }));
    }

    #[test]
    fn test_invalid_table_is_rejected() {
        let cli = Cli::parse_from(["spark-migrate", "--table", "bad name", "run"]);
        assert!(build_config(&cli, MigrationConfig::default()).is_err());
    }

    #[test]
    fn test_rollback_steps_argument() {
        let cli = Cli::parse_from(["spark-migrate", "rollback", "--steps", "3"]);
        assert!(matches!(cli.command, Commands::Rollback { steps: Some(3) }));

        let cli = Cli::parse_from(["spark-migrate", "rollback"]);
        assert!(matches!(cli.command, Commands::Rollback { steps: None }));
    }
}
