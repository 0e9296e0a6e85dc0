use std::sync::Arc;

use anyhow::{Context, Result};
use spark_migrations::{
    ConnectionProvider, MigrationConfig, MigrationLoader, MigrationManager, MigrationStatus,
    RollbackResult, StatusReport,
};
use tracing::debug;

pub fn create(config: &MigrationConfig, name: &str) -> Result<()> {
    let path = MigrationLoader::from_config(config)
        .create(name)
        .with_context(|| format!("failed to create migration '{}'", name))?;

    println!("Created migration: {}", path.display());
    Ok(())
}

pub async fn run(config: &MigrationConfig) -> Result<()> {
    let manager = open(config).await?;
    let outcome = manager.migrate().await;
    let closed = shutdown(manager).await;
    let result = outcome.context("migration failed")?;
    closed?;

    if result.is_empty() {
        println!("Nothing to migrate");
        return Ok(());
    }
    for id in &result.applied {
        println!("Migrated: {}", id);
    }
    println!(
        "Applied {} migration(s) in batch {} ({} ms)",
        result.applied_count(),
        result.batch.unwrap_or_default(),
        result.elapsed_ms
    );
    Ok(())
}

pub async fn rollback(config: &MigrationConfig, steps: Option<usize>) -> Result<()> {
    let manager = open(config).await?;
    let outcome = match steps {
        Some(steps) => manager.rollback_steps(steps).await,
        None => manager.rollback().await,
    };
    let closed = shutdown(manager).await;
    let result = outcome.context("rollback failed")?;
    closed?;
    print_rollback(&result);
    Ok(())
}

pub async fn reset(config: &MigrationConfig) -> Result<()> {
    let manager = open(config).await?;
    let outcome = manager.reset().await;
    let closed = shutdown(manager).await;
    let result = outcome.context("reset failed")?;
    closed?;
    print_rollback(&result);
    Ok(())
}

pub async fn status(config: &MigrationConfig, json: bool) -> Result<()> {
    let manager = open(config).await?;
    let outcome = manager.status().await;
    let closed = shutdown(manager).await;
    let report = outcome.context("failed to read migration status")?;
    closed?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_status(&report));
    }
    Ok(())
}

/// Connect and register every migration file
async fn open(config: &MigrationConfig) -> Result<MigrationManager> {
    let loader = MigrationLoader::from_config(config);
    let migrations = loader
        .load()
        .with_context(|| format!("failed to load migrations from {}", loader.dir().display()))?;
    debug!("Found {} migration file(s)", migrations.len());

    let provider = ConnectionProvider::from_config(config)
        .await
        .context("failed to connect to the database")?;
    let mut manager = MigrationManager::with_config(Arc::new(provider), config.clone());
    manager.add_all(migrations);
    Ok(manager)
}

async fn shutdown(manager: MigrationManager) -> Result<()> {
    let provider = Arc::clone(manager.provider());
    drop(manager);
    if let Ok(provider) = Arc::try_unwrap(provider) {
        provider.close().await?;
    }
    Ok(())
}

fn print_rollback(result: &RollbackResult) {
    if result.is_empty() {
        println!("Nothing to roll back");
        return;
    }
    for id in &result.rolled_back {
        println!("Rolled back: {}", id);
    }
    println!(
        "Rolled back {} migration(s) ({} ms)",
        result.rolled_back_count(),
        result.elapsed_ms
    );
}

fn render_status(report: &StatusReport) -> String {
    let mut out = String::from("Migration Status:\n================\n");

    if report.migrations.is_empty() {
        out.push_str("No migrations found\n");
    }
    for entry in &report.migrations {
        match &entry.status {
            MigrationStatus::Applied { applied_at, batch } => out.push_str(&format!(
                "  ✅ {}  (batch {}, {})\n",
                entry.id,
                batch,
                applied_at.format("%Y-%m-%d %H:%M:%S UTC")
            )),
            MigrationStatus::Pending => out.push_str(&format!("  ⏳ {}\n", entry.id)),
        }
    }

    if !report.orphaned.is_empty() {
        out.push_str("\nApplied but missing from the migrations directory:\n");
        for entry in &report.orphaned {
            out.push_str(&format!("  ⚠️  {}  (batch {})\n", entry.migration, entry.batch));
        }
    }

    let pending = report.pending().count();
    out.push_str(&format!(
        "\n{} applied, {} pending\n",
        report.migrations.len() - pending,
        pending
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config_for(dir: &TempDir) -> MigrationConfig {
        MigrationConfig::default()
            .with_database_url(format!(
                "sqlite://{}?mode=rwc",
                dir.path().join("app.db").display()
            ))
            .with_migrations_dir(dir.path().join("migrations"))
    }

    #[tokio::test]
    async fn test_create_run_status_rollback() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);

        create(&config, "create notes").unwrap();
        let files: Vec<_> = fs::read_dir(dir.path().join("migrations"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        fs::write(
            &files[0],
            "-- Up migration\nCREATE TABLE notes (id INTEGER PRIMARY KEY);\n\
             -- Down migration\nDROP TABLE notes;\n",
        )
        .unwrap();

        run(&config).await.unwrap();
        status(&config, true).await.unwrap();

        let manager = open(&config).await.unwrap();
        let report = manager.status().await.unwrap();
        assert!(report.is_up_to_date());
        assert!(manager.provider().table_exists("notes").await.unwrap());
        drop(manager);

        rollback(&config, None).await.unwrap();
        let manager = open(&config).await.unwrap();
        assert!(!manager.provider().table_exists("notes").await.unwrap());
    }

    #[tokio::test]
    async fn test_run_reports_the_migration_error() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        fs::create_dir_all(&config.migrations_dir).unwrap();
        fs::write(
            config.migrations_dir.join("20240101_000000_broken.sql"),
            "-- Up migration\nCREATE TABLE broken (;\n-- Down migration\nDROP TABLE broken;\n",
        )
        .unwrap();

        let err = run(&config).await.unwrap_err();
        assert_eq!(err.to_string(), "migration failed");
        assert!(err
            .chain()
            .any(|cause| cause.to_string().contains("20240101_000000_broken")));
    }

    #[test]
    fn test_render_status() {
        let report = StatusReport::default();
        let rendered = render_status(&report);
        assert!(rendered.contains("No migrations found"));
        assert!(rendered.contains("0 applied, 0 pending"));
    }
}
