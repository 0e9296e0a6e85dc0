//! Migration Manager - Executes registered migrations against the database
//!
//! Applies pending migrations in registration order and reverts applied ones
//! in reverse order. Each step runs in its own transaction together with its
//! ledger write, so a failed step leaves neither schema changes nor a ledger
//! entry behind.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use sqlx::AnyConnection;
use tracing::{debug, error, info, warn};

use crate::config::MigrationConfig;
use crate::connection::{self, ConnectionProvider};
use crate::definitions::{
    MigrationDirection, MigrationRunResult, MigrationStatus, MigrationStatusEntry,
    RollbackResult, StatusReport,
};
use crate::dialect::Dialect;
use crate::error::{MigrationError, MigrationResult};
use crate::ledger::{Ledger, LedgerEntry, MAX_MIGRATION_ID_LENGTH};
use crate::migration::Migration;
use crate::schema::Schema;

/// Which applied migrations a rollback reverts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RollbackScope {
    LastBatch,
    Steps(usize),
    All,
}

/// A registered migration with its resolved identifier
struct Registered<'a> {
    position: usize,
    id: String,
    migration: &'a dyn Migration,
}

/// Orchestrates an ordered list of migrations
pub struct MigrationManager {
    provider: Arc<ConnectionProvider>,
    config: MigrationConfig,
    migrations: Vec<Box<dyn Migration>>,
}

impl MigrationManager {
    /// Create a manager with the default configuration
    pub fn new(provider: Arc<ConnectionProvider>) -> Self {
        Self::with_config(provider, MigrationConfig::default())
    }

    /// Create a manager with explicit configuration
    pub fn with_config(provider: Arc<ConnectionProvider>, config: MigrationConfig) -> Self {
        Self {
            provider,
            config,
            migrations: Vec::new(),
        }
    }

    /// Get the manager configuration
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Get the connection provider shared with the application
    pub fn provider(&self) -> &Arc<ConnectionProvider> {
        &self.provider
    }

    /// Register a migration; it runs after everything registered before it
    pub fn add<M>(&mut self, migration: M) -> &mut Self
    where
        M: Migration + 'static,
    {
        self.migrations.push(Box::new(migration));
        self
    }

    /// Register an already boxed migration
    pub fn add_boxed(&mut self, migration: Box<dyn Migration>) -> &mut Self {
        self.migrations.push(migration);
        self
    }

    /// Register several migrations in iteration order
    pub fn add_all<M, I>(&mut self, migrations: I) -> &mut Self
    where
        M: Migration + 'static,
        I: IntoIterator<Item = M>,
    {
        for migration in migrations {
            self.add(migration);
        }
        self
    }

    /// Number of registered migrations
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Resolved identifiers in registration order
    pub fn ids(&self) -> MigrationResult<Vec<String>> {
        Ok(self.registry()?.into_iter().map(|r| r.id).collect())
    }

    /// Apply every pending migration in registration order
    ///
    /// Stops at the first failing step; steps committed before it stay applied.
    pub async fn migrate(&self) -> MigrationResult<MigrationRunResult> {
        let start_time = Instant::now();
        let (registry, ledger, entries) = self.prepare().await?;

        let applied: HashMap<&str, &LedgerEntry> = entries
            .iter()
            .map(|e| (e.migration.as_str(), e))
            .collect();
        let registered: HashSet<&str> = registry.iter().map(|r| r.id.as_str()).collect();

        for orphan in entries
            .iter()
            .filter(|e| !registered.contains(e.migration.as_str()))
        {
            warn!(
                "Migration {} is recorded in {} but not registered",
                orphan.migration,
                ledger.table_name()
            );
        }

        let pending: Vec<&Registered<'_>> = registry
            .iter()
            .filter(|r| !applied.contains_key(r.id.as_str()))
            .collect();
        let skipped_count = registry.len() - pending.len();

        if pending.is_empty() {
            info!("Nothing to migrate");
            return Ok(MigrationRunResult {
                batch: None,
                applied: Vec::new(),
                skipped_count,
                elapsed_ms: elapsed_ms(start_time),
            });
        }

        self.check_order(&registry, &applied, &pending)?;

        let batch = entries.iter().map(|e| e.batch).max().unwrap_or(0) + 1;
        let mut sequence = entries.iter().map(|e| e.sequence).max().unwrap_or(0) + 1;
        let mut applied_ids = Vec::with_capacity(pending.len());

        for step in pending {
            info!(
                "Applying migration {} (#{}){}",
                step.id,
                step.position,
                describe(step.migration)
            );
            if let Err(e) = self
                .run_step(&ledger, step, MigrationDirection::Up, batch, sequence)
                .await
            {
                error!("Migration {} failed: {}", step.id, e);
                return Err(MigrationError::step_failed(
                    step.id.clone(),
                    step.position,
                    MigrationDirection::Up,
                    e,
                ));
            }
            sequence += 1;
            applied_ids.push(step.id.clone());
        }

        info!(
            "Applied {} migration(s) in batch {}",
            applied_ids.len(),
            batch
        );
        Ok(MigrationRunResult {
            batch: Some(batch),
            applied: applied_ids,
            skipped_count,
            elapsed_ms: elapsed_ms(start_time),
        })
    }

    /// Revert every migration applied by the most recent `migrate()` call
    ///
    /// An empty ledger is not an error; the result is simply empty.
    pub async fn rollback(&self) -> MigrationResult<RollbackResult> {
        self.revert(RollbackScope::LastBatch).await
    }

    /// Revert the `steps` most recently applied migrations, across batches
    pub async fn rollback_steps(&self, steps: usize) -> MigrationResult<RollbackResult> {
        self.revert(RollbackScope::Steps(steps)).await
    }

    /// Revert every applied migration
    pub async fn reset(&self) -> MigrationResult<RollbackResult> {
        self.revert(RollbackScope::All).await
    }

    /// State of every registered migration plus unregistered ledger entries
    pub async fn status(&self) -> MigrationResult<StatusReport> {
        let (registry, _ledger, entries) = self.prepare().await?;

        let applied: HashMap<&str, &LedgerEntry> = entries
            .iter()
            .map(|e| (e.migration.as_str(), e))
            .collect();

        let migrations = registry
            .iter()
            .map(|r| MigrationStatusEntry {
                position: r.position,
                id: r.id.clone(),
                status: match applied.get(r.id.as_str()) {
                    Some(entry) => MigrationStatus::Applied {
                        applied_at: entry.applied_at,
                        batch: entry.batch,
                    },
                    None => MigrationStatus::Pending,
                },
            })
            .collect();

        let registered: HashSet<&str> = registry.iter().map(|r| r.id.as_str()).collect();
        let orphaned = entries
            .iter()
            .filter(|e| !registered.contains(e.migration.as_str()))
            .cloned()
            .collect();

        Ok(StatusReport {
            migrations,
            orphaned,
        })
    }

    /// Ledger entries in application order
    pub async fn applied(&self) -> MigrationResult<Vec<LedgerEntry>> {
        let (_registry, _ledger, entries) = self.prepare().await?;
        Ok(entries)
    }

    async fn revert(&self, scope: RollbackScope) -> MigrationResult<RollbackResult> {
        let start_time = Instant::now();
        let (registry, ledger, entries) = self.prepare().await?;

        if entries.is_empty() {
            info!("Nothing to roll back");
            return Ok(RollbackResult {
                batch: None,
                rolled_back: Vec::new(),
                elapsed_ms: elapsed_ms(start_time),
            });
        }

        let (batch, targets) = select_targets(&entries, scope);

        let by_id: HashMap<&str, &Registered<'_>> =
            registry.iter().map(|r| (r.id.as_str(), r)).collect();
        let unregistered: Vec<&str> = targets
            .iter()
            .map(|e| e.migration.as_str())
            .filter(|id| !by_id.contains_key(id))
            .collect();
        if !unregistered.is_empty() {
            return Err(MigrationError::ledger(format!(
                "cannot roll back {}: applied according to {} but not registered",
                unregistered.join(", "),
                ledger.table_name()
            )));
        }

        let mut rolled_back = Vec::with_capacity(targets.len());
        for entry in targets {
            let step = by_id[entry.migration.as_str()];
            info!(
                "Rolling back migration {} (#{}, batch {}){}",
                step.id,
                step.position,
                entry.batch,
                describe(step.migration)
            );
            if let Err(e) = self
                .run_step(&ledger, step, MigrationDirection::Down, entry.batch, entry.sequence)
                .await
            {
                error!("Rollback of {} failed: {}", step.id, e);
                return Err(MigrationError::step_failed(
                    step.id.clone(),
                    step.position,
                    MigrationDirection::Down,
                    e,
                ));
            }
            rolled_back.push(step.id.clone());
        }

        info!("Rolled back {} migration(s)", rolled_back.len());
        Ok(RollbackResult {
            batch,
            rolled_back,
            elapsed_ms: elapsed_ms(start_time),
        })
    }

    /// Run one step and its ledger write in a single transaction
    async fn run_step(
        &self,
        ledger: &Ledger,
        step: &Registered<'_>,
        direction: MigrationDirection,
        batch: i64,
        sequence: i64,
    ) -> MigrationResult<()> {
        let mut guard = self.provider.acquire().await?;
        let mut tx = connection::begin(&mut guard).await?;
        let outcome = execute_step(&mut tx, ledger, step, direction, batch, sequence).await;
        connection::finish_transaction(tx, outcome).await
    }

    /// Validate the registry, make sure the ledger exists and read it
    async fn prepare(&self) -> MigrationResult<(Vec<Registered<'_>>, Ledger, Vec<LedgerEntry>)> {
        let registry = self.registry()?;
        let dialect = self.provider.dialect()?;
        let ledger = Ledger::new(self.config.migrations_table.clone(), dialect)?;

        let mut guard = self.provider.acquire().await?;
        ledger.ensure_table(&mut guard).await?;
        let entries = ledger.entries(&mut guard).await?;
        debug!(
            "{} registered migration(s), {} ledger entr{}",
            registry.len(),
            entries.len(),
            if entries.len() == 1 { "y" } else { "ies" }
        );
        Ok((registry, ledger, entries))
    }

    fn registry(&self) -> MigrationResult<Vec<Registered<'_>>> {
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut registry = Vec::with_capacity(self.migrations.len());

        for (index, migration) in self.migrations.iter().enumerate() {
            let position = index + 1;
            let id = match migration.id() {
                Some(id) => id.trim().to_string(),
                None => format!("{:04}", position),
            };

            if id.is_empty() {
                return Err(MigrationError::Registration(format!(
                    "migration #{} has an empty identifier",
                    position
                )));
            }
            if id.len() > MAX_MIGRATION_ID_LENGTH {
                return Err(MigrationError::Registration(format!(
                    "identifier of migration #{} is longer than {} characters",
                    position, MAX_MIGRATION_ID_LENGTH
                )));
            }
            if let Some(first) = seen.insert(id.clone(), position) {
                return Err(MigrationError::Registration(format!(
                    "migration identifier '{}' is registered twice (#{} and #{})",
                    id, first, position
                )));
            }

            registry.push(Registered {
                position,
                id,
                migration: migration.as_ref(),
            });
        }

        Ok(registry)
    }

    /// Reject pending migrations registered before an applied one
    fn check_order(
        &self,
        registry: &[Registered<'_>],
        applied: &HashMap<&str, &LedgerEntry>,
        pending: &[&Registered<'_>],
    ) -> MigrationResult<()> {
        let Some(last_applied) = registry
            .iter()
            .filter(|r| applied.contains_key(r.id.as_str()))
            .map(|r| r.position)
            .max()
        else {
            return Ok(());
        };

        let out_of_order: Vec<&str> = pending
            .iter()
            .filter(|r| r.position < last_applied)
            .map(|r| r.id.as_str())
            .collect();
        if out_of_order.is_empty() {
            return Ok(());
        }

        if self.config.allow_out_of_order {
            warn!(
                "Applying out-of-order migration(s): {}",
                out_of_order.join(", ")
            );
            Ok(())
        } else {
            Err(MigrationError::ledger(format!(
                "pending migration(s) {} are registered before already applied migrations; \
                 enable allow_out_of_order to apply them",
                out_of_order.join(", ")
            )))
        }
    }
}

async fn execute_step(
    conn: &mut AnyConnection,
    ledger: &Ledger,
    step: &Registered<'_>,
    direction: MigrationDirection,
    batch: i64,
    sequence: i64,
) -> MigrationResult<()> {
    let dialect: Dialect = ledger.dialect();
    {
        let mut schema = Schema::new(&mut *conn, dialect);
        match direction {
            MigrationDirection::Up => step.migration.up(&mut schema).await?,
            MigrationDirection::Down => step.migration.down(&mut schema).await?,
        }
        debug!(
            "Migration {} {} issued {} statement(s)",
            step.id,
            direction,
            schema.executed().len()
        );
    }
    match direction {
        MigrationDirection::Up => {
            ledger.record(conn, &step.id, batch, sequence).await?;
        }
        MigrationDirection::Down => ledger.remove(conn, &step.id).await?,
    }
    Ok(())
}

/// Pick rollback targets, newest first, and the batch they belong to
fn select_targets(entries: &[LedgerEntry], scope: RollbackScope) -> (Option<i64>, Vec<&LedgerEntry>) {
    let mut newest_first: Vec<&LedgerEntry> = entries.iter().collect();
    newest_first.sort_by(|a, b| b.sequence.cmp(&a.sequence));

    match scope {
        RollbackScope::LastBatch => {
            let batch = entries.iter().map(|e| e.batch).max();
            let targets = newest_first
                .into_iter()
                .filter(|e| Some(e.batch) == batch)
                .collect();
            (batch, targets)
        }
        RollbackScope::Steps(steps) => {
            newest_first.truncate(steps);
            (None, newest_first)
        }
        RollbackScope::All => (None, newest_first),
    }
}

fn describe(migration: &dyn Migration) -> String {
    migration
        .name()
        .map(|name| format!(": {}", name))
        .unwrap_or_default()
}

fn elapsed_ms(start_time: Instant) -> u64 {
    start_time.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(migration: &str, batch: i64, sequence: i64) -> LedgerEntry {
        LedgerEntry {
            migration: migration.to_string(),
            batch,
            sequence,
            applied_at: Utc::now(),
        }
    }

    fn ids(targets: &[&LedgerEntry]) -> Vec<String> {
        targets.iter().map(|e| e.migration.clone()).collect()
    }

    #[test]
    fn test_select_last_batch() {
        let entries = vec![entry("a", 1, 1), entry("b", 2, 2), entry("c", 2, 3)];
        let (batch, targets) = select_targets(&entries, RollbackScope::LastBatch);
        assert_eq!(batch, Some(2));
        assert_eq!(ids(&targets), vec!["c", "b"]);
    }

    #[test]
    fn test_select_steps_and_all() {
        let entries = vec![entry("a", 1, 1), entry("b", 2, 2), entry("c", 2, 3)];

        let (batch, targets) = select_targets(&entries, RollbackScope::Steps(2));
        assert_eq!(batch, None);
        assert_eq!(ids(&targets), vec!["c", "b"]);

        let (_, targets) = select_targets(&entries, RollbackScope::Steps(10));
        assert_eq!(ids(&targets), vec!["c", "b", "a"]);

        let (_, targets) = select_targets(&entries, RollbackScope::Steps(0));
        assert!(targets.is_empty());

        let (_, targets) = select_targets(&entries, RollbackScope::All);
        assert_eq!(ids(&targets), vec!["c", "b", "a"]);
    }
}
