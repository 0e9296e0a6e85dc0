//! Version Ledger - the table recording which migrations are applied
//!
//! Reads and writes take the caller's connection so that a step's ledger
//! write shares the step's transaction.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::any::AnyRow;
use sqlx::{Any, AnyConnection, Row};
use tracing::debug;

use crate::config::ConfigError;
use crate::connection::{count, execute};
use crate::dialect::Dialect;
use crate::error::{MigrationError, MigrationResult};
use crate::schema::{is_valid_identifier, Schema, TableBuilder};

/// Longest identifier the ledger can store
pub const MAX_MIGRATION_ID_LENGTH: usize = 255;

/// One applied migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub migration: String,
    /// Number of the `migrate()` call that applied it
    pub batch: i64,
    /// Global application order
    pub sequence: i64,
    pub applied_at: DateTime<Utc>,
}

/// Access to the ledger table
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
    dialect: Dialect,
}

impl Ledger {
    /// Create a ledger for the given table; the name must be a valid identifier
    pub fn new(table: impl Into<String>, dialect: Dialect) -> MigrationResult<Self> {
        let table = table.into();
        if !is_valid_identifier(&table) {
            return Err(ConfigError::invalid_value(
                "migrations_table",
                &table,
                "a SQL identifier (letters, digits and underscores, not starting with a digit)",
            )
            .into());
        }
        Ok(Self { table, dialect })
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn define(table: &mut TableBuilder) {
        table
            .string_len("migration", MAX_MIGRATION_ID_LENGTH as u32)
            .primary_key()
            .not_null();
        table.big_integer("batch").not_null();
        table.big_integer("sequence").not_null();
        table.string_len("applied_at", 64).not_null();
    }

    /// Create the ledger table if it does not exist yet
    pub async fn ensure_table(&self, conn: &mut AnyConnection) -> MigrationResult<()> {
        let mut schema = Schema::new(conn, self.dialect);
        schema.create_table(&self.table, Self::define).await
    }

    /// All entries in application order
    pub async fn entries(&self, conn: &mut AnyConnection) -> MigrationResult<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT migration, batch, sequence, applied_at FROM {} ORDER BY sequence",
            self.table
        );
        let rows = sqlx::query::<Any>(&sql)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| MigrationError::execution(&sql, e))?;
        rows.iter().map(|row| self.decode(row)).collect()
    }

    fn decode(&self, row: &AnyRow) -> MigrationResult<LedgerEntry> {
        let unreadable =
            |e: sqlx::Error| MigrationError::ledger(format!("unreadable row in '{}': {}", self.table, e));

        let migration: String = row.try_get("migration").map_err(unreadable)?;
        let batch: i64 = row.try_get("batch").map_err(unreadable)?;
        let sequence: i64 = row.try_get("sequence").map_err(unreadable)?;
        let applied_at: String = row.try_get("applied_at").map_err(unreadable)?;
        let applied_at = DateTime::parse_from_rfc3339(&applied_at)
            .map_err(|e| {
                MigrationError::ledger(format!(
                    "entry '{}' has an invalid applied_at '{}': {}",
                    migration, applied_at, e
                ))
            })?
            .with_timezone(&Utc);

        Ok(LedgerEntry {
            migration,
            batch,
            sequence,
            applied_at,
        })
    }

    /// Check whether a migration has an entry
    pub async fn contains(&self, conn: &mut AnyConnection, migration: &str) -> MigrationResult<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE migration = {}",
            self.table,
            self.dialect.placeholder(1)
        );
        Ok(count(conn, &sql, &[migration]).await? > 0)
    }

    /// Highest batch number, 0 when the ledger is empty
    pub async fn latest_batch(&self, conn: &mut AnyConnection) -> MigrationResult<i64> {
        let sql = format!("SELECT COALESCE(MAX(batch), 0) FROM {}", self.table);
        count(conn, &sql, &[]).await
    }

    /// Sequence number for the next recorded entry
    pub async fn next_sequence(&self, conn: &mut AnyConnection) -> MigrationResult<i64> {
        let sql = format!("SELECT COALESCE(MAX(sequence), 0) FROM {}", self.table);
        Ok(count(conn, &sql, &[]).await? + 1)
    }

    /// Insert an entry for a migration whose `up` just ran
    pub async fn record(
        &self,
        conn: &mut AnyConnection,
        migration: &str,
        batch: i64,
        sequence: i64,
    ) -> MigrationResult<LedgerEntry> {
        let applied_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let sql = format!(
            "INSERT INTO {} (migration, batch, sequence, applied_at) VALUES ({}, {}, {}, {})",
            self.table,
            self.dialect.placeholder(1),
            self.dialect.placeholder(2),
            self.dialect.placeholder(3),
            self.dialect.placeholder(4)
        );
        sqlx::query::<Any>(&sql)
            .bind(migration.to_string())
            .bind(batch)
            .bind(sequence)
            .bind(applied_at.clone())
            .execute(&mut *conn)
            .await
            .map_err(|e| MigrationError::execution(&sql, e))?;
        debug!("Recorded migration {} (batch {}, sequence {})", migration, batch, sequence);

        let applied_at = DateTime::parse_from_rfc3339(&applied_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        Ok(LedgerEntry {
            migration: migration.to_string(),
            batch,
            sequence,
            applied_at,
        })
    }

    /// Delete the entry of a migration whose `down` just ran
    pub async fn remove(&self, conn: &mut AnyConnection, migration: &str) -> MigrationResult<()> {
        let sql = format!(
            "DELETE FROM {} WHERE migration = {}",
            self.table,
            self.dialect.placeholder(1)
        );
        let removed = sqlx::query::<Any>(&sql)
            .bind(migration.to_string())
            .execute(&mut *conn)
            .await
            .map_err(|e| MigrationError::execution(&sql, e))?
            .rows_affected();
        if removed == 0 {
            return Err(MigrationError::ledger(format!(
                "no entry for '{}' in '{}'",
                migration, self.table
            )));
        }
        debug!("Removed ledger entry for {}", migration);
        Ok(())
    }

    /// Drop the ledger table
    pub async fn drop_table(&self, conn: &mut AnyConnection) -> MigrationResult<()> {
        execute(conn, &format!("DROP TABLE IF EXISTS {}", self.table)).await?;
        Ok(())
    }
}
