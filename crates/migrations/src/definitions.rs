//! Migration Definitions - Core types shared across the migration system
//!
//! Run and rollback reports, migration direction and status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ledger::LedgerEntry;

/// Result of running migrations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRunResult {
    /// Batch number written by this run, `None` when nothing was pending
    pub batch: Option<i64>,
    /// IDs of migrations that were applied, in application order
    pub applied: Vec<String>,
    /// Number of registered migrations that were already applied
    pub skipped_count: usize,
    /// Total execution time in milliseconds
    pub elapsed_ms: u64,
}

impl MigrationRunResult {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Result of rolling back migrations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackResult {
    /// Batch that was reverted, when the rollback targeted a single batch
    pub batch: Option<i64>,
    /// IDs of migrations that were rolled back, newest first
    pub rolled_back: Vec<String>,
    /// Total execution time in milliseconds
    pub elapsed_ms: u64,
}

impl RollbackResult {
    pub fn rolled_back_count(&self) -> usize {
        self.rolled_back.len()
    }

    /// True when there was nothing to roll back
    pub fn is_empty(&self) -> bool {
        self.rolled_back.is_empty()
    }
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationDirection {
    /// Apply the migration (run `up`)
    Up,
    /// Rollback the migration (run `down`)
    Down,
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationDirection::Up => write!(f, "up"),
            MigrationDirection::Down => write!(f, "down"),
        }
    }
}

/// Migration status in the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationStatus {
    /// Migration is pending (not yet applied)
    Pending,
    /// Migration has been applied
    Applied {
        /// When it was applied
        applied_at: DateTime<Utc>,
        /// Batch number
        batch: i64,
    },
}

impl MigrationStatus {
    pub fn is_applied(&self) -> bool {
        matches!(self, MigrationStatus::Applied { .. })
    }
}

/// Status of one registered migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatusEntry {
    /// 1-based registration position
    pub position: usize,
    pub id: String,
    pub status: MigrationStatus,
}

/// Registered migrations with their ledger state, plus ledger entries
/// that no registered migration accounts for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub migrations: Vec<MigrationStatusEntry>,
    pub orphaned: Vec<LedgerEntry>,
}

impl StatusReport {
    pub fn pending(&self) -> impl Iterator<Item = &MigrationStatusEntry> {
        self.migrations.iter().filter(|m| !m.status.is_applied())
    }

    pub fn applied(&self) -> impl Iterator<Item = &MigrationStatusEntry> {
        self.migrations.iter().filter(|m| m.status.is_applied())
    }

    pub fn is_up_to_date(&self) -> bool {
        self.pending().next().is_none()
    }
}
