//! Schema migrations for SQLite and PostgreSQL
//!
//! Register [`Migration`]s with a [`MigrationManager`], then call
//! [`MigrationManager::migrate`] to apply what is pending or
//! [`MigrationManager::rollback`] to revert the most recent batch. Table
//! structure is declared through [`Schema`] and [`TableBuilder`].
//!
//! ```ignore
//! let provider = Arc::new(ConnectionProvider::connect("sqlite://app.db?mode=rwc").await?);
//! let mut manager = MigrationManager::new(provider);
//! manager.add(CreateUsers);
//! manager.migrate().await?;
//! ```

pub mod config;
pub mod connection;
pub mod definitions;
pub mod dialect;
pub mod error;
pub mod ledger;
pub mod loader;
pub mod manager;
pub mod migration;
pub mod schema;

pub use async_trait::async_trait;

pub use config::{ConfigError, MigrationConfig, DEFAULT_MIGRATIONS_TABLE};
pub use connection::{ConnectionGuard, ConnectionOptions, ConnectionProvider};
pub use definitions::{
    MigrationDirection, MigrationRunResult, MigrationStatus, MigrationStatusEntry,
    RollbackResult, StatusReport,
};
pub use dialect::Dialect;
pub use error::{MigrationError, MigrationResult};
pub use ledger::{Ledger, LedgerEntry};
pub use loader::{split_statements, MigrationLoader};
pub use manager::MigrationManager;
pub use migration::{Migration, SqlMigration};
pub use schema::{
    ColumnDefinition, ColumnType, DefaultValue, ForeignKeyDefinition, ReferentialAction, Schema,
    TableBuilder,
};
