//! Error types for the migration engine
//!
//! Every fallible operation returns [`MigrationResult`]. Failures inside a
//! single migration step are wrapped in [`MigrationError::StepFailed`] so the
//! caller can tell which migration broke and why.

use crate::config::ConfigError;
use crate::definitions::MigrationDirection;

/// Result type alias for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Error types for migration operations
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Invalid table builder usage, raised before any SQL is sent
    #[error("Schema definition error: {0}")]
    SchemaDefinition(String),

    /// The database rejected a statement
    #[error("Statement failed: {message} (SQL: {sql})")]
    Execution { sql: String, message: String },

    /// The ledger disagrees with the registered migrations
    #[error("Ledger inconsistency: {0}")]
    LedgerInconsistency(String),

    /// Duplicate or malformed migration identifiers
    #[error("Registration error: {0}")]
    Registration(String),

    /// A single migration step failed and was rolled back
    #[error("Migration '{id}' (#{position}) failed during {direction}: {error}")]
    StepFailed {
        id: String,
        position: usize,
        direction: MigrationDirection,
        error: Box<MigrationError>,
    },

    /// Connection establishment, acquisition or transaction control failed
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection provider is already initialized")]
    AlreadyInitialized,

    #[error("Connection provider is not initialized")]
    NotInitialized,

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// Migration file access
    #[error("Migration file error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrationError {
    /// Create a schema definition error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::SchemaDefinition(message.into())
    }

    /// Create an execution error for a rejected statement
    pub fn execution(sql: impl Into<String>, err: sqlx::Error) -> Self {
        Self::Execution {
            sql: sql.into(),
            message: err.to_string(),
        }
    }

    /// Create a ledger inconsistency error
    pub fn ledger(message: impl Into<String>) -> Self {
        Self::LedgerInconsistency(message.into())
    }

    /// Wrap the failure of one migration step
    pub fn step_failed(
        id: impl Into<String>,
        position: usize,
        direction: MigrationDirection,
        error: MigrationError,
    ) -> Self {
        Self::StepFailed {
            id: id.into(),
            position,
            direction,
            error: Box::new(error),
        }
    }

    /// Identifier and registration position of the failed migration, if any
    pub fn failed_migration(&self) -> Option<(&str, usize)> {
        match self {
            Self::StepFailed { id, position, .. } => Some((id.as_str(), *position)),
            _ => None,
        }
    }

    /// The innermost error, unwrapping step failures
    pub fn root_cause(&self) -> &MigrationError {
        match self {
            Self::StepFailed { error, .. } => error.root_cause(),
            other => other,
        }
    }

    pub fn is_schema_definition(&self) -> bool {
        matches!(self.root_cause(), Self::SchemaDefinition(_))
    }

    pub fn is_execution(&self) -> bool {
        matches!(self.root_cause(), Self::Execution { .. })
    }

    pub fn is_ledger_inconsistency(&self) -> bool {
        matches!(self.root_cause(), Self::LedgerInconsistency(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failed_names_the_migration() {
        let err = MigrationError::step_failed(
            "20240101_create_users",
            3,
            MigrationDirection::Up,
            MigrationError::Execution {
                sql: "CREATE TABLE users".to_string(),
                message: "near \"users\": syntax error".to_string(),
            },
        );

        let message = err.to_string();
        assert!(message.contains("20240101_create_users"));
        assert!(message.contains("#3"));
        assert!(message.contains("during up"));
        assert!(message.contains("syntax error"));
        assert_eq!(err.failed_migration(), Some(("20240101_create_users", 3)));
        assert!(err.is_execution());
        assert!(!err.is_schema_definition());
    }

    #[test]
    fn test_root_cause_of_plain_error() {
        let err = MigrationError::schema("decimal precision must be positive");
        assert!(err.is_schema_definition());
        assert!(err.failed_migration().is_none());
        assert!(matches!(err.root_cause(), MigrationError::SchemaDefinition(_)));
    }
}
