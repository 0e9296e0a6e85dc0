//! Migration configuration
//!
//! Loaded from environment variables or built programmatically.

use std::path::PathBuf;
use std::time::Duration;

use crate::dialect::Dialect;
use crate::schema::is_valid_identifier;

/// Default name of the ledger table
pub const DEFAULT_MIGRATIONS_TABLE: &str = "schema_migrations";

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Configuration validation failed: {message}")]
    ValidationFailed { message: String },
}

impl ConfigError {
    /// Create a missing required field error
    pub fn missing_required(field: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingRequired {
            field: field.into(),
            hint: hint.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }

    /// Create a validation failed error
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
        }
    }
}

/// Configuration for the migration system
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Connection target, e.g. `sqlite://app.db` or `postgres://localhost/app`
    pub database_url: Option<String>,
    /// Directory where `.sql` migration files are stored
    pub migrations_dir: PathBuf,
    /// Table name for tracking migrations
    pub migrations_table: String,
    /// Apply pending migrations registered before already-applied ones
    pub allow_out_of_order: bool,
    /// How long a unit of work waits for the shared connection
    pub acquire_timeout: Duration,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            migrations_dir: PathBuf::from("migrations"),
            migrations_table: DEFAULT_MIGRATIONS_TABLE.to_string(),
            allow_out_of_order: false,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl MigrationConfig {
    /// Load configuration from environment variables
    ///
    /// Reads `DATABASE_URL`, `MIGRATIONS_DIR`, `MIGRATIONS_TABLE`,
    /// `MIGRATIONS_ALLOW_OUT_OF_ORDER` and `DATABASE_ACQUIRE_TIMEOUT` (seconds).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()) {
            config.database_url = Some(url);
        }
        if let Some(dir) = lookup("MIGRATIONS_DIR").filter(|v| !v.trim().is_empty()) {
            config.migrations_dir = PathBuf::from(dir);
        }
        if let Some(table) = lookup("MIGRATIONS_TABLE").filter(|v| !v.trim().is_empty()) {
            config.migrations_table = table;
        }
        if let Some(flag) = lookup("MIGRATIONS_ALLOW_OUT_OF_ORDER") {
            config.allow_out_of_order = parse_bool("MIGRATIONS_ALLOW_OUT_OF_ORDER", &flag)?;
        }
        if let Some(timeout) = lookup("DATABASE_ACQUIRE_TIMEOUT") {
            let seconds: u64 = timeout.trim().parse().map_err(|_| {
                ConfigError::invalid_value(
                    "DATABASE_ACQUIRE_TIMEOUT",
                    &timeout,
                    "a whole number of seconds",
                )
            })?;
            config.acquire_timeout = Duration::from_secs(seconds);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    pub fn with_migrations_table(mut self, table: impl Into<String>) -> Self {
        self.migrations_table = table.into();
        self
    }

    pub fn with_out_of_order(mut self, allow: bool) -> Self {
        self.allow_out_of_order = allow;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_identifier(&self.migrations_table) {
            return Err(ConfigError::invalid_value(
                "migrations_table",
                &self.migrations_table,
                "a SQL identifier (letters, digits and underscores, not starting with a digit)",
            ));
        }

        if let Some(url) = &self.database_url {
            Dialect::from_url(url).map_err(|_| {
                ConfigError::invalid_value(
                    "database_url",
                    url,
                    "a sqlite: or postgres:// connection URL",
                )
            })?;
        }

        if self.acquire_timeout.is_zero() {
            return Err(ConfigError::validation_failed(
                "acquire_timeout must be greater than zero",
            ));
        }

        Ok(())
    }

    /// The database URL, or an error explaining how to provide one
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url.as_deref().ok_or_else(|| {
            ConfigError::missing_required(
                "database_url",
                "Set DATABASE_URL or pass --database-url",
            )
        })
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::invalid_value(field, value, "true or false")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = MigrationConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.migrations_table, "schema_migrations");
        assert_eq!(config.migrations_dir, PathBuf::from("migrations"));
        assert!(config.database_url.is_none());
        assert!(!config.allow_out_of_order);
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_values_from_lookup() {
        let config = MigrationConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("MIGRATIONS_DIR", "db/migrations"),
            ("MIGRATIONS_TABLE", "app_migrations"),
            ("MIGRATIONS_ALLOW_OUT_OF_ORDER", "yes"),
            ("DATABASE_ACQUIRE_TIMEOUT", "5"),
        ]))
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(config.migrations_dir, PathBuf::from("db/migrations"));
        assert_eq!(config.migrations_table, "app_migrations");
        assert!(config.allow_out_of_order);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = MigrationConfig::from_lookup(lookup(&[("MIGRATIONS_TABLE", "drop table;")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = MigrationConfig::from_lookup(lookup(&[("DATABASE_URL", "mysql://localhost/x")]))
            .unwrap_err();
        assert!(err.to_string().contains("database_url"));

        let err = MigrationConfig::from_lookup(lookup(&[(
            "MIGRATIONS_ALLOW_OUT_OF_ORDER",
            "sometimes",
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("true or false"));

        let err = MigrationConfig::from_lookup(lookup(&[("DATABASE_ACQUIRE_TIMEOUT", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationFailed { .. }));
    }

    #[test]
    fn test_require_database_url() {
        let config = MigrationConfig::default();
        let err = config.require_database_url().unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));

        let config = config.with_database_url("postgres://localhost/app");
        assert_eq!(
            config.require_database_url().unwrap(),
            "postgres://localhost/app"
        );
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("MIGRATIONS_TABLE", "env_migrations");
        std::env::set_var("DATABASE_URL", "sqlite::memory:");
        let config = MigrationConfig::from_env();
        std::env::remove_var("MIGRATIONS_TABLE");
        std::env::remove_var("DATABASE_URL");

        let config = config.unwrap();
        assert_eq!(config.migrations_table, "env_migrations");
        assert_eq!(config.database_url.as_deref(), Some("sqlite::memory:"));
    }
}
