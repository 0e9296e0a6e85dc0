//! Migration - a reversible unit of schema change

use async_trait::async_trait;

use crate::error::MigrationResult;
use crate::loader::split_statements;
use crate::schema::Schema;

/// A versioned schema change with forward and reverse steps
///
/// `up` may rely on every migration registered before it having run; `down`
/// must undo the schema effect of `up`.
///
/// ```ignore
/// struct CreateUsers;
///
/// #[async_trait]
/// impl Migration for CreateUsers {
///     async fn up(&self, schema: &mut Schema<'_>) -> MigrationResult<()> {
///         schema
///             .create_table("users", |table| {
///                 table.id();
///                 table.string("username").not_null();
///                 table.timestamps();
///             })
///             .await
///     }
///
///     async fn down(&self, schema: &mut Schema<'_>) -> MigrationResult<()> {
///         schema.drop_table("users").await
///     }
/// }
/// ```
#[async_trait]
pub trait Migration: Send + Sync {
    /// Explicit identifier; when `None` the 1-based registration position is used
    fn id(&self) -> Option<&str> {
        None
    }

    /// Human readable description for logs and status output
    fn name(&self) -> Option<&str> {
        None
    }

    async fn up(&self, schema: &mut Schema<'_>) -> MigrationResult<()>;

    async fn down(&self, schema: &mut Schema<'_>) -> MigrationResult<()>;
}

/// Migration defined by plain SQL scripts, as loaded from `.sql` files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlMigration {
    pub id: String,
    pub name: String,
    pub up_sql: String,
    pub down_sql: String,
}

impl SqlMigration {
    pub fn new(id: impl Into<String>, up_sql: impl Into<String>, down_sql: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            up_sql: up_sql.into(),
            down_sql: down_sql.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    async fn run_script(script: &str, schema: &mut Schema<'_>) -> MigrationResult<()> {
        for statement in split_statements(script, schema.dialect()) {
            schema.raw(&statement).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Migration for SqlMigration {
    fn id(&self) -> Option<&str> {
        Some(&self.id)
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    async fn up(&self, schema: &mut Schema<'_>) -> MigrationResult<()> {
        Self::run_script(&self.up_sql, schema).await
    }

    async fn down(&self, schema: &mut Schema<'_>) -> MigrationResult<()> {
        Self::run_script(&self.down_sql, schema).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use sqlx::{AnyConnection, Connection};

    #[tokio::test]
    async fn test_sql_migration_runs_each_statement() {
        sqlx::any::install_default_drivers();
        let mut conn = AnyConnection::connect("sqlite::memory:").await.unwrap();
        let migration = SqlMigration::new(
            "20240101_000000_create_tags",
            "CREATE TABLE tags (id INTEGER PRIMARY KEY, label TEXT NOT NULL);\n\
             INSERT INTO tags (label) VALUES ('semi;colon');",
            "DROP TABLE tags;",
        )
        .with_name("create tags");

        let mut schema = Schema::new(&mut conn, Dialect::Sqlite);
        migration.up(&mut schema).await.unwrap();
        assert_eq!(schema.executed().len(), 2);
        assert!(schema.has_table("tags").await.unwrap());

        migration.down(&mut schema).await.unwrap();
        assert!(!schema.has_table("tags").await.unwrap());
        assert_eq!(migration.id(), Some("20240101_000000_create_tags"));
        assert_eq!(migration.name(), Some("create tags"));
    }
}
