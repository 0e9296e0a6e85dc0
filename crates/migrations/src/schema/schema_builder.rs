//! Schema - executes structural changes for one migration step
//!
//! Every statement runs on the connection the step was given, which is the
//! step's open transaction when driven by the manager. Nothing here commits.

use sqlx::AnyConnection;
use tracing::debug;

use super::table_builder::{check_identifier, TableBuilder};
use crate::connection::{count, execute};
use crate::dialect::Dialect;
use crate::error::{MigrationError, MigrationResult};

/// Statement executor handed to [`Migration::up`](crate::Migration::up)
/// and [`Migration::down`](crate::Migration::down)
pub struct Schema<'c> {
    conn: &'c mut AnyConnection,
    dialect: Dialect,
    executed: Vec<String>,
}

impl<'c> Schema<'c> {
    pub fn new(conn: &'c mut AnyConnection, dialect: Dialect) -> Self {
        Self {
            conn,
            dialect,
            executed: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// The underlying connection, for queries the builder does not cover
    pub fn connection(&mut self) -> &mut AnyConnection {
        &mut *self.conn
    }

    /// Statements executed so far, in order
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    /// Create a table from the declarations made in `configure`
    ///
    /// The definition is validated before anything is sent to the database.
    pub async fn create_table<F>(&mut self, name: &str, configure: F) -> MigrationResult<()>
    where
        F: FnOnce(&mut TableBuilder),
    {
        let mut table = TableBuilder::new(name);
        configure(&mut table);
        let sql = table.to_create_sql(self.dialect)?;
        self.run(sql).await
    }

    /// Alter an existing table
    ///
    /// Each added, dropped or renamed column becomes its own statement.
    pub async fn table<F>(&mut self, name: &str, configure: F) -> MigrationResult<()>
    where
        F: FnOnce(&mut TableBuilder),
    {
        let mut table = TableBuilder::new(name);
        configure(&mut table);
        for sql in table.to_alter_sql(self.dialect)? {
            self.run(sql).await?;
        }
        Ok(())
    }

    pub async fn drop_table(&mut self, name: &str) -> MigrationResult<()> {
        check_identifier(name, "table")?;
        self.run(format!("DROP TABLE IF EXISTS {}", name)).await
    }

    pub async fn rename_table(&mut self, from: &str, to: &str) -> MigrationResult<()> {
        check_identifier(from, "table")?;
        check_identifier(to, "table")?;
        self.run(format!("ALTER TABLE {} RENAME TO {}", from, to))
            .await
    }

    /// Create an index named `<table>_<columns>_idx` (or `_unique`)
    pub async fn create_index(
        &mut self,
        table: &str,
        columns: &[&str],
        unique: bool,
    ) -> MigrationResult<String> {
        check_identifier(table, "table")?;
        if columns.is_empty() {
            return Err(MigrationError::schema(format!(
                "index on '{}' needs at least one column",
                table
            )));
        }
        for column in columns {
            check_identifier(column, "column")?;
        }

        let suffix = if unique { "unique" } else { "idx" };
        let name = format!("{}_{}_{}", table, columns.join("_"), suffix);
        check_identifier(&name, "index")?;

        let sql = format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if unique { "UNIQUE " } else { "" },
            name,
            table,
            columns.join(", ")
        );
        self.run(sql).await?;
        Ok(name)
    }

    pub async fn drop_index(&mut self, name: &str) -> MigrationResult<()> {
        check_identifier(name, "index")?;
        self.run(format!("DROP INDEX IF EXISTS {}", name)).await
    }

    pub async fn has_table(&mut self, name: &str) -> MigrationResult<bool> {
        let found = count(&mut *self.conn, self.dialect.table_exists_sql(), &[name]).await?;
        Ok(found > 0)
    }

    pub async fn has_column(&mut self, table: &str, column: &str) -> MigrationResult<bool> {
        let found = count(&mut *self.conn, self.dialect.column_exists_sql(), &[table, column]).await?;
        Ok(found > 0)
    }

    /// Execute SQL verbatim
    pub async fn raw(&mut self, sql: &str) -> MigrationResult<()> {
        if sql.trim().is_empty() {
            return Ok(());
        }
        self.run(sql.to_string()).await
    }

    async fn run(&mut self, sql: String) -> MigrationResult<()> {
        debug!("Schema statement: {}", sql);
        execute(&mut *self.conn, &sql).await?;
        self.executed.push(sql);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ReferentialAction;
    use sqlx::Connection;

    async fn memory() -> AnyConnection {
        sqlx::any::install_default_drivers();
        AnyConnection::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_create_and_drop_table() {
        let mut conn = memory().await;
        let mut schema = Schema::new(&mut conn, Dialect::Sqlite);

        schema
            .create_table("test_users", |table| {
                table.id();
                table.string("username").not_null();
                table.string("email").not_null().unique();
                table.timestamps();
            })
            .await
            .unwrap();
        assert!(schema.has_table("test_users").await.unwrap());
        assert!(schema.has_column("test_users", "email").await.unwrap());
        assert!(!schema.has_column("test_users", "password").await.unwrap());

        // Idempotent thanks to IF NOT EXISTS
        schema
            .create_table("test_users", |table| {
                table.id();
            })
            .await
            .unwrap();

        schema.drop_table("test_users").await.unwrap();
        assert!(!schema.has_table("test_users").await.unwrap());
        schema.drop_table("test_users").await.unwrap();
        assert_eq!(schema.executed().len(), 4);
    }

    #[tokio::test]
    async fn test_invalid_definition_sends_nothing() {
        let mut conn = memory().await;
        let mut schema = Schema::new(&mut conn, Dialect::Sqlite);

        let err = schema
            .create_table("test_products", |table| {
                table.id();
                table.decimal("price", 0, 2);
            })
            .await
            .unwrap_err();
        assert!(err.is_schema_definition());
        assert!(schema.executed().is_empty());
        assert!(!schema.has_table("test_products").await.unwrap());
    }

    #[tokio::test]
    async fn test_alter_table() {
        let mut conn = memory().await;
        let mut schema = Schema::new(&mut conn, Dialect::Sqlite);

        schema
            .create_table("accounts", |table| {
                table.id();
                table.string("email").not_null();
            })
            .await
            .unwrap();
        schema
            .table("accounts", |table| {
                table.boolean("active").not_null().default(true);
                table.rename_column("email", "email_address");
            })
            .await
            .unwrap();

        assert!(schema.has_column("accounts", "active").await.unwrap());
        assert!(schema.has_column("accounts", "email_address").await.unwrap());
        assert!(!schema.has_column("accounts", "email").await.unwrap());

        schema.rename_table("accounts", "members").await.unwrap();
        assert!(schema.has_table("members").await.unwrap());
        assert!(!schema.has_table("accounts").await.unwrap());
    }

    #[tokio::test]
    async fn test_indexes_and_foreign_keys() {
        let mut conn = memory().await;
        let mut schema = Schema::new(&mut conn, Dialect::Sqlite);

        schema
            .create_table("authors", |table| {
                table.id();
                table.string("name").not_null();
            })
            .await
            .unwrap();
        schema
            .create_table("books", |table| {
                table.id();
                table.integer("author_id").not_null();
                table.string("isbn").not_null();
                table
                    .foreign_key("author_id", "authors", "id")
                    .on_delete(ReferentialAction::Cascade);
            })
            .await
            .unwrap();

        let name = schema.create_index("books", &["isbn"], true).await.unwrap();
        assert_eq!(name, "books_isbn_unique");

        schema
            .raw("INSERT INTO authors (name) VALUES ('Ursula')")
            .await
            .unwrap();
        schema
            .raw("INSERT INTO books (author_id, isbn) VALUES (1, '978-0')")
            .await
            .unwrap();
        let duplicate = schema
            .raw("INSERT INTO books (author_id, isbn) VALUES (1, '978-0')")
            .await
            .unwrap_err();
        assert!(duplicate.is_execution());

        schema.drop_index(&name).await.unwrap();
        schema
            .raw("INSERT INTO books (author_id, isbn) VALUES (1, '978-0')")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejects_invalid_names() {
        let mut conn = memory().await;
        let mut schema = Schema::new(&mut conn, Dialect::Sqlite);

        assert!(schema.drop_table("users; --").await.unwrap_err().is_schema_definition());
        assert!(schema.create_index("users", &[], false).await.is_err());
        assert!(schema.executed().is_empty());
    }
}
