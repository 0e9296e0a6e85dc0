//! Table Builder - DSL for declaring table structure inside migrations
//!
//! A [`TableBuilder`] is handed by `&mut` to the configuration closure of
//! [`Schema::create_table`](super::Schema::create_table) and
//! [`Schema::table`](super::Schema::table). It only accumulates declarations;
//! nothing is validated or sent until the schema renders it.

use std::collections::HashSet;

use super::column::{ColumnDefinition, ColumnType, DefaultValue};
use super::is_valid_identifier;
use crate::dialect::Dialect;
use crate::error::{MigrationError, MigrationResult};

/// Action taken on referencing rows when the referenced row changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferentialAction {
    Cascade,
    SetNull,
    Restrict,
    NoAction,
}

impl ReferentialAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::NoAction => "NO ACTION",
        }
    }
}

/// Foreign key constraint declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDefinition {
    column: String,
    references_table: String,
    references_column: String,
    on_delete: Option<ReferentialAction>,
    on_update: Option<ReferentialAction>,
}

impl ForeignKeyDefinition {
    pub fn on_delete(&mut self, action: ReferentialAction) -> &mut Self {
        self.on_delete = Some(action);
        self
    }

    pub fn on_update(&mut self, action: ReferentialAction) -> &mut Self {
        self.on_update = Some(action);
        self
    }

    fn to_sql(&self) -> String {
        let mut sql = format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            self.column, self.references_table, self.references_column
        );
        if let Some(action) = self.on_delete {
            sql.push_str(" ON DELETE ");
            sql.push_str(action.as_sql());
        }
        if let Some(action) = self.on_update {
            sql.push_str(" ON UPDATE ");
            sql.push_str(action.as_sql());
        }
        sql
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TableConstraint {
    PrimaryKey(Vec<String>),
    Unique(Vec<String>),
    Check(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AlterCommand {
    DropColumn(String),
    RenameColumn { from: String, to: String },
}

/// Accumulates column and constraint declarations for one table
#[derive(Debug, Clone)]
pub struct TableBuilder {
    table_name: String,
    columns: Vec<ColumnDefinition>,
    constraints: Vec<TableConstraint>,
    foreign_keys: Vec<ForeignKeyDefinition>,
    commands: Vec<AlterCommand>,
    errors: Vec<String>,
}

impl TableBuilder {
    pub fn new(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            columns: Vec::new(),
            constraints: Vec::new(),
            foreign_keys: Vec::new(),
            commands: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    fn push(&mut self, column: ColumnDefinition) -> &mut ColumnDefinition {
        let index = self.columns.len();
        self.columns.push(column);
        &mut self.columns[index]
    }

    /// Add a column of an explicit type
    pub fn add_column(&mut self, name: &str, column_type: ColumnType) -> &mut ColumnDefinition {
        self.push(ColumnDefinition::new(name, column_type))
    }

    /// Add a column whose type is given by name, e.g. `"decimal(10, 2)"`
    ///
    /// An unknown type name is reported when the table is rendered.
    pub fn column(&mut self, name: &str, type_name: &str) -> &mut ColumnDefinition {
        let column_type = match ColumnType::parse(type_name) {
            Ok(column_type) => column_type,
            Err(err) => {
                self.errors.push(format!("column '{}': {}", name, detail(err)));
                ColumnType::Text
            }
        };
        self.push(ColumnDefinition::new(name, column_type))
    }

    /// Add an `id` auto-increment primary key
    pub fn id(&mut self) -> &mut ColumnDefinition {
        self.push(ColumnDefinition::new("id", ColumnType::Id))
    }

    /// Add a `VARCHAR(255)` column
    pub fn string(&mut self, name: &str) -> &mut ColumnDefinition {
        self.push(ColumnDefinition::new(
            name,
            ColumnType::String(super::column::DEFAULT_STRING_LENGTH),
        ))
    }

    /// Add a `VARCHAR(length)` column
    pub fn string_len(&mut self, name: &str, length: u32) -> &mut ColumnDefinition {
        self.push(ColumnDefinition::new(name, ColumnType::String(length)))
    }

    pub fn text(&mut self, name: &str) -> &mut ColumnDefinition {
        self.push(ColumnDefinition::new(name, ColumnType::Text))
    }

    pub fn integer(&mut self, name: &str) -> &mut ColumnDefinition {
        self.push(ColumnDefinition::new(name, ColumnType::Integer))
    }

    pub fn big_integer(&mut self, name: &str) -> &mut ColumnDefinition {
        self.push(ColumnDefinition::new(name, ColumnType::BigInteger))
    }

    pub fn boolean(&mut self, name: &str) -> &mut ColumnDefinition {
        self.push(ColumnDefinition::new(name, ColumnType::Boolean))
    }

    /// Add a fixed-point column; precision and scale are checked on render
    pub fn decimal(&mut self, name: &str, precision: u32, scale: u32) -> &mut ColumnDefinition {
        self.push(ColumnDefinition::new(
            name,
            ColumnType::Decimal { precision, scale },
        ))
    }

    pub fn double(&mut self, name: &str) -> &mut ColumnDefinition {
        self.push(ColumnDefinition::new(name, ColumnType::Double))
    }

    pub fn date(&mut self, name: &str) -> &mut ColumnDefinition {
        self.push(ColumnDefinition::new(name, ColumnType::Date))
    }

    pub fn timestamp(&mut self, name: &str) -> &mut ColumnDefinition {
        self.push(ColumnDefinition::new(name, ColumnType::Timestamp))
    }

    pub fn json(&mut self, name: &str) -> &mut ColumnDefinition {
        self.push(ColumnDefinition::new(name, ColumnType::Json))
    }

    pub fn uuid(&mut self, name: &str) -> &mut ColumnDefinition {
        self.push(ColumnDefinition::new(name, ColumnType::Uuid))
    }

    pub fn binary(&mut self, name: &str) -> &mut ColumnDefinition {
        self.push(ColumnDefinition::new(name, ColumnType::Binary))
    }

    /// Add `created_at` and `updated_at` timestamp columns
    pub fn timestamps(&mut self) -> &mut Self {
        for name in ["created_at", "updated_at"] {
            self.push(ColumnDefinition::new(name, ColumnType::Timestamp))
                .not_null()
                .default(DefaultValue::CurrentTimestamp);
        }
        self
    }

    /// Add a composite primary key constraint
    pub fn primary_key(&mut self, columns: &[&str]) -> &mut Self {
        self.constraints
            .push(TableConstraint::PrimaryKey(to_owned(columns)));
        self
    }

    /// Add a unique constraint
    pub fn unique(&mut self, columns: &[&str]) -> &mut Self {
        self.constraints.push(TableConstraint::Unique(to_owned(columns)));
        self
    }

    /// Add a check constraint with a raw SQL expression
    pub fn check(&mut self, expression: &str) -> &mut Self {
        self.constraints
            .push(TableConstraint::Check(expression.to_string()));
        self
    }

    /// Add a foreign key constraint
    pub fn foreign_key(
        &mut self,
        column: &str,
        references_table: &str,
        references_column: &str,
    ) -> &mut ForeignKeyDefinition {
        let index = self.foreign_keys.len();
        self.foreign_keys.push(ForeignKeyDefinition {
            column: column.to_string(),
            references_table: references_table.to_string(),
            references_column: references_column.to_string(),
            on_delete: None,
            on_update: None,
        });
        &mut self.foreign_keys[index]
    }

    /// Drop a column (alter mode only)
    pub fn drop_column(&mut self, name: &str) -> &mut Self {
        self.commands.push(AlterCommand::DropColumn(name.to_string()));
        self
    }

    /// Rename a column (alter mode only)
    pub fn rename_column(&mut self, from: &str, to: &str) -> &mut Self {
        self.commands.push(AlterCommand::RenameColumn {
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    /// Build the `CREATE TABLE IF NOT EXISTS` statement
    pub fn to_create_sql(&self, dialect: Dialect) -> MigrationResult<String> {
        self.validate_common()?;

        if self.columns.is_empty() {
            return Err(MigrationError::schema(format!(
                "table '{}' declares no columns",
                self.table_name
            )));
        }
        if !self.commands.is_empty() {
            return Err(MigrationError::schema(format!(
                "drop_column/rename_column are not allowed when creating table '{}'",
                self.table_name
            )));
        }

        let known: HashSet<String> = self
            .columns
            .iter()
            .map(|c| c.name().to_lowercase())
            .collect();
        let primary_keys = self.columns.iter().filter(|c| c.is_primary_key()).count()
            + self
                .constraints
                .iter()
                .filter(|c| matches!(c, TableConstraint::PrimaryKey(_)))
                .count();
        if primary_keys > 1 {
            return Err(MigrationError::schema(format!(
                "table '{}' declares more than one primary key",
                self.table_name
            )));
        }

        for constraint in &self.constraints {
            match constraint {
                TableConstraint::PrimaryKey(columns) | TableConstraint::Unique(columns) => {
                    self.validate_column_list(columns, &known)?;
                }
                TableConstraint::Check(expression) => {
                    if expression.trim().is_empty() {
                        return Err(MigrationError::schema(format!(
                            "table '{}' has an empty check constraint",
                            self.table_name
                        )));
                    }
                }
            }
        }
        for foreign_key in &self.foreign_keys {
            self.validate_column_list(std::slice::from_ref(&foreign_key.column), &known)?;
            check_identifier(&foreign_key.references_table, "referenced table")?;
            check_identifier(&foreign_key.references_column, "referenced column")?;
        }

        let mut parts: Vec<String> = self.columns.iter().map(|c| c.to_sql(dialect)).collect();
        parts.extend(self.constraints.iter().map(|c| match c {
            TableConstraint::PrimaryKey(columns) => format!("PRIMARY KEY ({})", columns.join(", ")),
            TableConstraint::Unique(columns) => format!("UNIQUE ({})", columns.join(", ")),
            TableConstraint::Check(expression) => format!("CHECK ({})", expression),
        }));
        parts.extend(self.foreign_keys.iter().map(|fk| fk.to_sql()));

        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.table_name,
            parts.join(",\n    ")
        ))
    }

    /// Build the `ALTER TABLE` statements, one per change
    pub fn to_alter_sql(&self, dialect: Dialect) -> MigrationResult<Vec<String>> {
        self.validate_common()?;

        if !self.constraints.is_empty() || !self.foreign_keys.is_empty() {
            return Err(MigrationError::schema(format!(
                "table constraints cannot be added to existing table '{}'",
                self.table_name
            )));
        }
        if self.columns.is_empty() && self.commands.is_empty() {
            return Err(MigrationError::schema(format!(
                "alteration of table '{}' declares no changes",
                self.table_name
            )));
        }

        for column in &self.columns {
            if column.is_primary_key() {
                return Err(MigrationError::schema(format!(
                    "primary key column '{}' cannot be added to existing table '{}'",
                    column.name(),
                    self.table_name
                )));
            }
            if dialect == Dialect::Sqlite
                && !column.is_nullable()
                && matches!(column.default_value(), None | Some(DefaultValue::Null))
            {
                return Err(MigrationError::schema(format!(
                    "NOT NULL column '{}' added to '{}' needs a non-null default",
                    column.name(),
                    self.table_name
                )));
            }
            if dialect == Dialect::Sqlite && column.is_unique() {
                return Err(MigrationError::schema(format!(
                    "UNIQUE column '{}' cannot be added to existing table '{}'; create a unique index instead",
                    column.name(),
                    self.table_name
                )));
            }
        }

        let mut statements: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("ALTER TABLE {} ADD COLUMN {}", self.table_name, c.to_sql(dialect)))
            .collect();

        for command in &self.commands {
            let statement = match command {
                AlterCommand::DropColumn(name) => {
                    check_identifier(name, "column")?;
                    format!("ALTER TABLE {} DROP COLUMN {}", self.table_name, name)
                }
                AlterCommand::RenameColumn { from, to } => {
                    check_identifier(from, "column")?;
                    check_identifier(to, "column")?;
                    format!(
                        "ALTER TABLE {} RENAME COLUMN {} TO {}",
                        self.table_name, from, to
                    )
                }
            };
            statements.push(statement);
        }

        Ok(statements)
    }

    /// Checks shared by create and alter mode
    fn validate_common(&self) -> MigrationResult<()> {
        if !self.errors.is_empty() {
            return Err(MigrationError::schema(format!(
                "table '{}': {}",
                self.table_name,
                self.errors.join("; ")
            )));
        }

        check_identifier(&self.table_name, "table")?;

        let mut seen = HashSet::new();
        for column in &self.columns {
            check_identifier(column.name(), "column")?;
            if !seen.insert(column.name().to_lowercase()) {
                return Err(MigrationError::schema(format!(
                    "column '{}' is declared twice on table '{}'",
                    column.name(),
                    self.table_name
                )));
            }
            column.column_type().validate().map_err(|err| {
                MigrationError::schema(format!(
                    "column '{}' on table '{}': {}",
                    column.name(),
                    self.table_name,
                    detail(err)
                ))
            })?;
        }

        Ok(())
    }

    fn validate_column_list(&self, columns: &[String], known: &HashSet<String>) -> MigrationResult<()> {
        if columns.is_empty() {
            return Err(MigrationError::schema(format!(
                "table '{}' has a constraint without columns",
                self.table_name
            )));
        }
        for column in columns {
            if !known.contains(&column.to_lowercase()) {
                return Err(MigrationError::schema(format!(
                    "constraint on table '{}' references unknown column '{}'",
                    self.table_name, column
                )));
            }
        }
        Ok(())
    }
}

fn to_owned(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

fn detail(err: MigrationError) -> String {
    match err {
        MigrationError::SchemaDefinition(message) => message,
        other => other.to_string(),
    }
}

pub(super) fn check_identifier(name: &str, kind: &str) -> MigrationResult<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(MigrationError::schema(format!(
            "invalid {} name '{}'",
            kind, name
        )))
    }
}
