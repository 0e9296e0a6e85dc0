//! Column specifications accumulated by the table builder

use crate::dialect::Dialect;
use crate::error::{MigrationError, MigrationResult};

/// Largest precision accepted for `DECIMAL` columns
pub const MAX_DECIMAL_PRECISION: u32 = 1000;

/// Length used by [`TableBuilder::string`](super::TableBuilder::string)
pub const DEFAULT_STRING_LENGTH: u32 = 255;

/// Portable column types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Auto-incrementing surrogate primary key
    Id,
    String(u32),
    Text,
    Integer,
    BigInteger,
    Boolean,
    Decimal { precision: u32, scale: u32 },
    Double,
    Date,
    Timestamp,
    Json,
    Uuid,
    Binary,
}

impl ColumnType {
    /// Parse a type name such as `string`, `varchar(100)` or `decimal(10, 2)`
    pub fn parse(type_name: &str) -> MigrationResult<Self> {
        let normalized = type_name.trim().to_lowercase();
        let (base, args) = match normalized.find('(') {
            Some(open) => {
                let close = normalized.rfind(')').filter(|close| *close > open).ok_or_else(|| {
                    MigrationError::schema(format!("malformed column type '{}'", type_name))
                })?;
                if !normalized[close + 1..].trim().is_empty() {
                    return Err(MigrationError::schema(format!(
                        "malformed column type '{}'",
                        type_name
                    )));
                }
                let args = normalized[open + 1..close]
                    .split(',')
                    .map(|arg| {
                        arg.trim().parse::<u32>().map_err(|_| {
                            MigrationError::schema(format!(
                                "column type '{}' has a non-numeric argument '{}'",
                                type_name,
                                arg.trim()
                            ))
                        })
                    })
                    .collect::<MigrationResult<Vec<u32>>>()?;
                (normalized[..open].trim().to_string(), args)
            }
            None => (normalized.clone(), Vec::new()),
        };

        let column_type = match (base.as_str(), args.as_slice()) {
            ("id" | "increments", []) => ColumnType::Id,
            ("string" | "varchar", []) => ColumnType::String(DEFAULT_STRING_LENGTH),
            ("string" | "varchar", [length]) => ColumnType::String(*length),
            ("text", []) => ColumnType::Text,
            ("integer" | "int", []) => ColumnType::Integer,
            ("biginteger" | "big_integer" | "bigint", []) => ColumnType::BigInteger,
            ("boolean" | "bool", []) => ColumnType::Boolean,
            ("decimal" | "numeric", [precision, scale]) => ColumnType::Decimal {
                precision: *precision,
                scale: *scale,
            },
            ("decimal" | "numeric", [precision]) => ColumnType::Decimal {
                precision: *precision,
                scale: 0,
            },
            ("double" | "float" | "real", []) => ColumnType::Double,
            ("date", []) => ColumnType::Date,
            ("timestamp" | "datetime", []) => ColumnType::Timestamp,
            ("json", []) => ColumnType::Json,
            ("uuid", []) => ColumnType::Uuid,
            ("binary" | "blob", []) => ColumnType::Binary,
            _ => {
                return Err(MigrationError::schema(format!(
                    "unsupported column type '{}'",
                    type_name
                )))
            }
        };

        column_type.validate()?;
        Ok(column_type)
    }

    /// Check type arguments
    pub fn validate(&self) -> MigrationResult<()> {
        match *self {
            ColumnType::String(0) => Err(MigrationError::schema(
                "string length must be greater than zero",
            )),
            ColumnType::Decimal { precision, scale } => {
                if precision == 0 || precision > MAX_DECIMAL_PRECISION {
                    Err(MigrationError::schema(format!(
                        "decimal precision {} is out of range 1..={}",
                        precision, MAX_DECIMAL_PRECISION
                    )))
                } else if scale > precision {
                    Err(MigrationError::schema(format!(
                        "decimal scale {} exceeds precision {}",
                        scale, precision
                    )))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    /// SQL type for the dialect
    pub fn to_sql(&self, dialect: Dialect) -> String {
        match (self, dialect) {
            (ColumnType::Id, _) => dialect.auto_increment_primary_key().to_string(),
            (ColumnType::String(length), _) => format!("VARCHAR({})", length),
            (ColumnType::Text, _) => "TEXT".to_string(),
            (ColumnType::Integer, _) => "INTEGER".to_string(),
            (ColumnType::BigInteger, _) => "BIGINT".to_string(),
            (ColumnType::Boolean, _) => "BOOLEAN".to_string(),
            (ColumnType::Decimal { precision, scale }, _) => {
                format!("DECIMAL({}, {})", precision, scale)
            }
            (ColumnType::Double, Dialect::Sqlite) => "REAL".to_string(),
            (ColumnType::Double, Dialect::Postgres) => "DOUBLE PRECISION".to_string(),
            (ColumnType::Date, _) => "DATE".to_string(),
            (ColumnType::Timestamp, _) => "TIMESTAMP".to_string(),
            (ColumnType::Json, Dialect::Sqlite) => "TEXT".to_string(),
            (ColumnType::Json, Dialect::Postgres) => "JSONB".to_string(),
            (ColumnType::Uuid, Dialect::Sqlite) => "CHAR(36)".to_string(),
            (ColumnType::Uuid, Dialect::Postgres) => "UUID".to_string(),
            (ColumnType::Binary, Dialect::Sqlite) => "BLOB".to_string(),
            (ColumnType::Binary, Dialect::Postgres) => "BYTEA".to_string(),
        }
    }
}

/// Column default value
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    CurrentTimestamp,
    /// Raw SQL expression, rendered in parentheses
    Expression(String),
}

impl DefaultValue {
    pub fn to_sql(&self, dialect: Dialect) -> String {
        match self {
            DefaultValue::Null => "NULL".to_string(),
            DefaultValue::Bool(value) => dialect.boolean_literal(*value).to_string(),
            DefaultValue::Integer(value) => value.to_string(),
            DefaultValue::Float(value) => value.to_string(),
            DefaultValue::Text(value) => format!("'{}'", value.replace('\'', "''")),
            DefaultValue::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
            DefaultValue::Expression(expr) => format!("({})", expr),
        }
    }
}

impl From<bool> for DefaultValue {
    fn from(value: bool) -> Self {
        DefaultValue::Bool(value)
    }
}

impl From<i32> for DefaultValue {
    fn from(value: i32) -> Self {
        DefaultValue::Integer(value.into())
    }
}

impl From<i64> for DefaultValue {
    fn from(value: i64) -> Self {
        DefaultValue::Integer(value)
    }
}

impl From<f64> for DefaultValue {
    fn from(value: f64) -> Self {
        DefaultValue::Float(value)
    }
}

impl From<&str> for DefaultValue {
    fn from(value: &str) -> Self {
        DefaultValue::Text(value.to_string())
    }
}

impl From<String> for DefaultValue {
    fn from(value: String) -> Self {
        DefaultValue::Text(value)
    }
}

/// A single column declaration with its modifiers
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    name: String,
    column_type: ColumnType,
    nullable: bool,
    default: Option<DefaultValue>,
    unique: bool,
    primary_key: bool,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            default: None,
            unique: false,
            primary_key: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn default_value(&self) -> Option<&DefaultValue> {
        self.default.as_ref()
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// True for `primary_key()` columns and `id()` columns
    pub fn is_primary_key(&self) -> bool {
        self.primary_key || self.column_type == ColumnType::Id
    }

    pub fn not_null(&mut self) -> &mut Self {
        self.nullable = false;
        self
    }

    pub fn nullable(&mut self) -> &mut Self {
        self.nullable = true;
        self
    }

    pub fn default(&mut self, value: impl Into<DefaultValue>) -> &mut Self {
        self.default = Some(value.into());
        self
    }

    pub fn default_current_timestamp(&mut self) -> &mut Self {
        self.default = Some(DefaultValue::CurrentTimestamp);
        self
    }

    pub fn unique(&mut self) -> &mut Self {
        self.unique = true;
        self
    }

    pub fn primary_key(&mut self) -> &mut Self {
        self.primary_key = true;
        self
    }

    /// Render `name TYPE [PRIMARY KEY] [NOT NULL] [UNIQUE] [DEFAULT x]`
    pub fn to_sql(&self, dialect: Dialect) -> String {
        let mut sql = format!("{} {}", self.name, self.column_type.to_sql(dialect));

        if self.column_type == ColumnType::Id {
            return sql;
        }
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if self.unique && !self.primary_key {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.to_sql(dialect));
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type_names() {
        assert_eq!(ColumnType::parse("string").unwrap(), ColumnType::String(255));
        assert_eq!(ColumnType::parse("VARCHAR(100)").unwrap(), ColumnType::String(100));
        assert_eq!(
            ColumnType::parse("decimal(10, 2)").unwrap(),
            ColumnType::Decimal { precision: 10, scale: 2 }
        );
        assert_eq!(ColumnType::parse(" bigint ").unwrap(), ColumnType::BigInteger);
        assert_eq!(ColumnType::parse("datetime").unwrap(), ColumnType::Timestamp);
    }

    #[test]
    fn test_parse_rejects_unknown_and_invalid_types() {
        let err = ColumnType::parse("money").unwrap_err();
        assert!(err.to_string().contains("unsupported column type 'money'"));

        assert!(ColumnType::parse("decimal(0, 0)").is_err());
        assert!(ColumnType::parse("decimal(5, 6)").is_err());
        assert!(ColumnType::parse("decimal(1001, 2)").is_err());
        assert!(ColumnType::parse("string(0)").is_err());
        assert!(ColumnType::parse("string(abc)").is_err());
        assert!(ColumnType::parse("decimal(10, 2").is_err());
        assert!(ColumnType::parse("integer(4)").is_err());
    }

    #[test]
    fn test_type_rendering_per_dialect() {
        assert_eq!(
            ColumnType::Id.to_sql(Dialect::Sqlite),
            "INTEGER PRIMARY KEY AUTOINCREMENT"
        );
        assert_eq!(ColumnType::Id.to_sql(Dialect::Postgres), "BIGSERIAL PRIMARY KEY");
        assert_eq!(ColumnType::Double.to_sql(Dialect::Sqlite), "REAL");
        assert_eq!(ColumnType::Double.to_sql(Dialect::Postgres), "DOUBLE PRECISION");
        assert_eq!(ColumnType::Json.to_sql(Dialect::Postgres), "JSONB");
        assert_eq!(
            ColumnType::Decimal { precision: 10, scale: 2 }.to_sql(Dialect::Sqlite),
            "DECIMAL(10, 2)"
        );
    }

    #[test]
    fn test_column_modifiers() {
        let mut column = ColumnDefinition::new("email", ColumnType::String(255));
        column.not_null().unique();
        assert_eq!(column.to_sql(Dialect::Sqlite), "email VARCHAR(255) NOT NULL UNIQUE");

        let mut active = ColumnDefinition::new("active", ColumnType::Boolean);
        active.not_null().default(true);
        assert_eq!(active.to_sql(Dialect::Sqlite), "active BOOLEAN NOT NULL DEFAULT 1");
        assert_eq!(
            active.to_sql(Dialect::Postgres),
            "active BOOLEAN NOT NULL DEFAULT TRUE"
        );

        let mut title = ColumnDefinition::new("title", ColumnType::Text);
        title.default("it's new");
        assert_eq!(title.to_sql(Dialect::Sqlite), "title TEXT DEFAULT 'it''s new'");

        let mut id = ColumnDefinition::new("id", ColumnType::Id);
        id.not_null();
        assert!(id.is_primary_key());
        assert_eq!(id.to_sql(Dialect::Sqlite), "id INTEGER PRIMARY KEY AUTOINCREMENT");
    }
}
