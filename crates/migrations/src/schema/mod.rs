//! Schema DSL used by migrations
//!
//! [`Schema`] executes structural changes on the connection a migration step
//! runs on; [`TableBuilder`] collects column and constraint declarations.

pub mod column;
pub mod schema_builder;
pub mod table_builder;

use once_cell::sync::Lazy;
use regex::Regex;

pub use column::{ColumnDefinition, ColumnType, DefaultValue};
pub use schema_builder::Schema;
pub use table_builder::{ForeignKeyDefinition, ReferentialAction, TableBuilder};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern compiles"));

/// True when `name` can be used unquoted as a table, column or index name
pub fn is_valid_identifier(name: &str) -> bool {
    name.len() <= 63 && IDENTIFIER.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers() {
        assert!(is_valid_identifier("users"));
        assert!(is_valid_identifier("_private_2"));
        assert!(!is_valid_identifier("2fast"));
        assert!(!is_valid_identifier("drop table"));
        assert!(!is_valid_identifier("name;--"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier(&"a".repeat(64)));
    }
}
