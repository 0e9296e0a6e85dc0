//! Migration Loader - File system operations for SQL migrations
//!
//! Handles creating, loading, and parsing `.sql` migration files.

use chrono::Utc;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, Tokenizer};
use tracing::{debug, warn};

use crate::config::MigrationConfig;
use crate::dialect::Dialect;
use crate::error::{MigrationError, MigrationResult};
use crate::migration::SqlMigration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Up,
    Down,
}

/// Loader for `.sql` migrations in one directory
#[derive(Debug, Clone)]
pub struct MigrationLoader {
    dir: PathBuf,
}

impl MigrationLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &MigrationConfig) -> Self {
        Self::new(config.migrations_dir.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load all migration files, sorted by file name
    ///
    /// A missing directory yields no migrations.
    pub fn load(&self) -> MigrationResult<Vec<SqlMigration>> {
        if !self.dir.exists() {
            debug!("Migrations directory {} does not exist", self.dir.display());
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().map_or(false, |ext| ext == "sql") {
                paths.push(path);
            }
        }
        paths.sort();

        let migrations = paths
            .iter()
            .map(|path| self.parse_file(path))
            .collect::<MigrationResult<Vec<_>>>()?;
        debug!(
            "Loaded {} migration file(s) from {}",
            migrations.len(),
            self.dir.display()
        );
        Ok(migrations)
    }

    /// Parse one migration file; the file stem is the identifier
    pub fn parse_file(&self, path: &Path) -> MigrationResult<SqlMigration> {
        let content = fs::read_to_string(path)?;
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                MigrationError::Registration(format!(
                    "invalid migration file name '{}'",
                    path.display()
                ))
            })?;

        let (up_sql, down_sql) = parse_sections(&content);
        if up_sql.is_empty() && down_sql.is_empty() {
            warn!(
                "Migration file {} has no '-- Up migration' or '-- Down migration' section",
                path.display()
            );
        }

        Ok(SqlMigration::new(id, up_sql, down_sql).with_name(display_name(id)))
    }

    /// Write a new migration file named `<YYYYMMDD_HHMMSS>_<name>.sql`
    pub fn create(&self, name: &str) -> MigrationResult<PathBuf> {
        let slug = snake_case(name);
        if slug.is_empty() {
            return Err(MigrationError::Registration(format!(
                "migration name '{}' has no usable characters",
                name
            )));
        }

        fs::create_dir_all(&self.dir)?;

        let now = Utc::now();
        let id = format!("{}_{}", now.format("%Y%m%d_%H%M%S"), slug);
        let path = self.dir.join(format!("{}.sql", id));
        let template = format!(
            "-- Migration: {}\n\
             -- Created: {}\n\n\
             -- Up migration\n\n\n\
             -- Down migration\n\n",
            name.trim(),
            now.format("%Y-%m-%d %H:%M:%S UTC")
        );

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.write_all(template.as_bytes())?;

        debug!("Created migration file {}", path.display());
        Ok(path)
    }
}

/// Split file content into its up and down SQL
///
/// Sections start at a `-- Up migration` / `-- Down migration` line (or the
/// short `-- up` / `-- down`). Comment and blank lines are dropped, as is
/// anything before the first section.
pub fn parse_sections(content: &str) -> (String, String) {
    let mut up_sql = Vec::new();
    let mut down_sql = Vec::new();
    let mut section = Section::Preamble;

    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(marker) = section_marker(trimmed) {
            section = marker;
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }
        match section {
            Section::Up => up_sql.push(line),
            Section::Down => down_sql.push(line),
            Section::Preamble => {}
        }
    }

    (
        up_sql.join("\n").trim().to_string(),
        down_sql.join("\n").trim().to_string(),
    )
}

fn section_marker(line: &str) -> Option<Section> {
    let label = line.strip_prefix("--")?.trim().to_lowercase();
    match label.as_str() {
        "up" | "up migration" | "migrate:up" => Some(Section::Up),
        "down" | "down migration" | "migrate:down" => Some(Section::Down),
        _ => None,
    }
}

/// Split a script into individual statements
///
/// Semicolons inside strings, quoted identifiers, comments and
/// `CREATE TRIGGER ... BEGIN ... END` bodies do not split.
/// Scripts the tokenizer rejects fall back to splitting on every `;`.
pub fn split_statements(sql: &str, dialect: Dialect) -> Vec<String> {
    let parser_dialect = dialect.sql_parser_dialect();
    let tokens = match Tokenizer::new(parser_dialect.as_ref(), sql)
        .with_unescape(false)
        .tokenize()
    {
        Ok(tokens) => tokens,
        Err(e) => {
            warn!("SQL tokenizing failed, using naive semicolon splitting: {}", e);
            return sql
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
    };

    let mut statements = Vec::new();
    let mut current = String::new();
    let mut has_code = false;
    // Leading keywords of the current statement, enough to spot CREATE [TEMP] TRIGGER
    let mut header: Vec<Keyword> = Vec::with_capacity(3);
    // BEGIN/CASE nesting inside a trigger body, where `;` does not end the statement
    let mut depth = 0usize;

    for token in tokens {
        match token {
            Token::SemiColon if depth == 0 => {
                if has_code {
                    statements.push(current.trim().to_string());
                }
                current.clear();
                has_code = false;
                header.clear();
            }
            Token::Whitespace(_) => {
                if has_code {
                    current.push_str(&token.to_string());
                }
            }
            Token::EOF => {}
            other => {
                let keyword = match &other {
                    Token::Word(word) => word.keyword,
                    _ => Keyword::NoKeyword,
                };
                if header.len() < 3 {
                    header.push(keyword);
                }
                if is_trigger_header(&header) {
                    match keyword {
                        Keyword::BEGIN | Keyword::CASE => depth += 1,
                        Keyword::END => depth = depth.saturating_sub(1),
                        _ => {}
                    }
                }
                has_code = true;
                current.push_str(&other.to_string());
            }
        }
    }
    if has_code {
        statements.push(current.trim().to_string());
    }

    statements
}

fn is_trigger_header(header: &[Keyword]) -> bool {
    header.first() == Some(&Keyword::CREATE) && header.contains(&Keyword::TRIGGER)
}

fn display_name(id: &str) -> String {
    let parts: Vec<&str> = id.split('_').collect();
    let is_timestamped = parts.len() >= 3
        && parts[0].len() == 8
        && parts[1].len() == 6
        && parts[0].chars().chain(parts[1].chars()).all(|c| c.is_ascii_digit());
    let rest = if is_timestamped { &parts[2..] } else { &parts[..] };
    rest.join(" ")
}

fn snake_case(name: &str) -> String {
    let mut slug = String::new();
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') && !slug.is_empty() {
            slug.push('_');
        }
    }
    slug.trim_end_matches('_').to_string()
}
