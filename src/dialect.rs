//! SQL dialect adapter
//!
//! Turns the small set of abstract statements the stores need into text for
//! one of three backends:
//! - `Sqlite`: embedded single-file engine
//! - `Postgres`: row-store server, `$n` placeholders, `ON CONFLICT`
//! - `Mysql`: row-store server, `?` placeholders, `ON DUPLICATE KEY`
//!
//! Everything here is pure. Adding a backend means adding a variant and
//! filling in the match arms, not new call sites in the stores.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Words that must be quoted when used as identifiers on at least one backend.
const RESERVED: &[&str] = &[
    "add", "all", "and", "as", "asc", "by", "check", "column", "create", "default", "delete",
    "desc", "distinct", "drop", "from", "group", "having", "in", "index", "insert", "into", "key",
    "keys", "like", "limit", "not", "null", "or", "order", "primary", "references", "select",
    "set", "table", "to", "update", "user", "value", "values", "where",
];

/// Supported SQL backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    #[serde(rename = "sqlite")]
    Sqlite,
    #[serde(rename = "postgresql")]
    Postgres,
    #[serde(rename = "mysql")]
    Mysql,
}

/// Logical column types, mapped per dialect by [`Dialect::column_type`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Fixed 32-byte hash, usable as a key or index column
    Hash,
    /// Arbitrary-length bytes, never indexed
    Blob,
    /// Variable bytes that appear in an index
    IndexedBlob,
    Text,
    /// Text that appears in a key or index
    IndexedText,
    SmallInt,
    Int,
    BigInt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: ColumnType,
    pub primary_key: bool,
    pub not_null: bool,
    pub autoincrement: bool,
}

impl ColumnDef {
    pub fn new(name: &'static str, ty: ColumnType) -> Self {
        Self { name, ty, primary_key: false, not_null: false, autoincrement: false }
    }

    /// Integer surrogate key assigned by the engine
    pub fn autoincrement(name: &'static str) -> Self {
        Self { name, ty: ColumnType::BigInt, primary_key: true, not_null: true, autoincrement: true }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.not_null = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub table: &'static str,
    pub columns: Vec<&'static str>,
}

/// Table layout: columns, unique constraints and secondary indexes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: Vec<ColumnDef>,
    pub unique: Vec<Vec<&'static str>>,
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    pub fn new(name: &'static str) -> Self {
        Self { name, columns: Vec::new(), unique: Vec::new(), indexes: Vec::new() }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn unique(mut self, columns: &[&'static str]) -> Self {
        self.unique.push(columns.to_vec());
        self
    }

    /// Add a secondary index. Names are prefixed with the table because
    /// PostgreSQL index names share one namespace per schema.
    pub fn index(mut self, columns: &[&'static str]) -> Self {
        self.indexes.push(IndexDef {
            name: format!("{}_{}", self.name, columns.join("_")),
            table: self.name,
            columns: columns.to_vec(),
        });
        self
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    pub fn key_columns(&self) -> Vec<&'static str> {
        self.columns.iter().filter(|c| c.primary_key).map(|c| c.name).collect()
    }
}

/// Statements needed to create an index only if it does not exist yet.
///
/// When `probe` is set the executor runs it first; a non-zero count means
/// the index is already there and `create` must be skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStatement {
    pub probe: Option<String>,
    pub create: String,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgresql",
            Dialect::Mysql => "mysql",
        }
    }

    pub fn all() -> &'static [Dialect] {
        &[Dialect::Sqlite, Dialect::Postgres, Dialect::Mysql]
    }

    /// Derive the dialect from a connection string scheme such as
    /// `sqlite:///path/wallet.sqlite` or `postgresql+asyncpg://host/db`.
    pub fn from_url(url: &str) -> Result<Self> {
        let (scheme, _) = url
            .split_once("://")
            .ok_or_else(|| Error::UnsupportedDialect(url.to_string()))?;
        let scheme = scheme.split('+').next().unwrap_or(scheme);
        scheme.parse()
    }

    pub fn column_type(&self, ty: ColumnType) -> &'static str {
        match (self, ty) {
            (Dialect::Sqlite, ColumnType::Hash | ColumnType::Blob | ColumnType::IndexedBlob) => "BLOB",
            (Dialect::Sqlite, ColumnType::Text | ColumnType::IndexedText) => "TEXT",
            (Dialect::Sqlite, ColumnType::SmallInt) => "TINYINT",
            (Dialect::Sqlite, ColumnType::Int) => "INTEGER",
            (Dialect::Sqlite, ColumnType::BigInt) => "BIGINT",

            (Dialect::Postgres, ColumnType::Hash | ColumnType::Blob | ColumnType::IndexedBlob) => "BYTEA",
            (Dialect::Postgres, ColumnType::Text | ColumnType::IndexedText) => "TEXT",
            (Dialect::Postgres, ColumnType::SmallInt) => "SMALLINT",
            (Dialect::Postgres, ColumnType::Int) => "INTEGER",
            (Dialect::Postgres, ColumnType::BigInt) => "BIGINT",

            (Dialect::Mysql, ColumnType::Hash) => "VARBINARY(32)",
            (Dialect::Mysql, ColumnType::Blob) => "LONGBLOB",
            (Dialect::Mysql, ColumnType::IndexedBlob) => "VARBINARY(255)",
            (Dialect::Mysql, ColumnType::Text) => "TEXT",
            (Dialect::Mysql, ColumnType::IndexedText) => "VARCHAR(255)",
            (Dialect::Mysql, ColumnType::SmallInt) => "TINYINT",
            (Dialect::Mysql, ColumnType::Int) => "INT",
            (Dialect::Mysql, ColumnType::BigInt) => "BIGINT",
        }
    }

    /// Column definition tail for an engine-assigned integer key
    pub fn autoincrement_clause(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Dialect::Postgres => "BIGSERIAL PRIMARY KEY",
            Dialect::Mysql => "BIGINT PRIMARY KEY AUTO_INCREMENT",
        }
    }

    /// Full column definition for an engine-assigned integer key
    pub fn autoincrement_column(&self, name: &str) -> String {
        format!("{} {}", self.ident(name), self.autoincrement_clause())
    }

    /// Quote an identifier unconditionally
    pub fn quote(&self, ident: &str) -> String {
        match self {
            Dialect::Sqlite | Dialect::Postgres => format!("\"{}\"", ident.replace('"', "\"\"")),
            Dialect::Mysql => format!("`{}`", ident.replace('`', "``")),
        }
    }

    /// Quote an identifier only when it is a reserved word
    pub fn ident<'a>(&self, name: &'a str) -> Cow<'a, str> {
        if RESERVED.contains(&name.to_ascii_lowercase().as_str()) {
            Cow::Owned(self.quote(name))
        } else {
            Cow::Borrowed(name)
        }
    }

    /// Positional bind parameter, 1-based
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{}", n),
            Dialect::Postgres => format!("${}", n),
            Dialect::Mysql => "?".to_string(),
        }
    }

    /// `count` comma-separated placeholders starting at `start`
    pub fn placeholders(&self, start: usize, count: usize) -> String {
        (start..start + count)
            .map(|n| self.placeholder(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Largest number of bind parameters a single statement may carry
    pub fn max_bind_parameters(&self) -> usize {
        match self {
            Dialect::Sqlite => 999,
            Dialect::Postgres | Dialect::Mysql => 65_535,
        }
    }

    fn column_list(&self, columns: &[&str]) -> String {
        columns.iter().map(|c| self.ident(c)).collect::<Vec<_>>().join(", ")
    }

    pub fn create_table(&self, table: &TableDef) -> String {
        let mut parts: Vec<String> = table
            .columns
            .iter()
            .map(|column| {
                if column.autoincrement {
                    return self.autoincrement_column(column.name);
                }
                let name = self.ident(column.name);
                let mut def = format!("{} {}", name, self.column_type(column.ty));
                if column.primary_key {
                    def.push_str(" PRIMARY KEY");
                } else if column.not_null {
                    def.push_str(" NOT NULL");
                }
                def
            })
            .collect();

        for unique in &table.unique {
            parts.push(format!("UNIQUE ({})", self.column_list(unique)));
        }

        format!("CREATE TABLE IF NOT EXISTS {} ({})", table.name, parts.join(", "))
    }

    pub fn create_index_if_absent(&self, index: &IndexDef) -> IndexStatement {
        let columns = self.column_list(&index.columns);
        match self {
            Dialect::Sqlite | Dialect::Postgres => IndexStatement {
                probe: None,
                create: format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                    index.name, index.table, columns
                ),
            },
            Dialect::Mysql => IndexStatement {
                probe: Some(format!(
                    "SELECT COUNT(*) FROM information_schema.statistics \
                     WHERE table_schema = DATABASE() AND table_name = '{}' AND index_name = '{}'",
                    index.table, index.name
                )),
                create: format!("CREATE INDEX {} ON {} ({})", index.name, index.table, columns),
            },
        }
    }

    /// Plain insert of the given columns
    pub fn insert(&self, table: &str, columns: &[&str]) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            self.column_list(columns),
            self.placeholders(1, columns.len())
        )
    }

    /// Insert, or overwrite every non-key column when the key already exists
    pub fn upsert(&self, table: &str, key_columns: &[&str], columns: &[&str]) -> String {
        let column_list = self.column_list(columns);
        let values = self.placeholders(1, columns.len());
        let updates: Vec<&str> = columns
            .iter()
            .copied()
            .filter(|c| !key_columns.contains(c))
            .collect();

        match self {
            Dialect::Sqlite => {
                format!("INSERT OR REPLACE INTO {} ({}) VALUES ({})", table, column_list, values)
            }
            Dialect::Postgres => {
                let conflict = if updates.is_empty() {
                    "DO NOTHING".to_string()
                } else {
                    let set = updates
                        .iter()
                        .map(|c| format!("{0} = EXCLUDED.{0}", self.ident(c)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("DO UPDATE SET {}", set)
                };
                format!(
                    "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
                    table,
                    column_list,
                    values,
                    self.column_list(key_columns),
                    conflict
                )
            }
            Dialect::Mysql => {
                if updates.is_empty() {
                    return format!("INSERT IGNORE INTO {} ({}) VALUES ({})", table, column_list, values);
                }
                let set = updates
                    .iter()
                    .map(|c| format!("{0} = VALUES({0})", self.ident(c)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
                    table, column_list, values, set
                )
            }
        }
    }

    /// Insert unless a unique constraint would be violated
    pub fn insert_or_ignore(&self, table: &str, columns: &[&str]) -> String {
        let column_list = self.column_list(columns);
        let values = self.placeholders(1, columns.len());
        match self {
            Dialect::Sqlite => {
                format!("INSERT OR IGNORE INTO {} ({}) VALUES ({})", table, column_list, values)
            }
            Dialect::Postgres => format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
                table, column_list, values
            ),
            Dialect::Mysql => {
                format!("INSERT IGNORE INTO {} ({}) VALUES ({})", table, column_list, values)
            }
        }
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "postgresql" | "postgres" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::Mysql),
            _ => Err(Error::UnsupportedDialect(s.to_string())),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
