//! Database layout version
//!
//! Version 2 databases carry a `database_version` row; anything else is
//! treated as version 1. Only the hints table differs between the two.

use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use super::schema;
use crate::Result;
use crate::dialect::Dialect;

pub const CURRENT_DB_VERSION: u32 = 2;

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Layout version of an existing database
pub fn lookup_db_version(conn: &Connection) -> Result<u32> {
    if !table_exists(conn, schema::DATABASE_VERSION)? {
        return Ok(1);
    }
    let version: Option<i64> = conn
        .query_row("SELECT version FROM database_version LIMIT 1", [], |row| row.get(0))
        .optional()?;
    Ok(if version == Some(2) { 2 } else { 1 })
}

/// Record the layout version, replacing any previous stamp
pub fn set_db_version(conn: &Connection, dialect: Dialect, version: u32) -> Result<()> {
    conn.execute(&dialect.create_table(&schema::database_version_table()), [])?;
    conn.execute("DELETE FROM database_version", [])?;
    conn.execute(
        &format!("INSERT INTO database_version (version) VALUES ({})", dialect.placeholder(1)),
        [version],
    )?;
    Ok(())
}

/// Stamp a database that holds no tables yet with the current version and
/// return the version in effect.
pub fn init_db_version(conn: &Connection, dialect: Dialect) -> Result<u32> {
    let tables: i64 =
        conn.query_row("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'", [], |row| row.get(0))?;
    if tables == 0 {
        set_db_version(conn, dialect, CURRENT_DB_VERSION)?;
        debug!(version = CURRENT_DB_VERSION, "Stamped new database");
        return Ok(CURRENT_DB_VERSION);
    }
    lookup_db_version(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_database_is_stamped() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(init_db_version(&conn, Dialect::Sqlite).unwrap(), 2);
        assert_eq!(lookup_db_version(&conn).unwrap(), 2);
    }

    #[test]
    fn test_legacy_database_is_version_one() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE coin_record (coin_name BLOB PRIMARY KEY)", []).unwrap();
        assert_eq!(init_db_version(&conn, Dialect::Sqlite).unwrap(), 1);
        assert!(!table_exists(&conn, "database_version").unwrap());
    }

    #[test]
    fn test_unknown_stamp_reads_as_one() {
        let conn = Connection::open_in_memory().unwrap();
        set_db_version(&conn, Dialect::Sqlite, 7).unwrap();
        assert_eq!(lookup_db_version(&conn).unwrap(), 1);
    }
}
