//! Connection and transaction provider
//!
//! One `rusqlite::Connection` per logical database, behind a
//! `parking_lot::ReentrantMutex`. Holding the guard is holding the writer
//! gate: no other thread can touch the connection until it is released.
//! The mutex is reentrant so a thread that opened a broader transaction can
//! keep calling store operations.
//!
//! Transactions are savepoints, so they nest. Rolling back a tracked
//! transaction (one opened with [`DbWrapper::writer`]) bumps the abort
//! counter before the rollback runs; cached stores compare it on entry and
//! rebuild from storage when it moved.
//!
//! Store caches are updated as soon as a write lands, even inside a caller's
//! transaction. While any transaction is open a cache may hold uncommitted
//! state, so cache readers check [`DbWrapper::cache_is_settled`] and
//! otherwise wait on the writer gate before reading.

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use rusqlite::Connection;
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::version;
use crate::dialect::{Dialect, TableDef};
use crate::{Error, Result};

/// Guard over the shared connection
pub type ConnGuard<'a> = ReentrantMutexGuard<'a, Connection>;

pub struct DbWrapper {
    conn: ReentrantMutex<Connection>,
    dialect: Dialect,
    db_version: u32,
    savepoint_seq: AtomicU64,
    open_transactions: AtomicUsize,
    aborted_writes: AtomicU64,
}

impl DbWrapper {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        debug!(path = %path.display(), journal_mode = %mode, "Opened database");
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an open connection. Empty databases are stamped with the
    /// current layout version.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        let dialect = Dialect::Sqlite;
        let db_version = version::init_db_version(&conn, dialect)?;
        Ok(Self {
            conn: ReentrantMutex::new(conn),
            dialect,
            db_version,
            savepoint_seq: AtomicU64::new(0),
            open_transactions: AtomicUsize::new(0),
            aborted_writes: AtomicU64::new(0),
        })
    }

    /// Connect by connection string, e.g. `sqlite:///wallet.sqlite` or
    /// `sqlite:////abs/path/wallet.sqlite`. Only the SQLite driver is linked.
    pub fn connect(target: &str) -> Result<Self> {
        let dialect = Dialect::from_url(target)?;
        if dialect != Dialect::Sqlite {
            return Err(Error::DriverUnavailable(dialect));
        }
        let path = target
            .split_once("://")
            .map(|(_, rest)| rest.strip_prefix('/').unwrap_or(rest))
            .unwrap_or_default();
        if path.is_empty() || path == ":memory:" {
            return Self::open_in_memory();
        }
        Self::open(Path::new(path))
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn db_version(&self) -> u32 {
        self.db_version
    }

    /// Take the writer gate
    pub fn lock(&self) -> ConnGuard<'_> {
        self.conn.lock()
    }

    /// Number of tracked transactions rolled back so far
    pub fn aborted_writes(&self) -> u64 {
        self.aborted_writes.load(Ordering::SeqCst)
    }

    /// Savepoints currently open on the connection
    pub fn open_transactions(&self) -> usize {
        self.open_transactions.load(Ordering::SeqCst)
    }

    /// Whether a cache built against `epoch` holds only committed state.
    /// Check it while holding the cache's read lock; when it is false, take
    /// the writer gate before reading.
    pub fn cache_is_settled(&self, epoch: &CacheEpoch) -> bool {
        self.open_transactions() == 0 && !epoch.is_stale(self.aborted_writes())
    }

    /// Open a caller-owned write transaction. Store operations called with
    /// `in_transaction = true` on this thread join it. Dropping it without
    /// `commit` rolls it back and invalidates store caches.
    ///
    /// Cache reads on other threads wait until it commits or rolls back. The
    /// owning thread sees its own writes.
    pub fn writer(&self) -> Result<WriteTransaction<'_>> {
        self.begin(true)
    }

    /// Run `f` inside its own savepoint
    pub fn transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let tx = self.begin(false)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run `f` in the caller's open transaction when `in_transaction` is set,
    /// otherwise in a scoped one.
    pub fn writer_maybe_transaction<T>(
        &self,
        in_transaction: bool,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        if in_transaction {
            let conn = self.lock();
            if !conn.is_autocommit() {
                return f(&conn);
            }
            warn!("in_transaction set but no transaction is open, using a scoped one");
        }
        self.transaction(f)
    }

    /// Create a table and its indexes if they do not exist
    pub fn create_table(&self, table: &TableDef) -> Result<()> {
        let conn = self.lock();
        conn.execute(&self.dialect.create_table(table), [])?;
        for index in &table.indexes {
            let stmt = self.dialect.create_index_if_absent(index);
            if let Some(probe) = &stmt.probe {
                let existing: i64 = conn.query_row(probe, [], |row| row.get(0))?;
                if existing > 0 {
                    continue;
                }
            }
            conn.execute(&stmt.create, [])?;
        }
        debug!(table = table.name, indexes = table.indexes.len(), "Ensured table");
        Ok(())
    }

    fn begin(&self, tracked: bool) -> Result<WriteTransaction<'_>> {
        let guard = self.lock();
        let name = format!("sp_{}", self.savepoint_seq.fetch_add(1, Ordering::Relaxed));
        guard.execute_batch(&format!("SAVEPOINT {}", name))?;
        self.open_transactions.fetch_add(1, Ordering::SeqCst);
        Ok(WriteTransaction { db: self, guard, name, tracked, finished: false })
    }
}

/// An open savepoint holding the writer gate. Rolled back on drop unless
/// committed.
pub struct WriteTransaction<'a> {
    db: &'a DbWrapper,
    guard: ConnGuard<'a>,
    name: String,
    tracked: bool,
    finished: bool,
}

impl WriteTransaction<'_> {
    pub fn commit(mut self) -> Result<()> {
        self.guard.execute_batch(&format!("RELEASE SAVEPOINT {}", self.name))?;
        self.finished = true;
        self.db.open_transactions.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.abort()
    }

    /// The epoch moves before the savepoint count drops, so a reader never
    /// sees a settled cache that still holds the aborted writes.
    fn abort(&self) -> Result<()> {
        if self.tracked {
            self.db.aborted_writes.fetch_add(1, Ordering::SeqCst);
        }
        let result = self.guard.execute_batch(&format!(
            "ROLLBACK TO SAVEPOINT {0}; RELEASE SAVEPOINT {0}",
            self.name
        ));
        self.db.open_transactions.fetch_sub(1, Ordering::SeqCst);
        result?;
        Ok(())
    }
}

impl Deref for WriteTransaction<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.guard
    }
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if self.tracked {
            warn!(savepoint = %self.name, "Write transaction dropped without commit, rolling back");
        }
        if let Err(e) = self.abort() {
            warn!(savepoint = %self.name, error = %e, "Rollback failed");
        }
    }
}

/// Last abort count a cache was built against
#[derive(Debug, Default)]
pub struct CacheEpoch {
    seen: AtomicU64,
}

impl CacheEpoch {
    pub fn new(current: u64) -> Self {
        Self { seen: AtomicU64::new(current) }
    }

    pub fn is_stale(&self, current: u64) -> bool {
        self.seen.load(Ordering::SeqCst) != current
    }

    pub fn mark(&self, current: u64) {
        self.seen.store(current, Ordering::SeqCst);
    }
}
