//! Derivation path store
//!
//! Which puzzle hashes the wallet derived, at which index, for which wallet.
//! The set of all known puzzle hashes is kept in memory for fast "is this
//! ours" checks.

use parking_lot::RwLock;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::schema;
use super::wrapper::{CacheEpoch, DbWrapper};
use crate::bytes::Bytes32;
use crate::wallet::{DerivationRecord, WalletType};
use crate::{Error, Result};

const COLUMNS: [&str; 6] = ["derivation_index", "pubkey", "puzzle_hash", "wallet_type", "wallet_id", "used"];
const SELECT: &str = "SELECT derivation_index, pubkey, puzzle_hash, wallet_type, wallet_id FROM derivation_paths";

pub struct PuzzleStore {
    db: Arc<DbWrapper>,
    all_puzzle_hashes: RwLock<HashSet<Bytes32>>,
    epoch: CacheEpoch,
    upsert: String,
}

impl PuzzleStore {
    pub fn create(db: Arc<DbWrapper>) -> Result<Self> {
        db.create_table(&schema::derivation_paths_table())?;
        let store = Self {
            upsert: db.dialect().upsert(schema::DERIVATION_PATHS, &["puzzle_hash"], &COLUMNS),
            epoch: CacheEpoch::new(db.aborted_writes()),
            all_puzzle_hashes: RwLock::new(HashSet::new()),
            db,
        };
        store.rebuild_cache()?;
        Ok(store)
    }

    // ========== Write Operations ==========

    /// Insert or overwrite derivation records. They are stored as unused.
    pub fn add_derivation_paths(&self, records: &[DerivationRecord], in_transaction: bool) -> Result<()> {
        self.ensure_coherent()?;
        let _gate = self.db.lock();
        let mut cache = self.all_puzzle_hashes.write();
        self.db.writer_maybe_transaction(in_transaction, |conn| {
            let mut stmt = conn.prepare_cached(&self.upsert)?;
            for record in records {
                stmt.execute(params![
                    record.index,
                    record.pubkey,
                    record.puzzle_hash,
                    record.wallet_type.code(),
                    record.wallet_id,
                    false,
                ])?;
            }
            Ok(())
        })?;
        cache.extend(records.iter().map(|r| r.puzzle_hash));
        Ok(())
    }

    /// Mark every path up to and including `index` as used
    pub fn set_used_up_to(&self, index: u32, in_transaction: bool) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET used = 1 WHERE derivation_index <= {}",
            schema::DERIVATION_PATHS,
            self.db.dialect().placeholder(1)
        );
        self.db.writer_maybe_transaction(in_transaction, |conn| {
            conn.execute(&sql, [index])?;
            Ok(())
        })
    }

    // ========== Lookups ==========

    pub fn get_derivation_record(&self, index: u32, wallet_id: u32) -> Result<Option<DerivationRecord>> {
        let d = self.db.dialect();
        let sql = format!(
            "{} WHERE derivation_index = {} AND wallet_id = {}",
            SELECT,
            d.placeholder(1),
            d.placeholder(2)
        );
        let conn = self.db.lock();
        query_one(&conn, &sql, params![index, wallet_id])
    }

    pub fn get_derivation_record_for_puzzle_hash(&self, puzzle_hash: &Bytes32) -> Result<Option<DerivationRecord>> {
        let sql = format!("{} WHERE puzzle_hash = {}", SELECT, self.db.dialect().placeholder(1));
        let conn = self.db.lock();
        query_one(&conn, &sql, [puzzle_hash])
    }

    pub fn puzzle_hash_exists(&self, puzzle_hash: &Bytes32) -> Result<bool> {
        self.read_cache(|hashes| hashes.contains(puzzle_hash))
    }

    /// Whether any of the puzzle hashes belongs to the wallet. Answered from
    /// memory only.
    pub fn one_of_puzzle_hashes_exists(&self, puzzle_hashes: &[Bytes32]) -> Result<bool> {
        self.read_cache(|hashes| puzzle_hashes.iter().any(|ph| hashes.contains(ph)))
    }

    pub fn index_for_pubkey(&self, pubkey: &[u8]) -> Result<Option<u32>> {
        let sql = format!(
            "SELECT derivation_index FROM {} WHERE pubkey = {}",
            schema::DERIVATION_PATHS,
            self.db.dialect().placeholder(1)
        );
        self.query_index(&sql, params![pubkey])
    }

    pub fn index_for_puzzle_hash(&self, puzzle_hash: &Bytes32) -> Result<Option<u32>> {
        let sql = format!(
            "SELECT derivation_index FROM {} WHERE puzzle_hash = {}",
            schema::DERIVATION_PATHS,
            self.db.dialect().placeholder(1)
        );
        self.query_index(&sql, [puzzle_hash])
    }

    pub fn index_for_puzzle_hash_and_wallet(&self, puzzle_hash: &Bytes32, wallet_id: u32) -> Result<Option<u32>> {
        let d = self.db.dialect();
        let sql = format!(
            "SELECT derivation_index FROM {} WHERE puzzle_hash = {} AND wallet_id = {}",
            schema::DERIVATION_PATHS,
            d.placeholder(1),
            d.placeholder(2)
        );
        self.query_index(&sql, params![puzzle_hash, wallet_id])
    }

    /// Owning wallet of a puzzle hash
    pub fn wallet_info_for_puzzle_hash(&self, puzzle_hash: &Bytes32) -> Result<Option<(u32, WalletType)>> {
        Ok(self
            .get_derivation_record_for_puzzle_hash(puzzle_hash)?
            .map(|r| (r.wallet_id, r.wallet_type)))
    }

    pub fn get_all_puzzle_hashes(&self) -> Result<HashSet<Bytes32>> {
        self.read_cache(HashSet::clone)
    }

    /// Highest derivation index stored for any wallet
    pub fn get_last_derivation_path(&self) -> Result<Option<u32>> {
        let sql = format!("SELECT MAX(derivation_index) FROM {}", schema::DERIVATION_PATHS);
        self.query_index(&sql, [])
    }

    pub fn get_last_derivation_path_for_wallet(&self, wallet_id: u32) -> Result<Option<u32>> {
        let sql = format!(
            "SELECT MAX(derivation_index) FROM {} WHERE wallet_id = {}",
            schema::DERIVATION_PATHS,
            self.db.dialect().placeholder(1)
        );
        self.query_index(&sql, [wallet_id])
    }

    /// Highest used derivation record of a wallet
    pub fn get_current_derivation_record_for_wallet(&self, wallet_id: u32) -> Result<Option<DerivationRecord>> {
        let sql = format!(
            "SELECT MAX(derivation_index) FROM {} WHERE wallet_id = {} AND used = 1",
            schema::DERIVATION_PATHS,
            self.db.dialect().placeholder(1)
        );
        match self.query_index(&sql, [wallet_id])? {
            Some(index) => self.get_derivation_record(index, wallet_id),
            None => Ok(None),
        }
    }

    /// Lowest index not yet marked used
    pub fn get_unused_derivation_path(&self) -> Result<Option<u32>> {
        let sql = format!("SELECT MIN(derivation_index) FROM {} WHERE used = 0", schema::DERIVATION_PATHS);
        self.query_index(&sql, [])
    }

    pub fn rebuild_cache(&self) -> Result<()> {
        let conn = self.db.lock();
        let epoch = self.db.aborted_writes();
        let mut stmt = conn.prepare(&format!("SELECT puzzle_hash FROM {}", schema::DERIVATION_PATHS))?;
        let hashes = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<Bytes32>>>()?;
        debug!(puzzle_hashes = hashes.len(), "Loaded puzzle hashes");
        *self.all_puzzle_hashes.write() = hashes;
        self.epoch.mark(epoch);
        Ok(())
    }

    fn ensure_coherent(&self) -> Result<()> {
        if self.epoch.is_stale(self.db.aborted_writes()) {
            warn!("Write transaction was rolled back, reloading puzzle hashes");
            self.rebuild_cache()?;
        }
        Ok(())
    }

    /// Committed puzzle hashes only, unless this thread owns the open
    /// transaction
    fn read_cache<T>(&self, f: impl FnOnce(&HashSet<Bytes32>) -> T) -> Result<T> {
        self.ensure_coherent()?;
        {
            let hashes = self.all_puzzle_hashes.read();
            if self.db.cache_is_settled(&self.epoch) {
                return Ok(f(&hashes));
            }
        }

        let _gate = self.db.lock();
        self.ensure_coherent()?;
        let hashes = self.all_puzzle_hashes.read();
        Ok(f(&hashes))
    }

    fn query_index<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Option<u32>> {
        let conn = self.db.lock();
        let index: Option<i64> = conn.query_row(sql, params, |row| row.get(0)).optional()?.flatten();
        index
            .map(|i| {
                u32::try_from(i)
                    .map_err(|_| Error::ConsistencyViolation(format!("derivation index {} out of range", i)))
            })
            .transpose()
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<(i64, Vec<u8>, Bytes32, i64, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn query_one<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Option<DerivationRecord>> {
    let Some((index, pubkey, puzzle_hash, wallet_type, wallet_id)) =
        conn.query_row(sql, params, row_to_record).optional()?
    else {
        return Ok(None);
    };
    let out_of_range = |what: &str, v: i64| Error::ConsistencyViolation(format!("{} {} out of range", what, v));
    Ok(Some(DerivationRecord {
        index: u32::try_from(index).map_err(|_| out_of_range("derivation index", index))?,
        pubkey,
        puzzle_hash,
        wallet_type: WalletType::try_from(wallet_type)?,
        wallet_id: u32::try_from(wallet_id).map_err(|_| out_of_range("wallet id", wallet_id))?,
    }))
}
