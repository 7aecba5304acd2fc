//! Coins and puzzle hashes the wallet asked to be notified about

use rusqlite::{OptionalExtension, params};
use std::sync::Arc;

use super::schema;
use super::wrapper::DbWrapper;
use crate::bytes::Bytes32;
use crate::{Error, Result};

pub struct InterestedStore {
    db: Arc<DbWrapper>,
}

impl InterestedStore {
    pub fn create(db: Arc<DbWrapper>) -> Result<Self> {
        db.create_table(&schema::interested_coins_table())?;
        db.create_table(&schema::interested_puzzle_hashes_table())?;
        Ok(Self { db })
    }

    // ========== Coins ==========

    pub fn get_interested_coin_ids(&self) -> Result<Vec<Bytes32>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!("SELECT coin_name FROM {} ORDER BY coin_name", schema::INTERESTED_COINS))?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<Bytes32>>>()?;
        Ok(ids)
    }

    pub fn add_interested_coin_id(&self, coin_id: &Bytes32, in_transaction: bool) -> Result<()> {
        let sql = self.db.dialect().upsert(schema::INTERESTED_COINS, &["coin_name"], &["coin_name"]);
        self.db.writer_maybe_transaction(in_transaction, |conn| {
            conn.execute(&sql, [coin_id])?;
            Ok(())
        })
    }

    // ========== Puzzle Hashes ==========

    /// Watched puzzle hashes with the wallet that asked for them
    pub fn get_interested_puzzle_hashes(&self) -> Result<Vec<(Bytes32, u32)>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT puzzle_hash, wallet_id FROM {} ORDER BY puzzle_hash",
            schema::INTERESTED_PUZZLE_HASHES
        ))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, Bytes32>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(|(ph, id)| Ok((ph, to_u32(id)?))).collect()
    }

    pub fn get_interested_puzzle_hash_wallet_id(&self, puzzle_hash: &Bytes32) -> Result<Option<u32>> {
        let sql = format!(
            "SELECT wallet_id FROM {} WHERE puzzle_hash = {}",
            schema::INTERESTED_PUZZLE_HASHES,
            self.db.dialect().placeholder(1)
        );
        let conn = self.db.lock();
        let id: Option<i64> = conn.query_row(&sql, [puzzle_hash], |row| row.get(0)).optional()?;
        id.map(to_u32).transpose()
    }

    pub fn add_interested_puzzle_hash(&self, puzzle_hash: &Bytes32, wallet_id: u32, in_transaction: bool) -> Result<()> {
        let sql = self.db.dialect().upsert(
            schema::INTERESTED_PUZZLE_HASHES,
            &["puzzle_hash"],
            &["puzzle_hash", "wallet_id"],
        );
        self.db.writer_maybe_transaction(in_transaction, |conn| {
            conn.execute(&sql, params![puzzle_hash, wallet_id])?;
            Ok(())
        })
    }

    pub fn remove_interested_puzzle_hash(&self, puzzle_hash: &Bytes32, in_transaction: bool) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE puzzle_hash = {}",
            schema::INTERESTED_PUZZLE_HASHES,
            self.db.dialect().placeholder(1)
        );
        self.db.writer_maybe_transaction(in_transaction, |conn| {
            conn.execute(&sql, [puzzle_hash])?;
            Ok(())
        })
    }
}

fn to_u32(id: i64) -> Result<u32> {
    u32::try_from(id).map_err(|_| Error::ConsistencyViolation(format!("wallet id {} out of range", id)))
}
