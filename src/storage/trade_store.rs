//! Trade store
//!
//! Each trade is kept as a JSON blob, with the fields it is filtered on
//! copied into their own columns.

use rusqlite::{Connection, OptionalExtension, params};
use std::sync::Arc;
use tracing::info;

use super::schema;
use super::wrapper::DbWrapper;
use crate::bytes::Bytes32;
use crate::rollback::{Rollback, RollbackSummary};
use crate::trade::{TradeRecord, TradeStatus};
use crate::Result;

/// Peers a trade is pushed to before it counts as sent
pub const MAX_SEND_ATTEMPTS: u32 = 4;

const COLUMNS: [&str; 6] = ["trade_record", "trade_id", "status", "confirmed_at_index", "created_at_time", "sent"];

pub struct TradeStore {
    db: Arc<DbWrapper>,
    upsert: String,
}

impl TradeStore {
    pub fn create(db: Arc<DbWrapper>) -> Result<Self> {
        db.create_table(&schema::trade_records_table())?;
        let upsert = db.dialect().upsert(schema::TRADE_RECORDS, &["trade_id"], &COLUMNS);
        Ok(Self { db, upsert })
    }

    // ========== Write Operations ==========

    /// Insert or overwrite a trade
    pub fn add_trade_record(&self, record: &TradeRecord, in_transaction: bool) -> Result<()> {
        let blob = serde_json::to_vec(record)?;
        self.db.writer_maybe_transaction(in_transaction, |conn| {
            conn.prepare_cached(&self.upsert)?.execute(params![
                blob,
                record.trade_id,
                record.status.code(),
                record.confirmed_at_index,
                record.created_at_time as i64,
                record.sent,
            ])?;
            Ok(())
        })
    }

    /// Change a trade's status. A non-zero `index` also records the
    /// confirmation height. Unknown trades are ignored.
    pub fn set_status(&self, trade_id: &Bytes32, status: TradeStatus, index: u32, in_transaction: bool) -> Result<()> {
        let _gate = self.db.lock();
        let Some(mut record) = self.get_trade_record(trade_id)? else {
            return Ok(());
        };
        record.status = status;
        if index != 0 {
            record.confirmed_at_index = index;
        }
        self.add_trade_record(&record, in_transaction)
    }

    /// Count a delivery to `peer`. Returns false if the trade is unknown or
    /// this exact outcome was already recorded.
    pub fn increment_sent(&self, trade_id: &Bytes32, peer: &str, send_status: u8, err: Option<&str>) -> Result<bool> {
        let _gate = self.db.lock();
        let Some(mut record) = self.get_trade_record(trade_id)? else {
            return Ok(false);
        };
        let entry = (peer.to_string(), send_status, err.map(str::to_string));
        if record.sent_to.contains(&entry) {
            return Ok(false);
        }
        record.sent_to.push(entry);
        record.sent += 1;
        self.add_trade_record(&record, false)?;
        Ok(true)
    }

    /// Reset delivery bookkeeping so the trade is pushed again
    pub fn set_not_sent(&self, trade_id: &Bytes32) -> Result<()> {
        let _gate = self.db.lock();
        let Some(mut record) = self.get_trade_record(trade_id)? else {
            return Ok(());
        };
        record.sent = 0;
        record.sent_to.clear();
        record.status = TradeStatus::PendingConfirm;
        self.add_trade_record(&record, false)
    }

    // ========== Lookups ==========

    pub fn get_trade_record(&self, trade_id: &Bytes32) -> Result<Option<TradeRecord>> {
        let sql = format!(
            "SELECT trade_record FROM {} WHERE trade_id = {}",
            schema::TRADE_RECORDS,
            self.db.dialect().placeholder(1)
        );
        let conn = self.db.lock();
        let blob: Option<Vec<u8>> = conn.query_row(&sql, [trade_id], |row| row.get(0)).optional()?;
        blob.map(|b| serde_json::from_slice(&b).map_err(Into::into)).transpose()
    }

    pub fn get_trade_records_with_status(&self, status: TradeStatus) -> Result<Vec<TradeRecord>> {
        let where_clause = format!("status = {}", self.db.dialect().placeholder(1));
        self.query(&where_clause, [status.code()])
    }

    /// Unconfirmed trades that have not reached enough peers yet
    pub fn get_not_sent(&self) -> Result<Vec<TradeRecord>> {
        let where_clause = format!("sent < {} AND confirmed_at_index = 0", self.db.dialect().placeholder(1));
        self.query(&where_clause, [MAX_SEND_ATTEMPTS])
    }

    pub fn get_all_unconfirmed(&self) -> Result<Vec<TradeRecord>> {
        self.query("confirmed_at_index = 0", [])
    }

    pub fn get_all_trades(&self) -> Result<Vec<TradeRecord>> {
        self.query("1 = 1", [])
    }

    /// Trades confirmed strictly above `height`
    pub fn get_trades_above(&self, height: u32) -> Result<Vec<TradeRecord>> {
        let where_clause = format!("confirmed_at_index > {}", self.db.dialect().placeholder(1));
        self.query(&where_clause, [height])
    }

    pub fn count_trades(&self) -> Result<usize> {
        let conn = self.db.lock();
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", schema::TRADE_RECORDS), [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn query<P: rusqlite::Params>(&self, where_clause: &str, params: P) -> Result<Vec<TradeRecord>> {
        let conn = self.db.lock();
        decode_all(&conn, &format!(
            "SELECT trade_record FROM {} WHERE {} ORDER BY created_at_time, trade_id",
            schema::TRADE_RECORDS,
            where_clause
        ), params)
    }
}

fn decode_all<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<TradeRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let blobs = stmt
        .query_map(params, |row| row.get::<_, Vec<u8>>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    blobs
        .iter()
        .map(|b| serde_json::from_slice(b).map_err(Into::into))
        .collect()
}

impl Rollback for TradeStore {
    fn name(&self) -> &'static str {
        schema::TRADE_RECORDS
    }

    /// Delete trades confirmed above `height`
    fn rollback_to_height(&self, height: u32, in_transaction: bool) -> Result<RollbackSummary> {
        let sql = format!(
            "DELETE FROM {} WHERE confirmed_at_index > {}",
            schema::TRADE_RECORDS,
            self.db.dialect().placeholder(1)
        );
        let removed = self.db.writer_maybe_transaction(in_transaction, |conn| {
            Ok(conn.execute(&sql, [height])?)
        })?;
        info!(height, removed, "Rolled back trades");
        Ok(RollbackSummary { removed, unspent: 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TradeStore {
        TradeStore::create(Arc::new(DbWrapper::open_in_memory().unwrap())).unwrap()
    }

    fn trade(n: u8, confirmed_at_index: u32) -> TradeRecord {
        let mut record = TradeRecord::new(Bytes32::new([n; 32]), 1_000 + n as u64, true, vec![n]);
        record.confirmed_at_index = confirmed_at_index;
        if confirmed_at_index > 0 {
            record.status = TradeStatus::Confirmed;
        }
        record
    }

    #[test]
    fn test_add_and_get() {
        let store = store();
        let t = trade(1, 0);
        store.add_trade_record(&t, false).unwrap();
        assert_eq!(store.get_trade_record(&t.trade_id).unwrap(), Some(t.clone()));
        assert!(store.get_trade_record(&Bytes32::new([9; 32])).unwrap().is_none());
        assert_eq!(store.get_all_trades().unwrap(), vec![t]);
    }

    #[test]
    fn test_status_and_height() {
        let store = store();
        let t = trade(1, 0);
        store.add_trade_record(&t, false).unwrap();

        store.set_status(&t.trade_id, TradeStatus::PendingConfirm, 0, false).unwrap();
        assert_eq!(store.get_trade_records_with_status(TradeStatus::PendingConfirm).unwrap().len(), 1);
        assert_eq!(store.get_all_unconfirmed().unwrap().len(), 1);

        store.set_status(&t.trade_id, TradeStatus::Confirmed, 42, false).unwrap();
        let stored = store.get_trade_record(&t.trade_id).unwrap().unwrap();
        assert_eq!(stored.confirmed_at_index, 42);
        assert!(store.get_all_unconfirmed().unwrap().is_empty());
        assert_eq!(store.get_trades_above(41).unwrap().len(), 1);
        assert!(store.get_trades_above(42).unwrap().is_empty());

        // Unknown ids are ignored
        store.set_status(&Bytes32::new([7; 32]), TradeStatus::Failed, 0, false).unwrap();
    }

    #[test]
    fn test_sent_bookkeeping() {
        let store = store();
        let t = trade(1, 0);
        store.add_trade_record(&t, false).unwrap();

        assert!(store.increment_sent(&t.trade_id, "peer-a", 1, None).unwrap());
        assert!(!store.increment_sent(&t.trade_id, "peer-a", 1, None).unwrap());
        assert!(store.increment_sent(&t.trade_id, "peer-b", 3, Some("MEMPOOL_CONFLICT")).unwrap());
        assert!(!store.increment_sent(&Bytes32::new([5; 32]), "peer-a", 1, None).unwrap());
        assert_eq!(store.get_trade_record(&t.trade_id).unwrap().unwrap().sent, 2);

        for peer in ["c", "d"] {
            store.increment_sent(&t.trade_id, peer, 1, None).unwrap();
        }
        assert!(store.get_not_sent().unwrap().is_empty());

        store.set_not_sent(&t.trade_id).unwrap();
        let reset = store.get_trade_record(&t.trade_id).unwrap().unwrap();
        assert_eq!(reset.sent, 0);
        assert!(reset.sent_to.is_empty());
        assert_eq!(store.get_not_sent().unwrap().len(), 1);
    }

    #[test]
    fn test_rollback_deletes_trades_above() {
        let store = store();
        for (n, h) in [(1, 0), (2, 10), (3, 20)] {
            store.add_trade_record(&trade(n, h), false).unwrap();
        }
        let summary = store.rollback_to_height(10, false).unwrap();
        assert_eq!(summary.removed, 1);
        assert_eq!(store.count_trades().unwrap(), 2);
        assert!(store.rollback_to_height(10, false).unwrap().is_empty());
    }
}
