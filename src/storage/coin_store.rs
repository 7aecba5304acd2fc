//! Coin record store
//!
//! The `coin_record` table is the source of truth. A [`RecordCache`] mirrors
//! all of it in memory and keeps the unspent coins of each wallet indexed.
//!
//! Lock order is always writer gate, then cache lock. Mutators hold both for
//! the whole operation and touch the cache only after the durable write
//! succeeded. Cache hits take the read lock alone while no transaction is
//! open; otherwise they queue on the writer gate, so other threads never see
//! uncommitted coins.

use parking_lot::{RwLock, RwLockWriteGuard};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::schema;
use super::wrapper::{CacheEpoch, DbWrapper};
use crate::bytes::Bytes32;
use crate::cache::RecordCache;
use crate::coin::{CoinRecord, CoinRow};
use crate::rollback::{Rollback, RollbackSummary};
use crate::{Error, Result};

/// Statement text rendered once for the database dialect
struct CoinQueries {
    select_all: String,
    select_by_name: String,
    select_by_puzzle_hash: String,
    select_by_parent: String,
    upsert: String,
    delete: String,
    delete_confirmed_above: String,
    unspend_above: String,
}

impl CoinQueries {
    fn new(db: &DbWrapper) -> Self {
        let d = db.dialect();
        let columns = CoinRow::COLUMNS.join(", ");
        let select_all = format!("SELECT {} FROM {}", columns, schema::COIN_RECORD);
        let p1 = d.placeholder(1);
        Self {
            select_by_name: format!("{} WHERE coin_name = {}", select_all, p1),
            select_by_puzzle_hash: format!("{} WHERE puzzle_hash = {}", select_all, p1),
            select_by_parent: format!("{} WHERE coin_parent = {}", select_all, p1),
            upsert: d.upsert(schema::COIN_RECORD, &["coin_name"], &CoinRow::COLUMNS),
            delete: format!("DELETE FROM {} WHERE coin_name = {}", schema::COIN_RECORD, p1),
            delete_confirmed_above: format!(
                "DELETE FROM {} WHERE confirmed_height > {}",
                schema::COIN_RECORD,
                p1
            ),
            unspend_above: format!(
                "UPDATE {} SET spent_height = 0, spent = 0 WHERE spent_height > {}",
                schema::COIN_RECORD,
                p1
            ),
            select_all,
        }
    }
}

/// Coins the wallet has seen, with an always-complete in-memory mirror
pub struct CoinStore {
    db: Arc<DbWrapper>,
    cache: RwLock<RecordCache<CoinRecord>>,
    epoch: CacheEpoch,
    queries: CoinQueries,
}

impl CoinStore {
    /// Ensure the table exists and load the cache from it
    pub fn create(db: Arc<DbWrapper>) -> Result<Self> {
        db.create_table(&schema::coin_record_table())?;
        let store = Self {
            queries: CoinQueries::new(&db),
            epoch: CacheEpoch::new(db.aborted_writes()),
            cache: RwLock::new(RecordCache::new()),
            db,
        };
        store.rebuild_cache()?;
        Ok(store)
    }

    // ========== Read Operations ==========

    /// Get a coin record by coin id
    pub fn get_coin_record(&self, name: &Bytes32) -> Result<Option<CoinRecord>> {
        if let Some(record) = self.read_cache(|cache| cache.get(name).cloned())? {
            return Ok(Some(record));
        }

        let conn = self.db.lock();
        let mut cache = self.cache.write();
        self.load(&conn, &mut cache, name)
    }

    /// Records for the given ids. Unknown ids are left out. Order follows
    /// the input, duplicates collapsed.
    pub fn get_coin_records(&self, names: &[Bytes32]) -> Result<Vec<CoinRecord>> {
        let mut seen = HashSet::new();
        let wanted: Vec<Bytes32> = names.iter().copied().filter(|n| seen.insert(*n)).collect();

        let hit = self.read_cache(|cache| {
            cache
                .contains_all(&wanted)
                .then(|| wanted.iter().filter_map(|n| cache.get(n)).cloned().collect::<Vec<_>>())
        })?;
        if let Some(records) = hit {
            return Ok(records);
        }

        let conn = self.db.lock();
        let mut found: HashMap<Bytes32, CoinRecord> = HashMap::with_capacity(wanted.len());
        let dialect = self.db.dialect();
        for chunk in wanted.chunks(dialect.max_bind_parameters()) {
            let sql = format!(
                "{} WHERE coin_name IN ({})",
                self.queries.select_all,
                dialect.placeholders(1, chunk.len())
            );
            for record in query_records(&conn, &sql, params_from_iter(chunk.iter()))? {
                found.insert(record.name(), record);
            }
        }

        let mut cache = self.cache.write();
        for record in found.values() {
            if cache.get(&record.name()) != Some(record) {
                debug!(coin = %record.name(), "Coin found in storage but not in cache");
                cache.insert(record.clone());
            }
        }
        Ok(wanted.iter().filter_map(|n| found.remove(n)).collect())
    }

    /// Unspent coins owned by a wallet, ordered by coin id
    pub fn get_unspent_coins_for_wallet(&self, wallet_id: u32) -> Result<Vec<CoinRecord>> {
        self.read_cache(|cache| cache.unspent_for_tag(wallet_id))
    }

    /// Every known coin, ordered by coin id
    pub fn get_all_coins(&self) -> Result<Vec<CoinRecord>> {
        let mut records: Vec<CoinRecord> = self.read_cache(|cache| cache.records().cloned().collect())?;
        records.sort_by_key(CoinRecord::name);
        Ok(records)
    }

    /// Coins that were unspent as of `height`. With no height, every coin
    /// currently unspent.
    pub fn get_unspent_coins_at_height(&self, height: Option<u32>) -> Result<Vec<CoinRecord>> {
        let mut records: Vec<CoinRecord> = self
            .get_all_coins()?
            .into_iter()
            .filter(|r| match height {
                None => !r.spent(),
                Some(h) => r.confirmed_height <= h && (!r.spent() || r.spent_height > h),
            })
            .collect();
        records.sort_by_key(CoinRecord::name);
        Ok(records)
    }

    /// Coins whose state could still change once the chain passes `height`
    pub fn get_coins_to_check(&self, height: u32) -> Result<Vec<CoinRecord>> {
        Ok(self
            .get_all_coins()?
            .into_iter()
            .filter(|r| !r.spent() || r.spent_height > height || r.confirmed_height > height)
            .collect())
    }

    pub fn get_coin_records_by_puzzle_hash(&self, puzzle_hash: &Bytes32) -> Result<Vec<CoinRecord>> {
        let conn = self.db.lock();
        query_records(&conn, &self.queries.select_by_puzzle_hash, [puzzle_hash])
    }

    pub fn get_coin_records_by_parent_id(&self, parent_id: &Bytes32) -> Result<Vec<CoinRecord>> {
        let conn = self.db.lock();
        query_records(&conn, &self.queries.select_by_parent, [parent_id])
    }

    /// Lowest confirmation height of any stored coin
    pub fn get_first_coin_height(&self) -> Result<Option<u32>> {
        let conn = self.db.lock();
        let height: Option<i64> = conn.query_row(
            &format!("SELECT MIN(confirmed_height) FROM {}", schema::COIN_RECORD),
            [],
            |row| row.get(0),
        )?;
        height
            .map(|h| {
                u32::try_from(h)
                    .map_err(|_| Error::ConsistencyViolation(format!("confirmed_height {} out of range", h)))
            })
            .transpose()
    }

    pub fn count_coins(&self) -> Result<usize> {
        self.read_cache(RecordCache::len)
    }

    pub fn count_unspent(&self) -> Result<usize> {
        self.read_cache(RecordCache::unspent_count)
    }

    // ========== Write Operations ==========

    /// Insert or overwrite a coin record
    pub fn add_coin_record(&self, record: &CoinRecord, in_transaction: bool) -> Result<()> {
        record.validate()?;
        self.ensure_coherent()?;
        let _gate = self.db.lock();
        let mut cache = self.cache.write();
        self.db.writer_maybe_transaction(in_transaction, |conn| {
            self.write_record(conn, record)
        })?;
        cache.insert(record.clone());
        Ok(())
    }

    /// Delete a coin record. Absent ids are a no-op.
    pub fn delete_coin_record(&self, name: &Bytes32, in_transaction: bool) -> Result<()> {
        self.ensure_coherent()?;
        let _gate = self.db.lock();
        let mut cache = self.cache.write();
        self.db.writer_maybe_transaction(in_transaction, |conn| {
            conn.execute(&self.queries.delete, [name])?;
            Ok(())
        })?;
        cache.remove(name);
        Ok(())
    }

    /// Mark a coin spent at `height`. Returns the updated record, or `None`
    /// if the coin is unknown.
    pub fn set_spent(
        &self,
        name: &Bytes32,
        height: u32,
        in_transaction: bool,
    ) -> Result<Option<CoinRecord>> {
        self.ensure_coherent()?;
        let conn = self.db.lock();
        let mut cache = self.cache.write();
        let Some(current) = self.load(&conn, &mut cache, name)? else {
            return Ok(None);
        };

        let updated = current.with_spent_height(height);
        updated.validate()?;
        self.db.writer_maybe_transaction(in_transaction, |conn| {
            self.write_record(conn, &updated)
        })?;
        cache.insert(updated.clone());
        Ok(Some(updated))
    }

    /// Remove every coin record
    pub fn clear(&self, in_transaction: bool) -> Result<()> {
        self.ensure_coherent()?;
        let _gate = self.db.lock();
        let mut cache = self.cache.write();
        self.db.writer_maybe_transaction(in_transaction, |conn| {
            conn.execute(&format!("DELETE FROM {}", schema::COIN_RECORD), [])?;
            Ok(())
        })?;
        cache.clear();
        Ok(())
    }

    // ========== Cache Maintenance ==========

    /// Reload the cache from storage. The new maps are built before the
    /// write lock is taken, then swapped in.
    pub fn rebuild_cache(&self) -> Result<()> {
        let conn = self.db.lock();
        let epoch = self.db.aborted_writes();
        let fresh = RecordCache::from_records(query_records(&conn, &self.queries.select_all, [])?);

        let mut cache = self.cache.write();
        if !cache.is_empty() {
            let divergent = cache.divergent_ids(&fresh).len();
            if divergent > 0 {
                debug!(divergent, "Cache differed from storage before rebuild");
            }
        }
        debug!(coins = fresh.len(), unspent = fresh.unspent_count(), "Rebuilt coin cache");
        *cache = fresh;
        self.epoch.mark(epoch);
        Ok(())
    }

    /// Compare the cache with storage. On divergence the cache is rebuilt
    /// and the divergence is reported.
    pub fn verify_cache(&self) -> Result<()> {
        let conn = self.db.lock();
        let epoch = self.db.aborted_writes();
        let fresh = RecordCache::from_records(query_records(&conn, &self.queries.select_all, [])?);

        let mut cache = self.cache.write();
        cache.check_invariants().map_err(Error::ConsistencyViolation)?;
        let divergent = cache.divergent_ids(&fresh);
        if divergent.is_empty() {
            return Ok(());
        }

        error!(
            divergent = divergent.len(),
            first = %divergent[0],
            "Coin cache diverged from storage, rebuilding"
        );
        *cache = fresh;
        self.epoch.mark(epoch);
        Err(Error::ConsistencyViolation(format!(
            "{} coin record(s) differed between cache and storage",
            divergent.len()
        )))
    }

    fn ensure_coherent(&self) -> Result<()> {
        if self.epoch.is_stale(self.db.aborted_writes()) {
            warn!("Write transaction was rolled back, reloading coin cache");
            self.rebuild_cache()?;
        }
        Ok(())
    }

    /// Run `f` against committed cache state. The thread that owns the open
    /// transaction passes the reentrant gate and reads its own writes.
    fn read_cache<T>(&self, f: impl FnOnce(&RecordCache<CoinRecord>) -> T) -> Result<T> {
        self.ensure_coherent()?;
        {
            let cache = self.cache.read();
            if self.db.cache_is_settled(&self.epoch) {
                return Ok(f(&cache));
            }
        }

        let _gate = self.db.lock();
        self.ensure_coherent()?;
        let cache = self.cache.read();
        Ok(f(&cache))
    }

    /// Cache first, then a point read that fills the cache
    fn load(
        &self,
        conn: &Connection,
        cache: &mut RwLockWriteGuard<'_, RecordCache<CoinRecord>>,
        name: &Bytes32,
    ) -> Result<Option<CoinRecord>> {
        if let Some(record) = cache.get(name) {
            return Ok(Some(record.clone()));
        }
        let row = conn
            .prepare_cached(&self.queries.select_by_name)?
            .query_row([name], CoinRow::from_row)
            .optional()?;
        let Some(row) = row else { return Ok(None) };
        let record = CoinRecord::try_from(row)?;
        cache.insert(record.clone());
        Ok(Some(record))
    }

    fn write_record(&self, conn: &Connection, record: &CoinRecord) -> Result<()> {
        conn.prepare_cached(&self.queries.upsert)?.execute(params![
            record.name(),
            record.confirmed_height,
            record.spent_height,
            record.spent(),
            record.coinbase,
            record.coin.puzzle_hash,
            record.coin.parent_coin_info,
            record.coin.amount.to_be_bytes().to_vec(),
            record.wallet_type.code(),
            record.wallet_id,
        ])?;
        Ok(())
    }
}

impl Rollback for CoinStore {
    fn name(&self) -> &'static str {
        schema::COIN_RECORD
    }

    /// Delete coins confirmed above `height` and unspend coins spent above it
    fn rollback_to_height(&self, height: u32, in_transaction: bool) -> Result<RollbackSummary> {
        self.ensure_coherent()?;
        let _gate = self.db.lock();
        let mut cache = self.cache.write();
        let stored = self.db.writer_maybe_transaction(in_transaction, |conn| {
            let removed = conn.execute(&self.queries.delete_confirmed_above, [height])?;
            let unspent = conn.execute(&self.queries.unspend_above, [height])?;
            Ok(RollbackSummary { removed, unspent })
        })?;

        let cached = cache.rollback_to_height(height);
        if cached != stored {
            warn!(?cached, ?stored, "Coin cache rollback disagreed with storage, reloading");
            let conn = self.db.lock();
            *cache = RecordCache::from_records(query_records(&conn, &self.queries.select_all, [])?);
        }
        info!(height, removed = stored.removed, unspent = stored.unspent, "Rolled back coin records");
        Ok(stored)
    }
}

fn query_records<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<CoinRecord>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt
        .query_map(params, CoinRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(CoinRecord::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coin::Coin;
    use crate::wallet::WalletType;
    use proptest::prelude::*;

    fn store() -> CoinStore {
        CoinStore::create(Arc::new(DbWrapper::open_in_memory().unwrap())).unwrap()
    }

    fn record(seed: u8, confirmed: u32, spent: u32, wallet_id: u32) -> CoinRecord {
        let coin = Coin::new(Bytes32::new([seed; 32]), Bytes32::new([wallet_id as u8; 32]), seed as u64 * 1000);
        CoinRecord::new(coin, confirmed, false, WalletType::Standard, wallet_id).with_spent_height(spent)
    }

    fn names(records: &[CoinRecord]) -> Vec<Bytes32> {
        records.iter().map(CoinRecord::name).collect()
    }

    fn sorted(mut ids: Vec<Bytes32>) -> Vec<Bytes32> {
        ids.sort();
        ids
    }

    #[test]
    fn test_add_and_get() {
        let store = store();
        let r = record(1, 10, 0, 1);
        store.add_coin_record(&r, false).unwrap();

        assert_eq!(store.get_coin_record(&r.name()).unwrap(), Some(r.clone()));
        assert_eq!(store.get_unspent_coins_for_wallet(1).unwrap(), vec![r]);
        assert!(store.get_coin_record(&Bytes32::new([9; 32])).unwrap().is_none());
        assert!(store.get_unspent_coins_for_wallet(2).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_overwrites_and_moves_wallet() {
        let store = store();
        let r = record(1, 10, 0, 1);
        store.add_coin_record(&r, false).unwrap();

        let mut moved = r.clone();
        moved.wallet_id = 2;
        store.add_coin_record(&moved, false).unwrap();

        assert!(store.get_unspent_coins_for_wallet(1).unwrap().is_empty());
        assert_eq!(store.get_unspent_coins_for_wallet(2).unwrap(), vec![moved]);
        assert_eq!(store.count_coins().unwrap(), 1);
        store.verify_cache().unwrap();
    }

    #[test]
    fn test_rejects_spend_before_confirmation() {
        let store = store();
        let bad = record(1, 10, 5, 1);
        assert!(matches!(store.add_coin_record(&bad, false), Err(Error::InvalidRecord(_))));
        assert!(store.get_coin_record(&bad.name()).unwrap().is_none());

        let r = record(2, 10, 0, 1);
        store.add_coin_record(&r, false).unwrap();
        assert!(store.set_spent(&r.name(), 4, false).is_err());
        assert!(!store.get_coin_record(&r.name()).unwrap().unwrap().spent());
    }

    #[test]
    fn test_delete_and_set_spent() {
        let store = store();
        let r = record(1, 10, 0, 1);
        store.add_coin_record(&r, false).unwrap();

        let spent = store.set_spent(&r.name(), 12, false).unwrap().unwrap();
        assert!(spent.spent());
        assert!(store.get_unspent_coins_for_wallet(1).unwrap().is_empty());
        assert!(store.set_spent(&Bytes32::new([0; 32]), 12, false).unwrap().is_none());

        store.delete_coin_record(&r.name(), false).unwrap();
        store.delete_coin_record(&r.name(), false).unwrap();
        assert!(store.get_coin_record(&r.name()).unwrap().is_none());
        assert_eq!(store.count_coins().unwrap(), 0);
    }

    #[test]
    fn test_get_many_omits_unknown() {
        let store = store();
        let a = record(1, 10, 0, 1);
        let b = record(2, 11, 0, 1);
        store.add_coin_record(&a, false).unwrap();
        store.add_coin_record(&b, false).unwrap();

        let unknown = Bytes32::new([0xee; 32]);
        let got = store.get_coin_records(&[b.name(), unknown, a.name(), b.name()]).unwrap();
        assert_eq!(got, vec![b.clone(), a.clone()]);
        assert!(store.get_coin_records(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_rollback_reorg_scenario() {
        let store = store();
        let a = record(0xA, 10, 20, 1);
        let b = record(0xB, 12, 0, 1);
        let c = record(0xC, 18, 0, 1);
        for r in [&a, &b, &c] {
            store.add_coin_record(r, false).unwrap();
        }

        let summary = store.rollback_to_height(15, false).unwrap();
        assert_eq!(summary, RollbackSummary { removed: 1, unspent: 1 });

        let unspent = store.get_unspent_coins_for_wallet(1).unwrap();
        assert_eq!(names(&unspent), sorted(vec![a.name(), b.name()]));
        assert!(store.get_coin_record(&c.name()).unwrap().is_none());
        assert!(!store.get_coin_record(&a.name()).unwrap().unwrap().spent());
        store.verify_cache().unwrap();
    }

    #[test]
    fn test_rollback_is_idempotent_and_keeps_exact_height() {
        let store = store();
        store.add_coin_record(&record(1, 15, 15, 1), false).unwrap();
        store.add_coin_record(&record(2, 16, 0, 1), false).unwrap();

        store.rollback_to_height(15, false).unwrap();
        let after_once = store.get_all_coins().unwrap();
        let again = store.rollback_to_height(15, false).unwrap();
        assert!(again.is_empty());
        assert_eq!(store.get_all_coins().unwrap(), after_once);
        assert_eq!(after_once.len(), 1);
        assert!(after_once[0].spent());
    }

    #[test]
    fn test_failed_write_leaves_cache_untouched() {
        let store = store();
        let r = record(1, 10, 0, 1);
        store.add_coin_record(&r, false).unwrap();

        store.db.lock().execute("DROP TABLE coin_record", []).unwrap();
        assert!(matches!(store.add_coin_record(&record(2, 10, 0, 1), false), Err(Error::Storage(_))));
        assert!(store.delete_coin_record(&r.name(), false).is_err());
        assert_eq!(store.cache.read().len(), 1);
        assert!(store.cache.read().get(&r.name()).is_some());
    }

    #[test]
    fn test_aborted_outer_transaction_reloads_cache() {
        let store = store();
        let kept = record(1, 10, 0, 1);
        store.add_coin_record(&kept, false).unwrap();

        let lost = record(2, 11, 0, 1);
        {
            let _tx = store.db.writer().unwrap();
            store.add_coin_record(&lost, true).unwrap();
            store.set_spent(&kept.name(), 12, true).unwrap();
            assert!(store.get_coin_record(&lost.name()).unwrap().is_some());
        }

        assert!(store.get_coin_record(&lost.name()).unwrap().is_none());
        assert_eq!(store.get_unspent_coins_for_wallet(1).unwrap(), vec![kept]);
        store.verify_cache().unwrap();
    }

    #[test]
    fn test_committed_outer_transaction_keeps_writes() {
        let store = store();
        let r = record(1, 10, 0, 1);
        let tx = store.db.writer().unwrap();
        store.add_coin_record(&r, true).unwrap();
        tx.commit().unwrap();
        assert!(store.get_coin_record(&r.name()).unwrap().is_some());
        store.verify_cache().unwrap();
    }

    #[test]
    fn test_other_threads_never_see_uncommitted_coins() {
        let store = store();
        let r = record(1, 10, 0, 1);
        for commit in [false, true] {
            let (written, seen) = crossbeam::channel::bounded(0);
            crossbeam::scope(|s| {
                let (store, r) = (&store, &r);
                s.spawn(move |_| {
                    let tx = store.db.writer().unwrap();
                    store.add_coin_record(r, true).unwrap();
                    assert_eq!(store.get_unspent_coins_for_wallet(1).unwrap().len(), 1);
                    written.send(()).unwrap();
                    std::thread::sleep(std::time::Duration::from_millis(50));
                    if commit {
                        tx.commit().unwrap();
                    } else {
                        drop(tx);
                    }
                });

                seen.recv().unwrap();
                let expected = usize::from(commit);
                assert_eq!(store.get_unspent_coins_for_wallet(1).unwrap().len(), expected);
                assert_eq!(store.get_coin_record(&r.name()).unwrap().is_some(), commit);
                assert_eq!(store.get_coin_records(&[r.name()]).unwrap().len(), expected);
                assert_eq!(store.count_coins().unwrap(), expected);
            })
            .unwrap();
        }
        store.verify_cache().unwrap();
    }

    #[test]
    fn test_verify_cache_detects_external_write() {
        let store = store();
        let r = record(1, 10, 0, 1);
        store.add_coin_record(&r, false).unwrap();

        store
            .db
            .lock()
            .execute("UPDATE coin_record SET spent = 1, spent_height = 11", [])
            .unwrap();
        assert!(matches!(store.verify_cache(), Err(Error::ConsistencyViolation(_))));
        assert!(store.get_coin_record(&r.name()).unwrap().unwrap().spent());
        store.verify_cache().unwrap();
    }

    #[test]
    fn test_corrupt_row_is_consistency_violation() {
        let store = store();
        let r = record(1, 10, 0, 1);
        store.add_coin_record(&r, false).unwrap();
        store.db.lock().execute("UPDATE coin_record SET spent = 1", []).unwrap();
        assert!(matches!(store.rebuild_cache(), Err(Error::ConsistencyViolation(_))));
    }

    #[test]
    fn test_height_queries() {
        let store = store();
        let a = record(1, 5, 9, 1);
        let b = record(2, 7, 0, 1);
        let c = record(3, 12, 0, 2);
        for r in [&a, &b, &c] {
            store.add_coin_record(r, false).unwrap();
        }

        assert_eq!(store.get_first_coin_height().unwrap(), Some(5));
        assert_eq!(
            names(&store.get_unspent_coins_at_height(Some(8)).unwrap()),
            sorted(vec![a.name(), b.name()])
        );
        assert_eq!(
            names(&store.get_unspent_coins_at_height(None).unwrap()),
            sorted(vec![b.name(), c.name()])
        );
        assert_eq!(
            sorted(names(&store.get_coins_to_check(10).unwrap())),
            sorted(vec![b.name(), c.name()])
        );
        assert_eq!(store.get_coin_records_by_puzzle_hash(&c.coin.puzzle_hash).unwrap(), vec![c.clone()]);
        assert_eq!(store.get_coin_records_by_parent_id(&a.coin.parent_coin_info).unwrap(), vec![a]);
    }

    #[test]
    fn test_first_height_of_empty_store() {
        assert_eq!(store().get_first_coin_height().unwrap(), None);
    }

    #[test]
    fn test_clear() {
        let store = store();
        store.add_coin_record(&record(1, 1, 0, 1), false).unwrap();
        store.clear(false).unwrap();
        assert_eq!(store.count_coins().unwrap(), 0);
        assert!(store.get_unspent_coins_for_wallet(1).unwrap().is_empty());
    }

    #[test]
    fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.sqlite");
        let r = record(1, 10, 0, 3);
        {
            let store = CoinStore::create(Arc::new(DbWrapper::open(&path).unwrap())).unwrap();
            store.add_coin_record(&r, false).unwrap();
        }
        let store = CoinStore::create(Arc::new(DbWrapper::open(&path).unwrap())).unwrap();
        assert_eq!(store.get_unspent_coins_for_wallet(3).unwrap(), vec![r]);
    }

    #[test]
    fn test_concurrent_readers_see_whole_updates() {
        let store = store();
        crossbeam::scope(|s| {
            s.spawn(|_| {
                for seed in 1..=40u8 {
                    let r = record(seed, seed as u32, 0, 1);
                    store.add_coin_record(&r, false).unwrap();
                    if seed % 2 == 0 {
                        store.set_spent(&r.name(), seed as u32 + 1, false).unwrap();
                    }
                }
            });
            for _ in 0..4 {
                s.spawn(|_| {
                    for _ in 0..100 {
                        for r in store.get_unspent_coins_for_wallet(1).unwrap() {
                            assert!(!r.spent());
                        }
                        store.cache.read().check_invariants().unwrap();
                    }
                });
            }
        })
        .unwrap();

        assert_eq!(store.count_coins().unwrap(), 40);
        assert_eq!(store.get_unspent_coins_for_wallet(1).unwrap().len(), 20);
        store.verify_cache().unwrap();
    }

    #[derive(Debug, Clone)]
    enum Op {
        Upsert(u8, u32, Option<u32>, u32),
        Delete(u8),
        Rollback(u32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0u8..12, 1u32..30, prop::option::of(0u32..10), 1u32..4)
                .prop_map(|(s, c, gap, w)| Op::Upsert(s, c, gap.map(|g| c + g), w)),
            1 => (0u8..12).prop_map(Op::Delete),
            1 => (0u32..35).prop_map(Op::Rollback),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_cache_matches_storage(ops in prop::collection::vec(op_strategy(), 0..40)) {
            let store = store();
            for op in ops {
                match op {
                    Op::Upsert(seed, confirmed, spent, wallet) => {
                        let mut r = record(seed, confirmed, spent.unwrap_or(0), 1);
                        r.wallet_id = wallet;
                        store.add_coin_record(&r, false).unwrap();
                    }
                    Op::Delete(seed) => {
                        store.delete_coin_record(&record(seed, 1, 0, 1).name(), false).unwrap();
                    }
                    Op::Rollback(h) => {
                        store.rollback_to_height(h, false).unwrap();
                        for r in store.get_all_coins().unwrap() {
                            prop_assert!(r.confirmed_height <= h);
                            prop_assert!(r.spent_height <= h);
                        }
                    }
                }
            }
            let before = store.get_all_coins().unwrap();
            prop_assert!(store.verify_cache().is_ok());
            store.rebuild_cache().unwrap();
            prop_assert_eq!(store.get_all_coins().unwrap(), before);
        }
    }
}
