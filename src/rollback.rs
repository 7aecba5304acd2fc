//! Reorg rollback
//!
//! When the chain view moves back to height `h`, every store holding
//! height-stamped facts must forget what happened above `h`. Stores implement
//! [`Rollback`]; [`rollback_stores`] runs them all inside one writer
//! transaction so either every store rolls back or none does.

use crate::Result;
use crate::storage::DbWrapper;
use serde::Serialize;
use tracing::info;

/// Outcome of rolling one store back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RollbackSummary {
    /// Records confirmed above the height, now deleted
    pub removed: usize,
    /// Records spent above the height, now unspent again
    pub unspent: usize,
}

impl RollbackSummary {
    pub fn is_empty(&self) -> bool {
        self.removed == 0 && self.unspent == 0
    }
}

/// A store that can undo everything recorded above a block height.
///
/// Records confirmed at exactly `height` are kept. Heights are unsigned, so
/// nothing rolls back below genesis: records confirmed at height 0 survive
/// `rollback_to_height(0)` and only a store's `clear` removes them.
pub trait Rollback {
    fn name(&self) -> &'static str;

    /// `in_transaction = true` joins the caller's open transaction.
    fn rollback_to_height(&self, height: u32, in_transaction: bool) -> Result<RollbackSummary>;
}

/// Roll several stores back to `height` under a single transaction.
///
/// On any failure the transaction is rolled back and the abort epoch makes
/// each cached store rebuild from storage on its next call.
pub fn rollback_stores(
    db: &DbWrapper,
    stores: &[&dyn Rollback],
    height: u32,
) -> Result<Vec<(&'static str, RollbackSummary)>> {
    let tx = db.writer()?;
    let mut summaries = Vec::with_capacity(stores.len());
    for store in stores {
        let summary = store.rollback_to_height(height, true)?;
        summaries.push((store.name(), summary));
    }
    tx.commit()?;

    let removed: usize = summaries.iter().map(|(_, s)| s.removed).sum();
    let unspent: usize = summaries.iter().map(|(_, s)| s.unspent).sum();
    info!(height, stores = stores.len(), removed, unspent, "Rolled back stores");
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::bytes::Bytes32;
    use crate::coin::{Coin, CoinRecord};
    use crate::storage::schema;
    use crate::storage::{CoinStore, TradeStore};
    use crate::trade::{TradeRecord, TradeStatus};
    use crate::wallet::WalletType;
    use std::sync::Arc;

    fn stores() -> (Arc<DbWrapper>, CoinStore, TradeStore) {
        let db = Arc::new(DbWrapper::open_in_memory().unwrap());
        let coins = CoinStore::create(db.clone()).unwrap();
        let trades = TradeStore::create(db.clone()).unwrap();
        (db, coins, trades)
    }

    fn coin(seed: u8, confirmed: u32, spent: u32) -> CoinRecord {
        let coin = Coin::new(Bytes32::new([seed; 32]), Bytes32::new([1; 32]), seed as u64);
        CoinRecord::new(coin, confirmed, false, WalletType::Standard, 1).with_spent_height(spent)
    }

    fn trade(seed: u8, confirmed_at_index: u32) -> TradeRecord {
        let mut record = TradeRecord::new(Bytes32::new([seed; 32]), 1_000, true, vec![seed]);
        record.confirmed_at_index = confirmed_at_index;
        if confirmed_at_index > 0 {
            record.status = TradeStatus::Confirmed;
        }
        record
    }

    #[test]
    fn test_rollback_coins_and_trades_together() {
        let (db, coins, trades) = stores();
        let kept = coin(1, 10, 20);
        for r in [&kept, &coin(2, 18, 0)] {
            coins.add_coin_record(r, false).unwrap();
        }
        for t in [trade(1, 12), trade(2, 0), trade(3, 16)] {
            trades.add_trade_record(&t, false).unwrap();
        }

        let summaries = rollback_stores(&db, &[&coins, &trades], 15).unwrap();
        assert_eq!(
            summaries,
            vec![
                (schema::COIN_RECORD, RollbackSummary { removed: 1, unspent: 1 }),
                (schema::TRADE_RECORDS, RollbackSummary { removed: 1, unspent: 0 }),
            ]
        );

        assert_eq!(coins.get_all_coins().unwrap(), vec![kept.with_spent_height(0)]);
        let mut left: Vec<Bytes32> = trades.get_all_trades().unwrap().iter().map(|t| t.trade_id).collect();
        left.sort();
        assert_eq!(left, vec![Bytes32::new([1; 32]), Bytes32::new([2; 32])]);
        assert_eq!(db.open_transactions(), 0);
        assert_eq!(db.aborted_writes(), 0);
        coins.verify_cache().unwrap();
    }

    #[test]
    fn test_failing_store_undoes_earlier_stores() {
        let (db, coins, trades) = stores();
        let a = coin(1, 10, 20);
        let b = coin(2, 18, 0);
        coins.add_coin_record(&a, false).unwrap();
        coins.add_coin_record(&b, false).unwrap();
        let before = coins.get_all_coins().unwrap();

        db.lock()
            .execute(&format!("DROP TABLE {}", schema::TRADE_RECORDS), [])
            .unwrap();
        let result = rollback_stores(&db, &[&coins, &trades], 15);
        assert!(matches!(result, Err(Error::Storage(_))));
        assert_eq!(db.aborted_writes(), 1);

        assert_eq!(coins.get_all_coins().unwrap(), before);
        assert!(coins.get_coin_record(&a.name()).unwrap().unwrap().spent());
        assert_eq!(coins.get_coin_record(&b.name()).unwrap(), Some(b));
        coins.verify_cache().unwrap();
    }

    #[test]
    fn test_genesis_records_survive_rollback_to_zero() {
        let (db, coins, _trades) = stores();
        let genesis = coin(1, 0, 0);
        coins.add_coin_record(&genesis, false).unwrap();
        coins.add_coin_record(&coin(2, 1, 0), false).unwrap();

        let summaries = rollback_stores(&db, &[&coins], 0).unwrap();
        assert_eq!(summaries[0].1, RollbackSummary { removed: 1, unspent: 0 });
        assert_eq!(coins.get_all_coins().unwrap(), vec![genesis]);

        coins.clear(false).unwrap();
        assert_eq!(coins.count_coins().unwrap(), 0);
    }
}
