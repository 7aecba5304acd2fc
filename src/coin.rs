//! Coins and coin records
//!
//! A `Coin` is identified by the hash of its contents. A `CoinRecord` adds
//! the chain facts the wallet tracks about it: where it was confirmed, where
//! (if anywhere) it was spent, and which wallet owns it.

use crate::bytes::Bytes32;
use crate::cache::CachedRecord;
use crate::wallet::WalletType;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coin {
    pub parent_coin_info: Bytes32,
    pub puzzle_hash: Bytes32,
    pub amount: u64,
}

impl Coin {
    pub fn new(parent_coin_info: Bytes32, puzzle_hash: Bytes32, amount: u64) -> Self {
        Self { parent_coin_info, puzzle_hash, amount }
    }

    /// Content-derived id: hash of parent, puzzle hash and big-endian amount
    pub fn name(&self) -> Bytes32 {
        Bytes32::hash_of(&[
            self.parent_coin_info.as_ref(),
            self.puzzle_hash.as_ref(),
            &self.amount.to_be_bytes(),
        ])
    }
}

/// What the wallet knows about one coin.
///
/// `spent_height == 0` means unspent. When set it is never below
/// `confirmed_height`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinRecord {
    pub coin: Coin,
    pub confirmed_height: u32,
    pub spent_height: u32,
    pub coinbase: bool,
    pub wallet_type: WalletType,
    pub wallet_id: u32,
}

impl CoinRecord {
    pub fn new(
        coin: Coin,
        confirmed_height: u32,
        coinbase: bool,
        wallet_type: WalletType,
        wallet_id: u32,
    ) -> Self {
        Self { coin, confirmed_height, spent_height: 0, coinbase, wallet_type, wallet_id }
    }

    /// Same record, spent at `height`
    pub fn with_spent_height(mut self, height: u32) -> Self {
        self.spent_height = height;
        self
    }

    pub fn name(&self) -> Bytes32 {
        self.coin.name()
    }

    pub fn spent(&self) -> bool {
        self.spent_height > 0
    }

    /// Reject records a store must never persist
    pub fn validate(&self) -> Result<()> {
        if self.spent() && self.spent_height < self.confirmed_height {
            return Err(Error::InvalidRecord(format!(
                "coin {} spent at {} before confirmation at {}",
                self.name(),
                self.spent_height,
                self.confirmed_height
            )));
        }
        Ok(())
    }
}

impl CachedRecord for CoinRecord {
    type Id = Bytes32;
    type Tag = u32;

    fn id(&self) -> Bytes32 {
        self.name()
    }

    fn tag(&self) -> u32 {
        self.wallet_id
    }

    fn confirmed_height(&self) -> u32 {
        self.confirmed_height
    }

    fn spent_height(&self) -> u32 {
        self.spent_height
    }

    fn unspent(&self) -> Self {
        self.clone().with_spent_height(0)
    }
}

/// Raw `coin_record` row as it comes off the wire
#[derive(Debug, Clone)]
pub struct CoinRow {
    pub coin_name: Bytes32,
    pub confirmed_height: i64,
    pub spent_height: i64,
    pub spent: i64,
    pub coinbase: i64,
    pub puzzle_hash: Bytes32,
    pub coin_parent: Bytes32,
    pub amount: Vec<u8>,
    pub wallet_type: i64,
    pub wallet_id: i64,
}

impl CoinRow {
    /// Column order expected by [`CoinRow::from_row`]
    pub const COLUMNS: [&'static str; 10] = [
        "coin_name",
        "confirmed_height",
        "spent_height",
        "spent",
        "coinbase",
        "puzzle_hash",
        "coin_parent",
        "amount",
        "wallet_type",
        "wallet_id",
    ];

    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            coin_name: row.get(0)?,
            confirmed_height: row.get(1)?,
            spent_height: row.get(2)?,
            spent: row.get(3)?,
            coinbase: row.get(4)?,
            puzzle_hash: row.get(5)?,
            coin_parent: row.get(6)?,
            amount: row.get(7)?,
            wallet_type: row.get(8)?,
            wallet_id: row.get(9)?,
        })
    }
}

fn height(value: i64, column: &str, name: &Bytes32) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        Error::ConsistencyViolation(format!("coin {} has out of range {} {}", name, column, value))
    })
}

impl TryFrom<CoinRow> for CoinRecord {
    type Error = Error;

    fn try_from(row: CoinRow) -> Result<Self> {
        let name = row.coin_name;
        let amount: [u8; 8] = row.amount.as_slice().try_into().map_err(|_| {
            Error::ConsistencyViolation(format!(
                "coin {} has a {}-byte amount",
                name,
                row.amount.len()
            ))
        })?;
        let coin = Coin::new(row.coin_parent, row.puzzle_hash, u64::from_be_bytes(amount));
        if coin.name() != name {
            return Err(Error::ConsistencyViolation(format!(
                "coin {} stored under mismatched key",
                name
            )));
        }

        let confirmed_height = height(row.confirmed_height, "confirmed_height", &name)?;
        let spent_height = height(row.spent_height, "spent_height", &name)?;
        if (row.spent != 0) != (spent_height > 0) {
            return Err(Error::ConsistencyViolation(format!(
                "coin {} has spent flag {} with spent_height {}",
                name, row.spent, spent_height
            )));
        }
        if spent_height > 0 && spent_height < confirmed_height {
            return Err(Error::ConsistencyViolation(format!(
                "coin {} spent at {} before confirmation at {}",
                name, spent_height, confirmed_height
            )));
        }

        let wallet_id = u32::try_from(row.wallet_id).map_err(|_| {
            Error::ConsistencyViolation(format!("coin {} has wallet id {}", name, row.wallet_id))
        })?;

        Ok(CoinRecord {
            coin,
            confirmed_height,
            spent_height,
            coinbase: row.coinbase != 0,
            wallet_type: WalletType::try_from(row.wallet_type)?,
            wallet_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coin(seed: u8, amount: u64) -> Coin {
        Coin::new(Bytes32::new([seed; 32]), Bytes32::new([seed.wrapping_add(1); 32]), amount)
    }

    fn row_for(record: &CoinRecord) -> CoinRow {
        CoinRow {
            coin_name: record.name(),
            confirmed_height: record.confirmed_height as i64,
            spent_height: record.spent_height as i64,
            spent: record.spent() as i64,
            coinbase: record.coinbase as i64,
            puzzle_hash: record.coin.puzzle_hash,
            coin_parent: record.coin.parent_coin_info,
            amount: record.coin.amount.to_be_bytes().to_vec(),
            wallet_type: record.wallet_type.code(),
            wallet_id: record.wallet_id as i64,
        }
    }

    #[test]
    fn test_name_depends_on_amount() {
        assert_ne!(coin(1, 10).name(), coin(1, 11).name());
        assert_eq!(coin(1, 10).name(), coin(1, 10).name());
    }

    #[test]
    fn test_spent_is_derived() {
        let record = CoinRecord::new(coin(1, 5), 10, false, WalletType::Standard, 1);
        assert!(!record.spent());
        assert!(record.clone().with_spent_height(12).spent());
    }

    #[test]
    fn test_validate_rejects_spend_before_confirmation() {
        let record = CoinRecord::new(coin(1, 5), 10, false, WalletType::Standard, 1).with_spent_height(9);
        assert!(matches!(record.validate(), Err(Error::InvalidRecord(_))));
        let same_block = CoinRecord::new(coin(1, 5), 10, false, WalletType::Standard, 1).with_spent_height(10);
        assert!(same_block.validate().is_ok());
    }

    #[test]
    fn test_decode_row() {
        let record = CoinRecord::new(coin(3, u64::MAX), 7, true, WalletType::ColouredCoin, 4)
            .with_spent_height(9);
        let decoded = CoinRecord::try_from(row_for(&record)).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_rejects_flag_mismatch() {
        let record = CoinRecord::new(coin(3, 1), 7, false, WalletType::Standard, 1);
        let mut row = row_for(&record);
        row.spent = 1;
        assert!(matches!(
            CoinRecord::try_from(row),
            Err(Error::ConsistencyViolation(_))
        ));
    }

    #[test]
    fn test_decode_rejects_bad_amount_and_key() {
        let record = CoinRecord::new(coin(3, 1), 7, false, WalletType::Standard, 1);

        let mut short = row_for(&record);
        short.amount = vec![1, 2, 3];
        assert!(CoinRecord::try_from(short).is_err());

        let mut wrong_key = row_for(&record);
        wrong_key.coin_name = Bytes32::new([0; 32]);
        assert!(CoinRecord::try_from(wrong_key).is_err());
    }
}
