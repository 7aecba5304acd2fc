//! Wallet-level record shapes
//!
//! - `WalletType`: the kind of wallet a coin or derivation path belongs to
//! - `WalletInfo`: a row of the user wallet table
//! - `WalletAction`: a queued action for a wallet to pick up
//! - `DerivationRecord`: one derived puzzle hash and its public key

use crate::bytes::Bytes32;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Wallet kinds. The discriminant is what gets stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WalletType {
    Standard = 0,
    RateLimited = 1,
    AtomicSwap = 2,
    AuthorizedPayee = 3,
    MultiSig = 4,
    Custody = 5,
    ColouredCoin = 6,
    Recoverable = 7,
    DistributedId = 8,
    PoolingWallet = 9,
}

impl WalletType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletType::Standard => "standard",
            WalletType::RateLimited => "rate_limited",
            WalletType::AtomicSwap => "atomic_swap",
            WalletType::AuthorizedPayee => "authorized_payee",
            WalletType::MultiSig => "multi_sig",
            WalletType::Custody => "custody",
            WalletType::ColouredCoin => "coloured_coin",
            WalletType::Recoverable => "recoverable",
            WalletType::DistributedId => "distributed_id",
            WalletType::PoolingWallet => "pooling_wallet",
        }
    }

    pub fn all() -> &'static [WalletType] {
        &[
            WalletType::Standard,
            WalletType::RateLimited,
            WalletType::AtomicSwap,
            WalletType::AuthorizedPayee,
            WalletType::MultiSig,
            WalletType::Custody,
            WalletType::ColouredCoin,
            WalletType::Recoverable,
            WalletType::DistributedId,
            WalletType::PoolingWallet,
        ]
    }

    pub fn code(&self) -> i64 {
        *self as u8 as i64
    }
}

impl TryFrom<i64> for WalletType {
    type Error = Error;

    fn try_from(code: i64) -> Result<Self> {
        WalletType::all()
            .iter()
            .copied()
            .find(|t| t.code() == code)
            .ok_or_else(|| Error::ConsistencyViolation(format!("unknown wallet type code {}", code)))
    }
}

impl FromStr for WalletType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_lowercase();
        WalletType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| Error::InvalidArgument(format!("Unknown wallet type: {}", s)))
    }
}

impl std::fmt::Display for WalletType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletInfo {
    pub id: u32,
    pub name: String,
    pub wallet_type: WalletType,
    /// Wallet-specific state, opaque to the store
    pub data: String,
}

/// Work queued for a wallet, e.g. a callback to run once a coin arrives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAction {
    pub id: u32,
    pub name: String,
    pub wallet_id: u32,
    pub wallet_type: WalletType,
    pub wallet_callback: Option<String>,
    pub done: bool,
    pub data: String,
}

/// A derived puzzle hash at a given index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationRecord {
    pub index: u32,
    pub puzzle_hash: Bytes32,
    /// Serialized public key, opaque to the store
    pub pubkey: Vec<u8>,
    pub wallet_type: WalletType,
    pub wallet_id: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_type_codes_roundtrip() {
        for ty in WalletType::all() {
            assert_eq!(WalletType::try_from(ty.code()).unwrap(), *ty);
            assert_eq!(ty.as_str().parse::<WalletType>().unwrap(), *ty);
        }
        assert_eq!(WalletType::ColouredCoin.code(), 6);
    }

    #[test]
    fn test_unknown_wallet_type_code() {
        assert!(matches!(
            WalletType::try_from(42),
            Err(Error::ConsistencyViolation(_))
        ));
        assert!("lightning".parse::<WalletType>().is_err());
    }
}
