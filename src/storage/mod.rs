//! Storage Layer - dialect-portable persistence
//!
//! One logical database holds the wallet tables:
//! - coin_record(coin_name, heights, spent, puzzle_hash, coin_parent, amount, wallet)
//! - hints(coin_id, hint)
//! - derivation_paths(derivation_index, pubkey, puzzle_hash, wallet, used)
//! - trade_records, action_queue, users_wallets
//! - interested_coins, interested_puzzle_hashes, key_val_store
//! - database_version(version)
//!
//! Every store shares one [`DbWrapper`] and renders its SQL through the
//! wrapper's dialect.

pub mod schema;
pub mod version;
pub mod wrapper;
pub mod coin_store;
pub mod hint_store;
pub mod puzzle_store;
pub mod action_store;
pub mod trade_store;
pub mod user_store;
pub mod interested_store;
pub mod key_val_store;

pub use action_store::ActionStore;
pub use coin_store::CoinStore;
pub use hint_store::{HintPage, HintStore};
pub use interested_store::InterestedStore;
pub use key_val_store::KeyValStore;
pub use puzzle_store::PuzzleStore;
pub use trade_store::TradeStore;
pub use user_store::UserStore;
pub use wrapper::{CacheEpoch, ConnGuard, DbWrapper, WriteTransaction};
