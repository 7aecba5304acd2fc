//! Database schema definitions
//!
//! Tables are described once as [`TableDef`]s and rendered per dialect by
//! the adapter.

use crate::dialect::{ColumnDef, ColumnType, Dialect, TableDef};

pub const COIN_RECORD: &str = "coin_record";
pub const HINTS: &str = "hints";
pub const DERIVATION_PATHS: &str = "derivation_paths";
pub const ACTION_QUEUE: &str = "action_queue";
pub const TRADE_RECORDS: &str = "trade_records";
pub const USERS_WALLETS: &str = "users_wallets";
pub const INTERESTED_COINS: &str = "interested_coins";
pub const INTERESTED_PUZZLE_HASHES: &str = "interested_puzzle_hashes";
pub const KEY_VAL_STORE: &str = "key_val_store";
pub const DATABASE_VERSION: &str = "database_version";

/// Coins the wallet has seen, keyed by coin id
pub fn coin_record_table() -> TableDef {
    TableDef::new(COIN_RECORD)
        .column(ColumnDef::new("coin_name", ColumnType::Hash).primary_key())
        .column(ColumnDef::new("confirmed_height", ColumnType::BigInt).not_null())
        .column(ColumnDef::new("spent_height", ColumnType::BigInt).not_null())
        .column(ColumnDef::new("spent", ColumnType::SmallInt).not_null())
        .column(ColumnDef::new("coinbase", ColumnType::SmallInt).not_null())
        .column(ColumnDef::new("puzzle_hash", ColumnType::Hash).not_null())
        .column(ColumnDef::new("coin_parent", ColumnType::Hash).not_null())
        .column(ColumnDef::new("amount", ColumnType::Blob).not_null())
        .column(ColumnDef::new("wallet_type", ColumnType::Int).not_null())
        .column(ColumnDef::new("wallet_id", ColumnType::Int).not_null())
        .index(&["confirmed_height"])
        .index(&["spent_height"])
        .index(&["spent"])
        .index(&["puzzle_hash"])
        .index(&["coin_parent"])
        .index(&["wallet_type"])
        .index(&["wallet_id"])
}

/// Coin id to hint pairs. Version 1 databases key rows by a surrogate id and
/// allow duplicate pairs; version 2 enforces pair uniqueness.
pub fn hints_table(db_version: u32) -> TableDef {
    let table = TableDef::new(HINTS);
    let table = if db_version >= 2 {
        table
            .column(ColumnDef::new("coin_id", ColumnType::Hash).not_null())
            .column(ColumnDef::new("hint", ColumnType::IndexedBlob).not_null())
            .unique(&["coin_id", "hint"])
    } else {
        table
            .column(ColumnDef::autoincrement("id"))
            .column(ColumnDef::new("coin_id", ColumnType::Hash).not_null())
            .column(ColumnDef::new("hint", ColumnType::IndexedBlob).not_null())
    };
    table.index(&["hint"])
}

pub fn derivation_paths_table() -> TableDef {
    TableDef::new(DERIVATION_PATHS)
        .column(ColumnDef::new("derivation_index", ColumnType::Int).not_null())
        .column(ColumnDef::new("pubkey", ColumnType::IndexedBlob).not_null())
        .column(ColumnDef::new("puzzle_hash", ColumnType::Hash).primary_key())
        .column(ColumnDef::new("wallet_type", ColumnType::Int).not_null())
        .column(ColumnDef::new("wallet_id", ColumnType::Int).not_null())
        .column(ColumnDef::new("used", ColumnType::SmallInt).not_null())
        .index(&["derivation_index"])
        .index(&["pubkey"])
        .index(&["wallet_type"])
        .index(&["wallet_id"])
        .index(&["used"])
}

pub fn action_queue_table() -> TableDef {
    TableDef::new(ACTION_QUEUE)
        .column(ColumnDef::autoincrement("id"))
        .column(ColumnDef::new("name", ColumnType::Text).not_null())
        .column(ColumnDef::new("wallet_id", ColumnType::Int).not_null())
        .column(ColumnDef::new("wallet_type", ColumnType::Int).not_null())
        .column(ColumnDef::new("wallet_callback", ColumnType::Text))
        .column(ColumnDef::new("done", ColumnType::SmallInt).not_null())
        .column(ColumnDef::new("data", ColumnType::Text).not_null())
        .index(&["wallet_id"])
}

pub fn trade_records_table() -> TableDef {
    TableDef::new(TRADE_RECORDS)
        .column(ColumnDef::new("trade_record", ColumnType::Blob).not_null())
        .column(ColumnDef::new("trade_id", ColumnType::Hash).primary_key())
        .column(ColumnDef::new("status", ColumnType::Int).not_null())
        .column(ColumnDef::new("confirmed_at_index", ColumnType::Int).not_null())
        .column(ColumnDef::new("created_at_time", ColumnType::BigInt).not_null())
        .column(ColumnDef::new("sent", ColumnType::Int).not_null())
        .index(&["confirmed_at_index"])
        .index(&["status"])
}

pub fn users_wallets_table() -> TableDef {
    TableDef::new(USERS_WALLETS)
        .column(ColumnDef::autoincrement("id"))
        .column(ColumnDef::new("name", ColumnType::Text).not_null())
        .column(ColumnDef::new("wallet_type", ColumnType::Int).not_null())
        .column(ColumnDef::new("data", ColumnType::Text).not_null())
        .index(&["wallet_type"])
}

pub fn interested_coins_table() -> TableDef {
    TableDef::new(INTERESTED_COINS).column(ColumnDef::new("coin_name", ColumnType::Hash).primary_key())
}

pub fn interested_puzzle_hashes_table() -> TableDef {
    TableDef::new(INTERESTED_PUZZLE_HASHES)
        .column(ColumnDef::new("puzzle_hash", ColumnType::Hash).primary_key())
        .column(ColumnDef::new("wallet_id", ColumnType::Int).not_null())
}

pub fn key_val_table() -> TableDef {
    TableDef::new(KEY_VAL_STORE)
        .column(ColumnDef::new("key", ColumnType::IndexedText).primary_key())
        .column(ColumnDef::new("value", ColumnType::Blob).not_null())
}

pub fn database_version_table() -> TableDef {
    TableDef::new(DATABASE_VERSION).column(ColumnDef::new("version", ColumnType::Int).not_null())
}

/// Every table the wallet database holds, in creation order
pub fn all_tables(db_version: u32) -> Vec<TableDef> {
    vec![
        database_version_table(),
        coin_record_table(),
        hints_table(db_version),
        derivation_paths_table(),
        action_queue_table(),
        trade_records_table(),
        users_wallets_table(),
        interested_coins_table(),
        interested_puzzle_hashes_table(),
        key_val_table(),
    ]
}

/// All schema creation statements for a dialect. Index statements that
/// need a probe are rendered as their `create` text.
pub fn all_schema_statements(dialect: Dialect, db_version: u32) -> Vec<String> {
    let tables = all_tables(db_version);
    let mut stmts: Vec<String> = tables.iter().map(|t| dialect.create_table(t)).collect();
    stmts.extend(
        tables
            .iter()
            .flat_map(|t| t.indexes.iter())
            .map(|index| dialect.create_index_if_absent(index).create),
    );
    stmts
}
