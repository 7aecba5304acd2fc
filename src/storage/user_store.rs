//! User wallets
//!
//! A fresh database gets one standard wallet so there is always something
//! to receive coins into.

use rusqlite::{OptionalExtension, params};
use std::sync::Arc;
use tracing::debug;

use super::schema;
use super::wrapper::DbWrapper;
use crate::wallet::{WalletInfo, WalletType};
use crate::{Error, Result};

pub const DEFAULT_WALLET_NAME: &str = "Standard Wallet";

const SELECT: &str = "SELECT id, name, wallet_type, data FROM users_wallets";

pub struct UserStore {
    db: Arc<DbWrapper>,
}

impl UserStore {
    pub fn create(db: Arc<DbWrapper>) -> Result<Self> {
        db.create_table(&schema::users_wallets_table())?;
        let store = Self { db };
        store.init_wallet()?;
        Ok(store)
    }

    fn init_wallet(&self) -> Result<()> {
        let _gate = self.db.lock();
        if self.get_all_wallet_info_entries()?.is_empty() {
            let wallet = self.create_wallet(DEFAULT_WALLET_NAME, WalletType::Standard, "", None, false)?;
            debug!(id = wallet.id, "Created default wallet");
        }
        Ok(())
    }

    /// Create a wallet, with an explicit id or the next free one
    pub fn create_wallet(
        &self,
        name: &str,
        wallet_type: WalletType,
        data: &str,
        id: Option<u32>,
        in_transaction: bool,
    ) -> Result<WalletInfo> {
        let d = self.db.dialect();
        let id = self.db.writer_maybe_transaction(in_transaction, |conn| {
            match id {
                Some(id) => {
                    conn.execute(
                        &d.insert(schema::USERS_WALLETS, &["id", "name", "wallet_type", "data"]),
                        params![id, name, wallet_type.code(), data],
                    )?;
                    Ok(id)
                }
                None => {
                    conn.execute(
                        &d.insert(schema::USERS_WALLETS, &["name", "wallet_type", "data"]),
                        params![name, wallet_type.code(), data],
                    )?;
                    to_u32(conn.last_insert_rowid())
                }
            }
        })?;
        Ok(WalletInfo { id, name: name.to_string(), wallet_type, data: data.to_string() })
    }

    pub fn delete_wallet(&self, id: u32, in_transaction: bool) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE id = {}", schema::USERS_WALLETS, self.db.dialect().placeholder(1));
        self.db.writer_maybe_transaction(in_transaction, |conn| {
            conn.execute(&sql, [id])?;
            Ok(())
        })
    }

    /// Overwrite a wallet's name, type and data
    pub fn update_wallet(&self, wallet: &WalletInfo, in_transaction: bool) -> Result<()> {
        let sql = self
            .db
            .dialect()
            .upsert(schema::USERS_WALLETS, &["id"], &["id", "name", "wallet_type", "data"]);
        self.db.writer_maybe_transaction(in_transaction, |conn| {
            conn.execute(&sql, params![wallet.id, wallet.name, wallet.wallet_type.code(), wallet.data])?;
            Ok(())
        })
    }

    /// Wallet with the highest id
    pub fn get_last_wallet(&self) -> Result<Option<WalletInfo>> {
        let conn = self.db.lock();
        let id: Option<i64> = conn.query_row(
            &format!("SELECT MAX(id) FROM {}", schema::USERS_WALLETS),
            [],
            |row| row.get(0),
        )?;
        match id {
            Some(id) => self.get_wallet_by_id(to_u32(id)?),
            None => Ok(None),
        }
    }

    pub fn get_all_wallet_info_entries(&self) -> Result<Vec<WalletInfo>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!("{} ORDER BY id", SELECT))?;
        let rows = stmt
            .query_map([], row_to_wallet)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(decode).collect()
    }

    pub fn get_wallet_by_id(&self, id: u32) -> Result<Option<WalletInfo>> {
        let sql = format!("{} WHERE id = {}", SELECT, self.db.dialect().placeholder(1));
        let conn = self.db.lock();
        conn.query_row(&sql, [id], row_to_wallet)
            .optional()?
            .map(decode)
            .transpose()
    }
}

type WalletRow = (i64, String, i64, String);

fn row_to_wallet(row: &rusqlite::Row) -> rusqlite::Result<WalletRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode((id, name, wallet_type, data): WalletRow) -> Result<WalletInfo> {
    Ok(WalletInfo { id: to_u32(id)?, name, wallet_type: WalletType::try_from(wallet_type)?, data })
}

fn to_u32(id: i64) -> Result<u32> {
    u32::try_from(id).map_err(|_| Error::ConsistencyViolation(format!("wallet id {} out of range", id)))
}
