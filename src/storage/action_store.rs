//! Wallet action queue

use rusqlite::{OptionalExtension, params};
use std::sync::Arc;

use super::schema;
use super::wrapper::DbWrapper;
use crate::wallet::{WalletAction, WalletType};
use crate::{Error, Result};

const SELECT: &str = "SELECT id, name, wallet_id, wallet_type, wallet_callback, done, data FROM action_queue";

pub struct ActionStore {
    db: Arc<DbWrapper>,
}

impl ActionStore {
    pub fn create(db: Arc<DbWrapper>) -> Result<Self> {
        db.create_table(&schema::action_queue_table())?;
        Ok(Self { db })
    }

    /// Queue an action. Returns its id.
    #[allow(clippy::too_many_arguments)]
    pub fn create_action(
        &self,
        name: &str,
        wallet_id: u32,
        wallet_type: WalletType,
        callback: Option<&str>,
        done: bool,
        data: &str,
        in_transaction: bool,
    ) -> Result<u32> {
        let sql = self.db.dialect().insert(
            schema::ACTION_QUEUE,
            &["name", "wallet_id", "wallet_type", "wallet_callback", "done", "data"],
        );
        self.db.writer_maybe_transaction(in_transaction, |conn| {
            conn.execute(&sql, params![name, wallet_id, wallet_type.code(), callback, done, data])?;
            to_u32(conn.last_insert_rowid(), "action id")
        })
    }

    /// Mark an action as done
    pub fn action_done(&self, action_id: u32) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET done = 1 WHERE id = {}",
            schema::ACTION_QUEUE,
            self.db.dialect().placeholder(1)
        );
        self.db.transaction(|conn| {
            conn.execute(&sql, [action_id])?;
            Ok(())
        })
    }

    pub fn get_wallet_action(&self, id: u32) -> Result<Option<WalletAction>> {
        let sql = format!("{} WHERE id = {}", SELECT, self.db.dialect().placeholder(1));
        let conn = self.db.lock();
        conn.query_row(&sql, [id], row_to_action)
            .optional()?
            .map(decode)
            .transpose()
    }

    /// Actions not yet done, oldest first
    pub fn get_all_pending_actions(&self) -> Result<Vec<WalletAction>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!("{} WHERE done = 0 ORDER BY id", SELECT))?;
        let rows = stmt
            .query_map([], row_to_action)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(decode).collect()
    }
}

type ActionRow = (i64, String, i64, i64, Option<String>, bool, String);

fn row_to_action(row: &rusqlite::Row) -> rusqlite::Result<ActionRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn decode((id, name, wallet_id, wallet_type, wallet_callback, done, data): ActionRow) -> Result<WalletAction> {
    Ok(WalletAction {
        id: to_u32(id, "action id")?,
        name,
        wallet_id: to_u32(wallet_id, "wallet id")?,
        wallet_type: WalletType::try_from(wallet_type)?,
        wallet_callback,
        done,
        data,
    })
}

fn to_u32(value: i64, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::ConsistencyViolation(format!("{} {} out of range", what, value)))
}
