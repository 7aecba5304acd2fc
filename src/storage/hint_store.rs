//! Hint store
//!
//! Maps coin ids to opaque hint bytes. Lookups go the other way: which
//! coins carry any of these hints. Durable only, no cache.

use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::schema;
use super::wrapper::DbWrapper;
use crate::bytes::Bytes32;
use crate::{Error, Result};

/// Default cap for single-hint lookups
pub const DEFAULT_MAX_ITEMS: usize = 50_000;

/// One page of coin ids matching a hint query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HintPage {
    /// Distinct ids, ascending
    pub coin_ids: Vec<Bytes32>,
    /// Pass back as `cursor` for the next page. `None` once the end is reached.
    pub next_cursor: Option<Bytes32>,
    /// Number of matching ids overall, reported on the first page only
    pub total_count: Option<usize>,
}

pub struct HintStore {
    db: Arc<DbWrapper>,
    insert: String,
}

impl HintStore {
    pub fn create(db: Arc<DbWrapper>) -> Result<Self> {
        db.create_table(&schema::hints_table(db.db_version()))?;
        let dialect = db.dialect();
        let columns = ["coin_id", "hint"];
        let insert = if db.db_version() >= 2 {
            dialect.insert_or_ignore(schema::HINTS, &columns)
        } else {
            dialect.insert(schema::HINTS, &columns)
        };
        Ok(Self { db, insert })
    }

    /// Record hints for coins. On version 2 databases repeated pairs are
    /// ignored.
    pub fn add_hints(&self, hints: &[(Bytes32, Vec<u8>)], in_transaction: bool) -> Result<()> {
        if hints.is_empty() {
            return Ok(());
        }
        self.db.writer_maybe_transaction(in_transaction, |conn| {
            let mut stmt = conn.prepare_cached(&self.insert)?;
            for (coin_id, hint) in hints {
                stmt.execute(params![coin_id, hint])?;
            }
            Ok(())
        })
    }

    /// Coins carrying `hint`, at most `max_items`, ascending
    pub fn get_coin_ids(&self, hint: &[u8], max_items: usize) -> Result<Vec<Bytes32>> {
        let d = self.db.dialect();
        let sql = format!(
            "SELECT DISTINCT coin_id FROM {} WHERE hint = {} ORDER BY coin_id LIMIT {}",
            schema::HINTS,
            d.placeholder(1),
            d.placeholder(2)
        );
        let conn = self.db.lock();
        let mut stmt = conn.prepare_cached(&sql)?;
        let ids = stmt
            .query_map(params![hint, max_items as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<Bytes32>>>()?;
        Ok(ids)
    }

    /// Coins carrying any of `hints`, ascending, no limit
    pub fn get_coin_ids_by_hints(&self, hints: &[Vec<u8>]) -> Result<Vec<Bytes32>> {
        let hints = dedupe(hints);
        if hints.is_empty() {
            return Ok(Vec::new());
        }
        let d = self.db.dialect();
        let sql = format!(
            "SELECT DISTINCT coin_id FROM {} WHERE hint IN ({}) ORDER BY coin_id",
            schema::HINTS,
            d.placeholders(1, hints.len())
        );
        let conn = self.db.lock();
        query_ids(&conn, &sql, blob_params(&hints))
    }

    /// One page of coins carrying any of `hints`, strictly after `cursor`
    pub fn get_coin_ids_by_hints_paginated(
        &self,
        hints: &[Vec<u8>],
        page_size: usize,
        cursor: Option<Bytes32>,
    ) -> Result<HintPage> {
        if page_size == 0 {
            return Err(Error::InvalidArgument("page_size must be positive".to_string()));
        }
        let hints = dedupe(hints);
        if hints.is_empty() {
            return Ok(HintPage {
                total_count: cursor.is_none().then_some(0),
                ..HintPage::default()
            });
        }

        let d = self.db.dialect();
        let hint_list = d.placeholders(1, hints.len());
        let mut params = blob_params(&hints);
        let conn = self.db.lock();

        let total_count = if cursor.is_none() {
            let sql = format!(
                "SELECT COUNT(DISTINCT coin_id) FROM {} WHERE hint IN ({})",
                schema::HINTS,
                hint_list
            );
            let count: i64 = conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
            Some(count as usize)
        } else {
            None
        };

        let mut next = hints.len() + 1;
        let after = match cursor {
            Some(c) => {
                params.push(Value::Blob(c.as_bytes().to_vec()));
                let clause = format!(" AND coin_id > {}", d.placeholder(next));
                next += 1;
                clause
            }
            None => String::new(),
        };
        params.push(Value::Integer(page_size as i64));
        let sql = format!(
            "SELECT DISTINCT coin_id FROM {} WHERE hint IN ({}){} ORDER BY coin_id LIMIT {}",
            schema::HINTS,
            hint_list,
            after,
            d.placeholder(next)
        );
        let coin_ids = query_ids(&conn, &sql, params)?;

        let next_cursor = if coin_ids.len() == page_size { coin_ids.last().copied() } else { None };
        Ok(HintPage { coin_ids, next_cursor, total_count })
    }

    /// Hints recorded for each of the given coins. Coins without hints are
    /// absent from the map.
    pub fn get_hints_for_coin_ids(&self, coin_ids: &[Bytes32]) -> Result<HashMap<Bytes32, Vec<Vec<u8>>>> {
        let mut result: HashMap<Bytes32, Vec<Vec<u8>>> = HashMap::new();
        if coin_ids.is_empty() {
            return Ok(result);
        }
        let d = self.db.dialect();
        let conn = self.db.lock();
        for chunk in coin_ids.chunks(d.max_bind_parameters()) {
            let sql = format!(
                "SELECT DISTINCT coin_id, hint FROM {} WHERE coin_id IN ({}) ORDER BY coin_id, hint",
                schema::HINTS,
                d.placeholders(1, chunk.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter()), |row| {
                    Ok((row.get::<_, Bytes32>(0)?, row.get::<_, Vec<u8>>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for (coin_id, hint) in rows {
                result.entry(coin_id).or_default().push(hint);
            }
        }
        Ok(result)
    }

    /// Number of stored (coin, hint) rows
    pub fn count_hints(&self) -> Result<usize> {
        let conn = self.db.lock();
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", schema::HINTS), [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn dedupe(hints: &[Vec<u8>]) -> Vec<&[u8]> {
    hints
        .iter()
        .map(Vec::as_slice)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn blob_params(hints: &[&[u8]]) -> Vec<Value> {
    hints.iter().map(|h| Value::Blob(h.to_vec())).collect()
}

fn query_ids(conn: &Connection, sql: &str, params: Vec<Value>) -> Result<Vec<Bytes32>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map(params_from_iter(params), |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<Bytes32>>>()?;
    Ok(ids)
}
