//! Named blobs
//!
//! Small singleton objects (sync progress, settings) stored as JSON under a
//! string key.

use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use super::schema;
use super::wrapper::DbWrapper;
use crate::Result;

pub struct KeyValStore {
    db: Arc<DbWrapper>,
}

impl KeyValStore {
    pub fn create(db: Arc<DbWrapper>) -> Result<Self> {
        db.create_table(&schema::key_val_table())?;
        Ok(Self { db })
    }

    pub fn get_object<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let d = self.db.dialect();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = {}",
            d.ident("value"),
            schema::KEY_VAL_STORE,
            d.ident("key"),
            d.placeholder(1)
        );
        let conn = self.db.lock();
        let blob: Option<Vec<u8>> = conn.query_row(&sql, [key], |row| row.get(0)).optional()?;
        blob.map(|b| serde_json::from_slice(&b).map_err(Into::into)).transpose()
    }

    pub fn set_object<T: Serialize>(&self, key: &str, obj: &T, in_transaction: bool) -> Result<()> {
        let value = serde_json::to_vec(obj)?;
        let sql = self.db.dialect().upsert(schema::KEY_VAL_STORE, &["key"], &["key", "value"]);
        self.db.writer_maybe_transaction(in_transaction, |conn| {
            conn.execute(&sql, params![key, value])?;
            Ok(())
        })
    }

    pub fn remove_object(&self, key: &str, in_transaction: bool) -> Result<()> {
        let d = self.db.dialect();
        let sql = format!("DELETE FROM {} WHERE {} = {}", schema::KEY_VAL_STORE, d.ident("key"), d.placeholder(1));
        self.db.writer_maybe_transaction(in_transaction, |conn| {
            conn.execute(&sql, [key])?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct SyncProgress {
        height: u32,
        peer: String,
    }

    #[test]
    fn test_object_roundtrip() {
        let store = KeyValStore::create(Arc::new(DbWrapper::open_in_memory().unwrap())).unwrap();
        assert!(store.get_object::<SyncProgress>("sync").unwrap().is_none());

        let progress = SyncProgress { height: 10, peer: "node-1".into() };
        store.set_object("sync", &progress, false).unwrap();
        assert_eq!(store.get_object::<SyncProgress>("sync").unwrap(), Some(progress));

        store.set_object("sync", &SyncProgress { height: 11, peer: "node-2".into() }, false).unwrap();
        assert_eq!(store.get_object::<SyncProgress>("sync").unwrap().unwrap().height, 11);

        store.remove_object("sync", false).unwrap();
        assert!(store.get_object::<SyncProgress>("sync").unwrap().is_none());
    }

    #[test]
    fn test_wrong_shape_is_serialization_error() {
        let store = KeyValStore::create(Arc::new(DbWrapper::open_in_memory().unwrap())).unwrap();
        store.set_object("n", &5u32, false).unwrap();
        assert!(matches!(
            store.get_object::<SyncProgress>("n"),
            Err(crate::Error::Serialization(_))
        ));
    }
}
