//! Durable key/value storage on the local machine.
//!
//! Plays the role a browser's local storage would: small string values under
//! string keys, surviving restarts. Backed by the `app_state` table.

use crate::error::{StoreError, StoreResult};
use rusqlite::{Connection, OptionalExtension, params};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub trait LocalStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;
    fn remove(&self, key: &str) -> StoreResult<()>;
}

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> StoreResult<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        Ok(f(&*conn)?)
    }
}

impl LocalStore for SqliteStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM app_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO app_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map(|_| ())
        })
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM app_state WHERE key = ?1", params![key])
                .map(|_| ())
        })
    }
}

/// In-process store, lost on exit.
#[derive(Default)]
pub struct MemoryStore {
    entries: RefCell<HashMap<String, String>>,
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

impl<S: LocalStore + ?Sized> LocalStore for &S {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        (**self).remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::db;

    #[test]
    fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("study.sqlite3");

        {
            let conn = db::init_database(&path).unwrap();
            let store = SqliteStore::new(Arc::new(Mutex::new(conn)));
            store.set("progressQueue:anon:default", "[]").unwrap();
            store.set("progressQueue:anon:default", "[1]").unwrap();
        }

        let conn = db::init_database(&path).unwrap();
        let store = SqliteStore::new(Arc::new(Mutex::new(conn)));
        assert_eq!(
            store.get("progressQueue:anon:default").unwrap().as_deref(),
            Some("[1]")
        );

        store.remove("progressQueue:anon:default").unwrap();
        assert_eq!(store.get("progressQueue:anon:default").unwrap(), None);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::default();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v").unwrap();
        assert_eq!((&store).get("k").unwrap().as_deref(), Some("v"));
    }
}
