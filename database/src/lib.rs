//! A minimal key-value store abstraction, modeled on how `lmdb-zero`
//! exposes shared read access through a common `Transaction` that both
//! `ReadTransaction` and `WriteTransaction` deref to - `ChainStore` and
//! `Accounts` are written against exactly that shape so call sites can
//! take `Option<&Transaction>` without caring which concrete transaction
//! kind a caller is holding.
//!
//! The persistent on-disk encoding is explicitly out of this workspace's
//! scope (spec.md §1): PLCS only needs commit/abort to be atomic and
//! `truncate` to drop a table's contents, so this crate backs every
//! "environment" with an in-memory table instead of binding to LMDB.
//! `Database`/`Environment`/`Transaction` are the real collaborator
//! surface `ChainStore`, `Accounts` and `nimiq-consensus` are written against;
//! swapping in a durable backend later would not change any of their code.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::RwLock;

use beserial::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Database {
    name: &'static str,
}

pub struct Environment {
    tables: RwLock<HashMap<&'static str, HashMap<Vec<u8>, Vec<u8>>>>,
}

impl Environment {
    pub fn new() -> Arc<Environment> {
        Arc::new(Environment {
            tables: RwLock::new(HashMap::new()),
        })
    }

    /// Alias kept for parity with the on-disk/volatile split a persistent
    /// backend would offer; this crate only ever has the volatile form.
    pub fn new_volatile() -> Arc<Environment> {
        Environment::new()
    }

    pub fn open_database(&self, name: &'static str) -> Database {
        self.tables.write().entry(name).or_insert_with(HashMap::new);
        Database { name }
    }
}

pub trait AsDatabaseBytes {
    fn as_database_bytes(&self) -> Vec<u8>;
}

impl<T: Serialize> AsDatabaseBytes for T {
    fn as_database_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        self.serialize(&mut buf).expect("writing to a Vec cannot fail");
        buf
    }
}

pub trait FromDatabaseBytes: Sized {
    fn from_database_bytes(bytes: &[u8]) -> Self;
}

impl<T: Deserialize> FromDatabaseBytes for T {
    fn from_database_bytes(bytes: &[u8]) -> Self {
        let mut cursor = Cursor::new(bytes);
        T::deserialize(&mut cursor).expect("corrupted database entry")
    }
}

/// The overlay a `WriteTransaction` buffers until `commit()`. Kept
/// separate from `Transaction` itself only so `Transaction::get` can
/// `borrow()` it without also needing `&mut`.
#[derive(Default)]
struct Overlay {
    writes: HashMap<(&'static str, Vec<u8>), Option<Vec<u8>>>,
    truncated: HashSet<&'static str>,
}

/// Shared read surface for both transaction kinds. Mirrors the
/// `lmdb_zero::Transaction` / `ReadTransaction` / `WriteTransaction` split:
/// code that only needs to read takes `&Transaction`, obtainable from
/// either a read-only or a read-write transaction via `Deref`.
pub struct Transaction<'env> {
    env: &'env Environment,
    overlay: RefCell<Overlay>,
}

impl<'env> Transaction<'env> {
    fn new(env: &'env Environment) -> Self {
        Transaction {
            env,
            overlay: RefCell::new(Overlay::default()),
        }
    }

    pub fn get<K: AsDatabaseBytes, V: FromDatabaseBytes>(&self, db: &Database, key: &K) -> Option<V> {
        let key_bytes = key.as_database_bytes();
        let overlay = self.overlay.borrow();
        if let Some(entry) = overlay.writes.get(&(db.name, key_bytes.clone())) {
            return entry.as_ref().map(|bytes| V::from_database_bytes(bytes));
        }
        if overlay.truncated.contains(db.name) {
            return None;
        }
        drop(overlay);

        let tables = self.env.tables.read();
        tables
            .get(db.name)
            .and_then(|table| table.get(&key_bytes))
            .map(|bytes| V::from_database_bytes(bytes))
    }

    /// Iterate all entries of `db` as seen through this transaction
    /// (committed state overlaid with this transaction's own pending
    /// writes), ordered by raw key bytes.
    pub fn iter<V: FromDatabaseBytes>(&self, db: &Database) -> Vec<(Vec<u8>, V)> {
        let mut merged: HashMap<Vec<u8>, Option<Vec<u8>>> = HashMap::new();

        let overlay = self.overlay.borrow();
        if !overlay.truncated.contains(db.name) {
            let tables = self.env.tables.read();
            if let Some(table) = tables.get(db.name) {
                for (k, v) in table {
                    merged.insert(k.clone(), Some(v.clone()));
                }
            }
        }
        for ((name, key), value) in overlay.writes.iter() {
            if *name == db.name {
                merged.insert(key.clone(), value.clone());
            }
        }

        let mut entries: Vec<(Vec<u8>, V)> = merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|bytes| (k, V::from_database_bytes(&bytes))))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

pub struct ReadTransaction<'env>(Transaction<'env>);

impl<'env> ReadTransaction<'env> {
    pub fn new(env: &'env Environment) -> Self {
        ReadTransaction(Transaction::new(env))
    }
}

impl<'env> Deref for ReadTransaction<'env> {
    type Target = Transaction<'env>;

    fn deref(&self) -> &Transaction<'env> {
        &self.0
    }
}

pub struct WriteTransaction<'env>(Transaction<'env>);

impl<'env> WriteTransaction<'env> {
    pub fn new(env: &'env Environment) -> Self {
        WriteTransaction(Transaction::new(env))
    }

    pub fn put<K: AsDatabaseBytes, V: AsDatabaseBytes>(&mut self, db: &Database, key: &K, value: &V) {
        let mut overlay = self.0.overlay.borrow_mut();
        overlay
            .writes
            .insert((db.name, key.as_database_bytes()), Some(value.as_database_bytes()));
    }

    pub fn remove<K: AsDatabaseBytes>(&mut self, db: &Database, key: &K) {
        let mut overlay = self.0.overlay.borrow_mut();
        overlay.writes.insert((db.name, key.as_database_bytes()), None);
    }

    /// Drop every entry `db` currently holds, as of this transaction.
    /// Used by the chain suffix applier when a new proof's prefix head is
    /// not part of our current dense chain (spec.md §4.2).
    pub fn truncate(&mut self, db: &Database) {
        let mut overlay = self.0.overlay.borrow_mut();
        overlay.truncated.insert(db.name);
        overlay.writes.retain(|(name, _), _| *name != db.name);
    }

    /// Apply every buffered write atomically. Idempotent if called twice
    /// is not supported (matches real transaction handles: `commit`
    /// consumes `self`), but dropping an uncommitted `WriteTransaction`
    /// (i.e. calling `abort`, or simply letting it go out of scope) is
    /// always safe and leaves the environment untouched.
    pub fn commit(self) {
        let mut tables = self.0.env.tables.write();
        let overlay = self.0.overlay.into_inner();

        for name in overlay.truncated {
            tables.entry(name).or_insert_with(HashMap::new).clear();
        }
        for ((name, key), value) in overlay.writes {
            let table = tables.entry(name).or_insert_with(HashMap::new);
            match value {
                Some(v) => {
                    table.insert(key, v);
                }
                None => {
                    table.remove(&key);
                }
            }
        }
    }

    pub fn abort(self) {
        // Dropping `self` discards the buffered overlay without touching `env`.
    }
}

impl<'env> Deref for WriteTransaction<'env> {
    type Target = Transaction<'env>;

    fn deref(&self) -> &Transaction<'env> {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_buffers_writes_until_commit() {
        let env = Environment::new();
        let db = env.open_database("test");

        let mut txn = WriteTransaction::new(&env);
        txn.put(&db, &1u32, &42u32);
        assert_eq!(txn.get::<u32, u32>(&db, &1u32), Some(42));

        // Not yet visible to a fresh read transaction.
        let read = ReadTransaction::new(&env);
        assert_eq!(read.get::<u32, u32>(&db, &1u32), None);

        txn.commit();
        let read2 = ReadTransaction::new(&env);
        assert_eq!(read2.get::<u32, u32>(&db, &1u32), Some(42));
    }

    #[test]
    fn abort_leaves_environment_untouched() {
        let env = Environment::new();
        let db = env.open_database("test");

        let mut txn = WriteTransaction::new(&env);
        txn.put(&db, &1u32, &42u32);
        txn.abort();

        let read = ReadTransaction::new(&env);
        assert_eq!(read.get::<u32, u32>(&db, &1u32), None);
    }

    #[test]
    fn truncate_clears_existing_entries() {
        let env = Environment::new();
        let db = env.open_database("test");

        let mut seed = WriteTransaction::new(&env);
        seed.put(&db, &1u32, &1u32);
        seed.commit();

        let mut txn = WriteTransaction::new(&env);
        txn.truncate(&db);
        txn.put(&db, &2u32, &2u32);
        txn.commit();

        let read = ReadTransaction::new(&env);
        assert_eq!(read.get::<u32, u32>(&db, &1u32), None);
        assert_eq!(read.get::<u32, u32>(&db, &2u32), Some(2));
    }
}
