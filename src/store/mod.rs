//! Durable key-value storage.
//!
//! A single redb database file holds every persistent concern of the core,
//! one table per owner: device state (`state`) and the MQTT pending-publish
//! queue (`mqtt`). The [`Kv`] handle is shared (`Arc`) and redb provides
//! single-writer/multi-reader transactions underneath.

pub mod mqtt;
pub mod state;

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};

/// Device state, key = dotted state path, value = last seen raw JSON bytes.
pub const STATE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("state");

/// Pending MQTT publishes, key = internal message id, value = serialized
/// publish.
pub const MQTT_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("mqtt");

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("db open: {0}")]
    Open(#[from] redb::DatabaseError),
    #[error("db transaction: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("db table: {0}")]
    Table(#[from] redb::TableError),
    #[error("db storage: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("db commit: {0}")]
    Commit(#[from] redb::CommitError),
}

pub struct Kv {
    db: Database,
}

impl Kv {
    /// Open (or create) the database file and ensure all tables exist.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        {
            txn.open_table(STATE_TABLE)?;
            txn.open_table(MQTT_TABLE)?;
        }
        txn.commit()?;

        Ok(Self { db })
    }

    pub fn get(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let txn = self.db.begin_read()?;
        let t = txn.open_table(table)?;
        Ok(t.get(key)?.map(|guard| guard.value().to_vec()))
    }

    pub fn put(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
        value: &[u8],
    ) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut t = txn.open_table(table)?;
            t.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn delete(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut t = txn.open_table(table)?;
            t.remove(key)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// All entries of a table, in key order.
    pub fn all(
        &self,
        table: TableDefinition<&str, &[u8]>,
    ) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let txn = self.db.begin_read()?;
        let t = txn.open_table(table)?;

        let mut out = Vec::new();
        for entry in t.iter()? {
            let (k, v) = entry?;
            out.push((k.value().to_string(), v.value().to_vec()));
        }
        Ok(out)
    }

    /// Drop every entry of a table.
    pub fn clear(&self, table: TableDefinition<&str, &[u8]>) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut t = txn.open_table(table)?;
            let keys: Vec<String> = t
                .iter()?
                .map(|entry| entry.map(|(k, _)| k.value().to_string()))
                .collect::<Result<_, _>>()?;
            for key in keys {
                t.remove(key.as_str())?;
            }
        }
        txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let kv = Kv::open(&dir.path().join("t.db")).unwrap();

        assert_eq!(kv.get(STATE_TABLE, "a").unwrap(), None);

        kv.put(STATE_TABLE, "a", b"1").unwrap();
        kv.put(STATE_TABLE, "b", b"2").unwrap();
        assert_eq!(kv.get(STATE_TABLE, "a").unwrap(), Some(b"1".to_vec()));

        let all = kv.all(STATE_TABLE).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, "a");

        kv.delete(STATE_TABLE, "a").unwrap();
        assert_eq!(kv.get(STATE_TABLE, "a").unwrap(), None);

        kv.clear(STATE_TABLE).unwrap();
        assert!(kv.all(STATE_TABLE).unwrap().is_empty());
    }

    #[test]
    fn tables_are_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        let kv = Kv::open(&dir.path().join("t.db")).unwrap();

        kv.put(STATE_TABLE, "k", b"state").unwrap();
        kv.put(MQTT_TABLE, "k", b"mqtt").unwrap();

        assert_eq!(kv.get(STATE_TABLE, "k").unwrap(), Some(b"state".to_vec()));
        assert_eq!(kv.get(MQTT_TABLE, "k").unwrap(), Some(b"mqtt".to_vec()));

        kv.clear(STATE_TABLE).unwrap();
        assert_eq!(kv.get(MQTT_TABLE, "k").unwrap(), Some(b"mqtt".to_vec()));
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");

        {
            let kv = Kv::open(&path).unwrap();
            kv.put(STATE_TABLE, "a.b", b"[23]").unwrap();
        }

        let kv = Kv::open(&path).unwrap();
        assert_eq!(kv.get(STATE_TABLE, "a.b").unwrap(), Some(b"[23]".to_vec()));
    }
}
