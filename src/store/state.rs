//! Last-known device state.
//!
//! An in-memory mirror of the KV `state` table. Reads hit the mirror; every
//! write goes through to the KV under the same lock so the mirror can never
//! run ahead of disk.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Kv, StoreError, STATE_TABLE};

pub struct StateStore {
    kv: Arc<Kv>,
    mirror: RwLock<HashMap<String, Vec<u8>>>,
}

impl StateStore {
    /// Load (or purge, when `clean_start`) the persisted state.
    pub fn new(kv: Arc<Kv>, clean_start: bool) -> Result<Self, StoreError> {
        if clean_start {
            kv.clear(STATE_TABLE)?;
        }

        let mirror = kv.all(STATE_TABLE)?.into_iter().collect();
        Ok(Self {
            kv,
            mirror: RwLock::new(mirror),
        })
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.mirror.read().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut mirror = self.mirror.write();
        self.kv.put(STATE_TABLE, key, &value)?;
        mirror.insert(key.to_string(), value);
        Ok(())
    }

    pub fn get_all(&self) -> HashMap<String, Vec<u8>> {
        self.mirror.read().clone()
    }
}
