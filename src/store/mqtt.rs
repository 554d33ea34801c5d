//! Pending-publish queue for the MQTT session.
//!
//! Every outbound publish is recorded here before it is handed to the MQTT
//! client and removed once the cloud broker acknowledges it. Entries that
//! survive a restart are re-published, which is what gives the session its
//! at-least-once guarantee.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::error;

use super::{Kv, StoreError, MQTT_TABLE};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPublish {
    pub topic: String,
    pub payload: Vec<u8>,
}

pub struct MqttQueue {
    kv: Arc<Kv>,
    next_id: AtomicU64,
}

impl MqttQueue {
    pub fn new(kv: Arc<Kv>) -> Result<Self, StoreError> {
        // continue numbering after the largest surviving key
        let last = kv
            .all(MQTT_TABLE)?
            .iter()
            .filter_map(|(k, _)| k.parse::<u64>().ok())
            .max()
            .unwrap_or(0);

        Ok(Self {
            kv,
            next_id: AtomicU64::new(last + 1),
        })
    }

    /// Record a publish; returns the queue key used to prune it later.
    pub fn insert(&self, topic: &str, payload: &[u8]) -> Result<String, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let key = format!("{id:020}");
        let entry = PendingPublish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        };
        let bytes = serde_json::to_vec(&entry).expect("json value always serializes");
        self.kv.put(MQTT_TABLE, &key, &bytes)?;
        Ok(key)
    }

    pub fn remove(&self, key: &str) {
        if let Err(err) = self.kv.delete(MQTT_TABLE, key) {
            error!(key, %err, "mqtt queue: delete");
        }
    }

    /// Surviving entries in insertion order.
    pub fn all(&self) -> Result<Vec<(String, PendingPublish)>, StoreError> {
        let mut out = Vec::new();
        for (key, bytes) in self.kv.all(MQTT_TABLE)? {
            match serde_json::from_slice(&bytes) {
                Ok(entry) => out.push((key, entry)),
                Err(err) => error!(key, %err, "mqtt queue: corrupt entry"),
            }
        }
        Ok(out)
    }
}
