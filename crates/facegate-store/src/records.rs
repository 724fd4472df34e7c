//! The bounded FIFO gallery of registered face records.

use crate::kv::{KeyValueStore, KvError};
use facegate_core::Descriptor;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage key holding the serialized gallery.
pub const STORE_KEY: &str = "faceData";

/// Gallery bound; appending past this evicts the oldest record first.
pub const MAX_RECORDS: usize = 30;

/// One registered face: the window-averaged descriptor plus its creation
/// time in Unix milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRecord {
    pub descriptor: Descriptor,
    pub timestamp: i64,
}

impl FaceRecord {
    /// Record stamped with the current wall-clock time.
    pub fn now(descriptor: Descriptor) -> Self {
        Self {
            descriptor,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Backend(#[from] KvError),
    #[error("corrupt gallery under key {key:?}: {source}")]
    Corrupt {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Bounded FIFO gallery over a string key-value backend.
///
/// The whole gallery is one JSON array under [`STORE_KEY`]: reads parse
/// the full array, writes replace it. Eviction order is insertion order,
/// not timestamp order.
pub struct FaceStore<K> {
    kv: K,
}

impl<K: KeyValueStore> FaceStore<K> {
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    /// All records, oldest first. A missing key is an empty gallery.
    pub fn records(&self) -> Result<Vec<FaceRecord>, StoreError> {
        match self.kv.get(STORE_KEY)? {
            Some(raw) => serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                key: STORE_KEY,
                source,
            }),
            None => Ok(Vec::new()),
        }
    }

    /// Append a record, evicting the oldest first when the gallery is
    /// full. Returns the resulting gallery size.
    pub fn append(&mut self, record: FaceRecord) -> Result<usize, StoreError> {
        let mut records = self.records()?;
        while records.len() >= MAX_RECORDS {
            let evicted = records.remove(0);
            tracing::debug!(timestamp = evicted.timestamp, "evicting oldest face record");
        }
        records.push(record);
        self.write(&records)?;
        tracing::info!(gallery = records.len(), "face record appended");
        Ok(records.len())
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.records()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.records()?.is_empty())
    }

    /// Drop the whole gallery. Returns how many records were removed.
    pub fn clear(&mut self) -> Result<usize, StoreError> {
        let count = self.len().unwrap_or(0);
        self.kv.delete(STORE_KEY)?;
        tracing::info!(removed = count, "gallery cleared");
        Ok(count)
    }

    fn write(&mut self, records: &[FaceRecord]) -> Result<(), StoreError> {
        let raw = serde_json::to_string(records).map_err(|source| StoreError::Corrupt {
            key: STORE_KEY,
            source,
        })?;
        self.kv.put(STORE_KEY, &raw)?;
        Ok(())
    }
}
