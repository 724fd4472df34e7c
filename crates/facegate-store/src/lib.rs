//! facegate-store — Bounded FIFO gallery of registered face records,
//! persisted as one JSON array in a string key-value backend.

pub mod kv;
pub mod records;

pub use kv::{KeyValueStore, KvError, MemoryKv, SqliteKv};
pub use records::{FaceRecord, FaceStore, StoreError, MAX_RECORDS, STORE_KEY};
