//! Blob storage seam (C7 support).
//!
//! The actual ballot-blob store (object storage, a content-addressed FS,
//! whatever an operator wires in) is an external collaborator and out of
//! scope here; this module only defines the non-blocking write interface
//! the ledger depends on, plus a bounded in-memory implementation used in
//! tests and as the default when no external store is configured.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob backlog full ({limit} pending writes)")]
    Backlog { limit: usize },
    #[error("blob store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait BlobWriter: Send + Sync {
    /// Persist `data` under `key`, returning once durably written (or
    /// queued durably, for implementations with their own write-behind).
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), BlobError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError>;
}

/// In-memory blob writer bounded by entry count, standing in for a real
/// object store in tests and single-node deployments.
pub struct InMemoryBlobWriter {
    capacity: usize,
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobWriter {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl BlobWriter for InMemoryBlobWriter {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), BlobError> {
        let mut entries = self.entries.lock().expect("blob store lock poisoned");
        if entries.len() >= self.capacity && !entries.contains_key(key) {
            return Err(BlobError::Backlog {
                limit: self.capacity,
            });
        }
        entries.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError> {
        Ok(self
            .entries
            .lock()
            .expect("blob store lock poisoned")
            .get(key)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let store = InMemoryBlobWriter::new(4);
        store.put("k1", b"hello".to_vec()).await.unwrap();
        assert_eq!(store.get("k1").await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn backlog_limit_rejects_new_keys_but_allows_overwrite() {
        let store = InMemoryBlobWriter::new(1);
        store.put("k1", b"a".to_vec()).await.unwrap();
        assert!(store.put("k2", b"b".to_vec()).await.is_err());
        assert!(store.put("k1", b"c".to_vec()).await.is_ok());
    }
}
