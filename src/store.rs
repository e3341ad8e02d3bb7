use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The in-memory key space.
///
/// Each operation holds the lock for exactly one critical section: readers
/// share it, `set` and `delete` take it exclusively. Ordering across
/// commands is the dispatcher's job, not the store's.
#[derive(Debug, Default)]
pub struct Store {
    data: RwLock<HashMap<Bytes, Bytes>>,
}

impl Store {
    pub fn new() -> Self {
        Store::default()
    }

    /// Insert or overwrite a key.
    pub async fn set(&self, key: Bytes, value: Bytes) {
        self.data.write().await.insert(key, value);
    }

    /// Get a value. `None` means the key is absent.
    pub async fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.data.read().await.get(key).cloned()
    }

    /// Delete a key. Returns true if it existed.
    pub async fn delete(&self, key: &[u8]) -> bool {
        self.data.write().await.remove(key).is_some()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

pub type SharedStore = Arc<Store>;
