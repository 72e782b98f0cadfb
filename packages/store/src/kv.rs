use crate::StoreError;

/// Persistent string storage keyed by name.
///
/// Implementations: [`FileStore`](crate::FileStore) (file per key on disk) and
/// [`MemoryStore`](crate::MemoryStore) (process memory, optional quota).
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}
