//! In-process snapshot cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::{SnapshotCache, SnapshotMetadata, StoreError};

/// Snapshot cache kept in memory. Counts writes, which makes it the cache
/// of choice for checking save coalescing.
#[derive(Default)]
pub struct MemorySnapshotCache {
    entries: Mutex<HashMap<String, (Vec<u8>, SnapshotMetadata)>>,
    writes: AtomicU64,
}

impl MemorySnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total successful `save_snapshot` calls across all names.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, (Vec<u8>, SnapshotMetadata)>>, StoreError>
    {
        self.entries
            .lock()
            .map_err(|_| StoreError::DatabaseError("snapshot cache lock poisoned".into()))
    }
}

impl SnapshotCache for MemorySnapshotCache {
    fn save_snapshot(&self, name: &str, snapshot: &[u8]) -> Result<SnapshotMetadata, StoreError> {
        let mut entries = self.lock()?;
        let previous = entries.get(name).map(|(_, meta)| meta);
        let meta = SnapshotMetadata::next(previous, name, snapshot.len(), snapshot.len());
        entries.insert(name.to_string(), (snapshot.to_vec(), meta.clone()));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(meta)
    }

    fn load_snapshot(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        self.lock()?
            .get(name)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn load_metadata(&self, name: &str) -> Result<SnapshotMetadata, StoreError> {
        self.lock()?
            .get(name)
            .map(|(_, meta)| meta.clone())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn delete_snapshot(&self, name: &str) -> Result<(), StoreError> {
        self.lock()?.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_writes() {
        let cache = MemorySnapshotCache::new();
        cache.save_snapshot("a", b"1").unwrap();
        cache.save_snapshot("a", b"2").unwrap();
        cache.save_snapshot("b", b"3").unwrap();
        assert_eq!(cache.write_count(), 3);
        assert_eq!(cache.load_snapshot("a").unwrap(), b"2".to_vec());
        assert_eq!(cache.load_metadata("a").unwrap().revision, 2);
    }

    #[test]
    fn test_missing_and_delete() {
        let cache = MemorySnapshotCache::new();
        assert!(matches!(
            cache.load_snapshot("a"),
            Err(StoreError::NotFound(_))
        ));
        cache.save_snapshot("a", b"1").unwrap();
        cache.delete_snapshot("a").unwrap();
        assert!(cache.load_metadata("a").is_err());
    }
}
