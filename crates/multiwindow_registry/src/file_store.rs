use std::path::PathBuf;

use multiwindow_shared::diagnostics;
use parking_lot::Mutex;

use crate::error::RegistryResult;
use crate::model::{Durability, RegistrySnapshot, StoreValue, WriteOp};
use crate::storage::{DebouncedStorage, Storage, default_storage_root};
use crate::RegistryStore;

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Registry backed by a JSON file shared between window processes.
///
/// Reads are served from a cached snapshot that already includes this
/// process's own writes. [`RegistryStore::refresh`] reloads the file and
/// re-applies whatever is still queued locally.
pub struct FileRegistryStore {
    cache: Mutex<RegistrySnapshot>,
    storage: DebouncedStorage,
}

impl FileRegistryStore {
    pub fn open(root: PathBuf, profile: &str, debounce_ms: u64) -> RegistryResult<Self> {
        let storage = Storage::new(root, profile.to_string());
        let snapshot = storage.load()?;
        diagnostics::log(format!(
            "registry_opened path={} entries={}",
            storage.file_path().display(),
            snapshot.entries.len()
        ));
        Ok(Self {
            cache: Mutex::new(snapshot),
            storage: DebouncedStorage::new(storage, debounce_ms),
        })
    }

    /// Opens the registry under `MULTIWINDOW_HOME` (or `~/.multiwindow`).
    pub fn open_default(profile: &str) -> RegistryResult<Self> {
        Self::open(default_storage_root(), profile, DEFAULT_DEBOUNCE_MS)
    }

    pub fn file_path(&self) -> PathBuf {
        self.storage.storage().file_path()
    }

    fn write(&self, key: &str, op: WriteOp, durability: Durability) -> RegistryResult<()> {
        let mut cache = self.cache.lock();
        match durability {
            Durability::Deferred => {
                cache.apply([(&key.to_string(), &op)]);
                self.storage.queue(key, op);
                Ok(())
            }
            Durability::Immediate => {
                let local = [(key.to_string(), op.clone())];
                match self.storage.apply_immediate(key, op) {
                    Ok(merged) => {
                        *cache = merged;
                        Ok(())
                    }
                    Err(e) => {
                        // Keep the local view consistent with what we tried to write.
                        cache.apply(local.iter().map(|(k, v)| (k, v)));
                        Err(e)
                    }
                }
            }
        }
    }
}

impl RegistryStore for FileRegistryStore {
    fn get(&self, key: &str) -> Option<StoreValue> {
        self.cache.lock().entries.get(key).cloned()
    }

    fn put(&self, key: &str, value: StoreValue, durability: Durability) -> RegistryResult<()> {
        self.write(key, WriteOp::Put(value), durability)
    }

    fn remove(&self, key: &str, durability: Durability) -> RegistryResult<()> {
        self.write(key, WriteOp::Remove, durability)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.cache
            .lock()
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn refresh(&self) -> RegistryResult<()> {
        let mut cache = self.cache.lock();
        *cache = self.storage.load_merged()?;
        Ok(())
    }

    fn flush(&self) -> RegistryResult<()> {
        let _cache = self.cache.lock();
        self.storage.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(temp: &TempDir) -> FileRegistryStore {
        FileRegistryStore::open(temp.path().to_path_buf(), "default", 10_000).unwrap()
    }

    #[test]
    fn test_deferred_write_is_visible_locally_before_flush() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);

        store
            .put("title.0", StoreValue::Text("Docs".into()), Durability::Deferred)
            .unwrap();

        assert_eq!(
            store.get("title.0"),
            Some(StoreValue::Text("Docs".into())),
            "own deferred write must be readable"
        );
        assert!(!store.file_path().exists(), "nothing should hit disk yet");
    }

    #[test]
    fn test_immediate_write_is_visible_to_other_process() {
        let temp = TempDir::new().unwrap();
        let first = open(&temp);
        let second = open(&temp);

        first
            .put("task_map.0", StoreValue::Int(100), Durability::Immediate)
            .unwrap();
        assert_eq!(second.get("task_map.0"), None, "stale until refreshed");

        second.refresh().unwrap();
        assert_eq!(second.get("task_map.0"), Some(StoreValue::Int(100)));
    }

    #[test]
    fn test_refresh_keeps_unflushed_local_writes() {
        let temp = TempDir::new().unwrap();
        let first = open(&temp);
        let second = open(&temp);

        second
            .put("tab_count.1", StoreValue::Int(4), Durability::Deferred)
            .unwrap();
        first
            .put("task_map.0", StoreValue::Int(100), Durability::Immediate)
            .unwrap();
        second.refresh().unwrap();

        assert_eq!(second.get("tab_count.1"), Some(StoreValue::Int(4)));
        assert_eq!(second.get("task_map.0"), Some(StoreValue::Int(100)));
    }

    #[test]
    fn test_concurrent_processes_do_not_clobber_each_other() {
        let temp = TempDir::new().unwrap();
        let first = open(&temp);
        let second = open(&temp);

        first
            .put("task_map.0", StoreValue::Int(100), Durability::Immediate)
            .unwrap();
        // Second never refreshed, yet its write must not drop the first one's key.
        second
            .put("task_map.1", StoreValue::Int(200), Durability::Immediate)
            .unwrap();

        let third = open(&temp);
        assert_eq!(third.get("task_map.0"), Some(StoreValue::Int(100)));
        assert_eq!(third.get("task_map.1"), Some(StoreValue::Int(200)));
    }

    #[test]
    fn test_remove_and_prefix_listing() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        for id in 0..3 {
            store
                .put(&format!("last_accessed.{}", id), StoreValue::Int(10), Durability::Deferred)
                .unwrap();
        }
        store.remove("last_accessed.1", Durability::Immediate).unwrap();

        assert_eq!(
            store.keys_with_prefix("last_accessed."),
            vec!["last_accessed.0".to_string(), "last_accessed.2".to_string()]
        );
    }
}
