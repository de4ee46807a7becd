//! Persistent storage for the registry file.
//!
//! JSON snapshot with atomic tmp+rename, backup rotation and a debounced
//! writer thread. Saves are key-level: pending operations are applied on top of whatever is
//! on disk at flush time, so two window processes sharing one file only ever
//! overwrite the keys they themselves changed.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use multiwindow_shared::{diagnostics, paths};
use parking_lot::{Mutex as PLMutex, MutexGuard as PLMutexGuard};

use crate::error::{RegistryError, RegistryResult};
use crate::model::{RegistrySnapshot, WriteOp};

pub const SCHEMA_VERSION: u32 = 1;

pub type PendingOps = BTreeMap<String, WriteOp>;

/// Low-level storage for registry data.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
    profile: String,
    // Serializes read-modify-write cycles on one file within this process.
    write_lock: Arc<PLMutex<()>>,
}

/// One lock per registry file, shared by every `Storage` in the process.
fn file_lock(path: &Path) -> Arc<PLMutex<()>> {
    static LOCKS: OnceLock<PLMutex<HashMap<PathBuf, Arc<PLMutex<()>>>>> = OnceLock::new();
    LOCKS
        .get_or_init(|| PLMutex::new(HashMap::new()))
        .lock()
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(PLMutex::new(())))
        .clone()
}

impl Storage {
    pub fn new(root: PathBuf, profile: String) -> Self {
        let profile = paths::sanitize_profile_name(&profile);
        let write_lock = file_lock(&Self::path_for(&root, &profile));
        Self {
            root,
            profile,
            write_lock,
        }
    }

    pub fn load(&self) -> RegistryResult<RegistrySnapshot> {
        let path = self.file_path();
        if !path.exists() {
            return Ok(RegistrySnapshot::default());
        }
        let data =
            fs::read_to_string(&path).map_err(|e| RegistryError::ReadError(e.to_string()))?;
        let snapshot = match serde_json::from_str::<RegistrySnapshot>(&data) {
            Ok(s) => s,
            Err(parse_err) => {
                if let Some(backup) = self.load_from_backup() {
                    diagnostics::log(format!(
                        "registry_load_from_backup parse_error={}",
                        parse_err
                    ));
                    return self.migrate(backup);
                }
                return Err(RegistryError::ParseError(parse_err.to_string()));
            }
        };
        self.migrate(snapshot)
    }

    fn load_from_backup(&self) -> Option<RegistrySnapshot> {
        let backup_path = self.file_path().with_extension("json.bak");
        if !backup_path.exists() {
            return None;
        }
        let data = fs::read_to_string(&backup_path).ok()?;
        serde_json::from_str::<RegistrySnapshot>(&data).ok()
    }

    fn migrate(&self, mut snapshot: RegistrySnapshot) -> RegistryResult<RegistrySnapshot> {
        if snapshot.schema_version < SCHEMA_VERSION {
            snapshot.schema_version = SCHEMA_VERSION;
        }
        Ok(snapshot)
    }

    /// Re-reads the file, applies `ops` on top and writes the result.
    ///
    /// Returns the merged snapshot so callers can refresh their view.
    pub fn apply(&self, ops: &PendingOps) -> RegistryResult<RegistrySnapshot> {
        let _guard = self.lock();
        self.apply_locked(ops)
    }

    /// Holds off every other read-modify-write of this file in the process.
    pub(crate) fn lock(&self) -> PLMutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    /// [`Storage::apply`] for callers already holding [`Storage::lock`].
    ///
    /// A file that neither it nor its backup can parse is replaced by a fresh
    /// snapshot. Any other read failure is returned and nothing is written.
    fn apply_locked(&self, ops: &PendingOps) -> RegistryResult<RegistrySnapshot> {
        let mut snapshot = match self.load() {
            Ok(snapshot) => snapshot,
            Err(RegistryError::ParseError(e)) => {
                diagnostics::log(format!(
                    "registry_apply_reset_unparseable error={} discarded_entries={}",
                    e,
                    self.count_stored_entries()
                ));
                RegistrySnapshot::default()
            }
            Err(e) => return Err(e),
        };
        snapshot.apply(ops.iter());
        self.save(&snapshot)?;
        Ok(snapshot)
    }

    /// Entries still recognizable in a file that failed to load.
    fn count_stored_entries(&self) -> usize {
        fs::read_to_string(self.file_path())
            .ok()
            .and_then(|data| serde_json::from_str::<serde_json::Value>(&data).ok())
            .and_then(|value| value.get("entries")?.as_object().map(|entries| entries.len()))
            .unwrap_or(0)
    }

    pub fn save(&self, snapshot: &RegistrySnapshot) -> RegistryResult<()> {
        let path = self.file_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| RegistryError::WriteError(e.to_string()))?;
        }
        self.rotate_backups(&path);
        // Unique per process; writers in this process hold the file lock.
        let tmp_path = path.with_extension(format!("json.{}.tmp", std::process::id()));
        let file =
            fs::File::create(&tmp_path).map_err(|e| RegistryError::WriteError(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, snapshot)
            .map_err(|e| RegistryError::SerializeError(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| RegistryError::WriteError(e.to_string()))?;
        fs::rename(&tmp_path, &path).map_err(|e| RegistryError::WriteError(e.to_string()))?;
        Ok(())
    }

    fn rotate_backups(&self, path: &Path) {
        if !path.exists() {
            return;
        }

        let bak2 = path.with_extension("json.bak.2");
        let bak1 = path.with_extension("json.bak.1");
        let bak = path.with_extension("json.bak");

        if let Err(e) = fs::remove_file(&bak2) {
            if e.kind() != std::io::ErrorKind::NotFound {
                diagnostics::log(format!("registry_backup_warning: remove bak2 failed: {}", e));
            }
        }
        if bak1.exists() {
            if let Err(e) = fs::rename(&bak1, &bak2) {
                diagnostics::log(format!("registry_backup_warning: rotate bak1->bak2 failed: {}", e));
            }
        }
        if bak.exists() {
            if let Err(e) = fs::rename(&bak, &bak1) {
                diagnostics::log(format!("registry_backup_warning: rotate bak->bak1 failed: {}", e));
            }
        }
        // Copy rather than rename: the live file must stay readable by other
        // processes until the new one is renamed over it.
        if let Err(e) = fs::copy(path, &bak) {
            diagnostics::log(format!("registry_backup_warning: create backup failed: {}", e));
        }
    }

    pub fn file_path(&self) -> PathBuf {
        Self::path_for(&self.root, &self.profile)
    }

    fn path_for(root: &Path, profile: &str) -> PathBuf {
        root.join("profiles").join(profile).join("instances.json")
    }
}

pub fn default_storage_root() -> PathBuf {
    paths::registry_root()
}

enum SaveMessage {
    Save,
    Shutdown,
}

/// Debounced storage wrapper that coalesces rapid key writes.
pub struct DebouncedStorage {
    storage: Storage,
    sender: Sender<SaveMessage>,
    pending: Arc<PLMutex<PendingOps>>,
    worker: Option<JoinHandle<()>>,
}

impl DebouncedStorage {
    /// Creates a new debounced storage with the given debounce delay in milliseconds.
    pub fn new(storage: Storage, debounce_ms: u64) -> Self {
        let (sender, receiver) = mpsc::channel();
        let pending: Arc<PLMutex<PendingOps>> = Arc::new(PLMutex::new(BTreeMap::new()));
        let pending_clone = pending.clone();
        let storage_clone = storage.clone();
        let debounce = Duration::from_millis(debounce_ms);

        let worker = thread::spawn(move || {
            Self::worker_loop(receiver, storage_clone, pending_clone, debounce);
        });

        Self {
            storage,
            sender,
            pending,
            worker: Some(worker),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Queues a key operation (will be debounced).
    pub fn queue(&self, key: &str, op: WriteOp) {
        self.pending.lock().insert(key.to_string(), op);
        let _ = self.sender.send(SaveMessage::Save);
    }

    /// Applies `key`/`op` together with everything still queued, bypassing
    /// the debounce. Earlier queued writes land first, so ordering holds.
    pub fn apply_immediate(&self, key: &str, op: WriteOp) -> RegistryResult<RegistrySnapshot> {
        let _file = self.storage.lock();
        let mut pending = self.pending.lock();
        pending.insert(key.to_string(), op);
        let ops = std::mem::take(&mut *pending);
        match self.storage.apply_locked(&ops) {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                // Put the ops back so the next flush retries them with newer data.
                for (k, v) in ops {
                    pending.entry(k).or_insert(v);
                }
                Err(e)
            }
        }
    }

    /// Writes all queued operations now.
    pub fn flush(&self) -> RegistryResult<()> {
        Self::flush_pending(&self.storage, &self.pending)
    }

    /// Operations not yet on disk.
    pub fn pending(&self) -> PendingOps {
        self.pending.lock().clone()
    }

    /// The file as it is on disk with queued operations applied on top.
    pub fn load_merged(&self) -> RegistryResult<RegistrySnapshot> {
        let _file = self.storage.lock();
        let mut snapshot = self.storage.load()?;
        snapshot.apply(self.pending.lock().iter());
        Ok(snapshot)
    }

    fn worker_loop(
        receiver: Receiver<SaveMessage>,
        storage: Storage,
        pending: Arc<PLMutex<PendingOps>>,
        debounce: Duration,
    ) {
        let mut last_request: Option<Instant> = None;

        loop {
            let timeout = if last_request.is_some() {
                debounce
            } else {
                Duration::from_secs(60)
            };

            match receiver.recv_timeout(timeout) {
                Ok(SaveMessage::Save) => {
                    last_request = Some(Instant::now());
                }
                Ok(SaveMessage::Shutdown) => {
                    Self::log_flush(Self::flush_pending(&storage, &pending));
                    break;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if let Some(t) = last_request {
                        if t.elapsed() >= debounce {
                            Self::log_flush(Self::flush_pending(&storage, &pending));
                            last_request = None;
                        }
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Taking and writing the ops under the file lock keeps them visible to
    /// [`DebouncedStorage::load_merged`] at every point.
    fn flush_pending(storage: &Storage, pending: &PLMutex<PendingOps>) -> RegistryResult<()> {
        let _file = storage.lock();
        let ops = std::mem::take(&mut *pending.lock());
        if ops.is_empty() {
            return Ok(());
        }
        match storage.apply_locked(&ops) {
            Ok(_) => Ok(()),
            Err(e) => {
                let mut pending = pending.lock();
                for (k, v) in ops {
                    pending.entry(k).or_insert(v);
                }
                Err(e)
            }
        }
    }

    fn log_flush(result: RegistryResult<()>) {
        if let Err(e) = result {
            diagnostics::log(format!("registry_debounced_save_error: {}", e));
        }
    }
}

impl Drop for DebouncedStorage {
    fn drop(&mut self) {
        let _ = self.sender.send(SaveMessage::Shutdown);
        if let Err(e) = self.flush() {
            diagnostics::log(format!("registry_shutdown_flush_error: {}", e));
        }
        if let Some(w) = self.worker.take() {
            let _ = w.join();
        }
    }
}
