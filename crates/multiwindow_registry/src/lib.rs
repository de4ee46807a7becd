//! Shared registry of window instances.
//!
//! Every window process reads and writes the same flat key space. There is no
//! lock and no transaction; the only guarantees are per-key writes and the
//! choice between a deferred and an immediate write.

pub mod codec;
pub mod error;
pub mod file_store;
pub mod ids;
pub mod memory;
pub mod model;
pub mod storage;

pub use codec::{InstanceRecord, InstanceRegistry, keys};
pub use error::{RegistryError, RegistryResult};
pub use file_store::FileRegistryStore;
pub use ids::{InstanceId, ProfileKind, TaskId};
pub use memory::MemoryRegistryStore;
pub use model::{Durability, RegistrySnapshot, StoreValue, WriteOp};

/// A key-value store visible to every window process.
pub trait RegistryStore: Send + Sync {
    fn get(&self, key: &str) -> Option<StoreValue>;

    fn put(&self, key: &str, value: StoreValue, durability: Durability) -> RegistryResult<()>;

    fn remove(&self, key: &str, durability: Durability) -> RegistryResult<()>;

    /// All keys starting with `prefix`, in lexical order.
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;

    /// Picks up writes made by other processes since the last refresh.
    fn refresh(&self) -> RegistryResult<()> {
        Ok(())
    }

    /// Forces every deferred write out.
    fn flush(&self) -> RegistryResult<()> {
        Ok(())
    }
}
