//! Window instance coordination.
//!
//! Re-exports the registry and coordinator crates so hosts depend on one
//! package.

pub use multiwindow_coord as coord;
pub use multiwindow_registry as registry;
pub use multiwindow_shared::{diagnostics, paths};

pub use multiwindow_coord::{
    Allocation, AllocationKind, CloseReason, CoordinatorConfig, CoordinatorContext,
    DeviceProfile, InstanceFilter, InstanceManager, InstanceSummary, MergeCoordinator,
    StartupCheck, TaskHost,
};
pub use multiwindow_registry::{
    FileRegistryStore, InstanceId, InstanceRegistry, MemoryRegistryStore, ProfileKind,
    RegistryStore, TaskId,
};
