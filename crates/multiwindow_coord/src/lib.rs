//! Coordination of window instances that share one persisted registry.
//!
//! Every window process owns an [`InstanceManager`]. The manager allocates an
//! instance slot at launch, keeps the registry consistent with the set of
//! live tasks, and lists instances for window switchers. The two-window merge
//! used when leaving split screen lives in [`merge`].

pub mod allocator;
pub mod closer;
pub mod config;
pub mod context;
pub mod host;
pub mod lifecycle;
pub mod limits;
pub mod manager;
pub mod merge;
pub mod projector;
pub mod reaper;
pub mod reconciler;
pub mod types;

pub use allocator::{AllocationRequest, Allocator};
pub use closer::{CloseOutcome, WindowCloser};
pub use config::{ConfigError, ConfigResult, CoordinatorConfig};
pub use context::{CoordinatorContext, StartupCheck};
pub use host::{Clock, InProcessTaskHost, ManualClock, SystemClock, TaskHost};
pub use lifecycle::{LifecycleBus, LifecycleEvent, Subscription};
pub use limits::{DeviceProfile, InstanceLimitPolicy, LimitChange};
pub use manager::{InstanceManager, SelectedTab};
pub use merge::{
    DocumentStoreOwner, MergeCoordinator, MergeOutcome, MergeState, WindowDirectory, WindowRole,
};
pub use projector::{InstanceSummary, InstanceTag, InstanceViewProjector};
pub use reaper::{ExcessInstanceReaper, ReapOutcome};
pub use reconciler::{ReconcileReport, Reconciler};
pub use types::{
    ActivityFilter, Allocation, AllocationKind, CloseReason, DisplayId, InstanceFilter,
    LifecycleState, ProfileFilter,
};
