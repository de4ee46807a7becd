use std::fmt::{Display, Formatter, Result as FmtResult};

use multiwindow_registry::{InstanceId, InstanceRecord, ProfileKind};
use serde::{Deserialize, Serialize};

/// How an allocation was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationKind {
    /// The hinted instance had no live task.
    ExistingInstanceUnmappedTask,
    /// The requesting task was already mapped to an instance.
    ExistingInstanceMappedTask,
    /// A previously used instance was picked up by a new task.
    ExistingInstanceNewTask,
    /// A slot that had no record at all.
    NewInstanceNewTask,
    /// A new instance was required but none could be created.
    PreferNewInvalidInstance,
    /// Every slot in range is held by a live task.
    NoInstanceAvailable,
}

impl AllocationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AllocationKind::ExistingInstanceUnmappedTask => "existing_instance_unmapped_task",
            AllocationKind::ExistingInstanceMappedTask => "existing_instance_mapped_task",
            AllocationKind::ExistingInstanceNewTask => "existing_instance_new_task",
            AllocationKind::NewInstanceNewTask => "new_instance_new_task",
            AllocationKind::PreferNewInvalidInstance => "prefer_new_invalid_instance",
            AllocationKind::NoInstanceAvailable => "no_instance_available",
        }
    }
}

impl Display for AllocationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub instance_id: Option<InstanceId>,
    pub kind: AllocationKind,
}

impl Allocation {
    pub fn granted(instance_id: InstanceId, kind: AllocationKind) -> Self {
        Self {
            instance_id: Some(instance_id),
            kind,
        }
    }

    pub fn denied(kind: AllocationKind) -> Self {
        Self {
            instance_id: None,
            kind,
        }
    }
}

/// Why a window went away. Passed through for telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    UserInitiated,
    WindowManager,
    RetentionExpired,
    NoTabsInWindow,
    CompanionCleanup,
    Other,
}

impl CloseReason {
    /// Whether the record is kept for later restoration when retention of
    /// closed windows is enabled.
    pub fn retains_record(self) -> bool {
        matches!(self, CloseReason::UserInitiated | CloseReason::WindowManager)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::UserInitiated => "user_initiated",
            CloseReason::WindowManager => "window_manager",
            CloseReason::RetentionExpired => "retention_expired",
            CloseReason::NoTabsInWindow => "no_tabs_in_window",
            CloseReason::CompanionCleanup => "companion_cleanup",
            CloseReason::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivityFilter {
    #[default]
    Any,
    /// Mapped to a live task.
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProfileFilter {
    #[default]
    Any,
    Regular,
    OffTheRecord,
}

/// Which records a query covers. Both parts must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstanceFilter {
    pub activity: ActivityFilter,
    pub profile: ProfileFilter,
}

impl InstanceFilter {
    pub const ANY: InstanceFilter = InstanceFilter {
        activity: ActivityFilter::Any,
        profile: ProfileFilter::Any,
    };

    pub const ACTIVE: InstanceFilter = InstanceFilter {
        activity: ActivityFilter::Active,
        profile: ProfileFilter::Any,
    };

    pub fn with_profile(mut self, profile: ProfileFilter) -> Self {
        self.profile = profile;
        self
    }

    /// `active` is whether the record's task is live.
    pub fn matches(&self, record: &InstanceRecord, active: bool) -> bool {
        let activity = match self.activity {
            ActivityFilter::Any => true,
            ActivityFilter::Active => active,
            ActivityFilter::Inactive => !active,
        };
        let profile = match self.profile {
            ProfileFilter::Any => true,
            ProfileFilter::Regular => record.profile_kind == ProfileKind::Regular,
            ProfileFilter::OffTheRecord => record.profile_kind == ProfileKind::OffTheRecord,
        };
        activity && profile
    }
}

/// Display (screen) a window is shown on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplayId(pub u32);

/// Lifecycle of a window, ordered from creation to teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Created,
    Started,
    Resumed,
    Paused,
    Stopped,
    Destroyed,
}

impl LifecycleState {
    pub fn is_foreground(self) -> bool {
        self == LifecycleState::Resumed
    }

    /// Paused or any later state.
    pub fn is_paused_or_later(self) -> bool {
        self >= LifecycleState::Paused
    }
}
