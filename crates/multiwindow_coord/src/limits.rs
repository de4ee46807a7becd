//! Maximum number of concurrent window instances.

use multiwindow_registry::{InstanceRegistry, RegistryResult};
use multiwindow_shared::diagnostics;

use crate::config::LimitSettings;

/// Limit in the two-window legacy mode.
pub const LEGACY_MAX_INSTANCES: u32 = 3;
pub const LIMIT_DISABLED_MAX_INSTANCES: u32 = 5;
pub const DESKTOP_MAX_INSTANCES: u32 = 1000;
pub const LOW_MEMORY_MAX_INSTANCES: u32 = 5;

/// What the coordinator knows about the device it runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    pub is_desktop: bool,
    pub total_memory_mb: u64,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            is_desktop: false,
            total_memory_mb: u64::MAX,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstanceLimitPolicy {
    settings: LimitSettings,
}

impl InstanceLimitPolicy {
    pub fn new(settings: LimitSettings) -> Self {
        Self { settings }
    }

    pub fn max_instances(&self, device: &DeviceProfile) -> u32 {
        if self.settings.legacy_two_window {
            return LEGACY_MAX_INSTANCES;
        }
        if !self.settings.limit_enabled {
            return LIMIT_DISABLED_MAX_INSTANCES;
        }
        if device.is_desktop {
            return DESKTOP_MAX_INSTANCES;
        }
        if device.total_memory_mb < self.settings.low_memory_threshold_mb {
            return LOW_MEMORY_MAX_INSTANCES;
        }
        self.settings.max_instances.max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitChange {
    FirstObservation,
    Unchanged,
    Increased { from: u32 },
    Decreased { from: u32 },
}

/// Records `limit` as the current limit.
///
/// An increase clears the downgrade-handled flag so that a later decrease is
/// reaped again. A decrease is left to the reaper.
pub fn observe_instance_limit(
    registry: &InstanceRegistry,
    limit: u32,
) -> RegistryResult<LimitChange> {
    let change = match registry.max_instance_limit() {
        None => LimitChange::FirstObservation,
        Some(previous) if previous == limit => LimitChange::Unchanged,
        Some(previous) if previous < limit => LimitChange::Increased { from: previous },
        Some(previous) => LimitChange::Decreased { from: previous },
    };

    if change == LimitChange::Unchanged {
        return Ok(change);
    }

    diagnostics::log(format!("instance_limit_observed limit={} change={:?}", limit, change));
    if matches!(change, LimitChange::Increased { .. }) && registry.downgrade_handled() {
        registry.set_downgrade_handled(false)?;
    }
    registry.set_max_instance_limit(limit)?;
    Ok(change)
}

#[cfg(test)]
mod tests {
    use super::*;
    use multiwindow_registry::MemoryRegistryStore;
    use std::sync::Arc;

    fn policy(f: impl FnOnce(&mut LimitSettings)) -> InstanceLimitPolicy {
        let mut settings = LimitSettings::default();
        f(&mut settings);
        InstanceLimitPolicy::new(settings)
    }

    #[test]
    fn test_policy_precedence() {
        let phone = DeviceProfile {
            is_desktop: false,
            total_memory_mb: 8000,
        };
        let small_phone = DeviceProfile {
            is_desktop: false,
            total_memory_mb: 4000,
        };
        let desktop = DeviceProfile {
            is_desktop: true,
            total_memory_mb: 4000,
        };

        assert_eq!(policy(|s| s.legacy_two_window = true).max_instances(&desktop), 3);
        assert_eq!(policy(|s| s.limit_enabled = false).max_instances(&desktop), 5);
        assert_eq!(policy(|_| {}).max_instances(&desktop), 1000);
        assert_eq!(policy(|_| {}).max_instances(&small_phone), 5);
        assert_eq!(policy(|_| {}).max_instances(&phone), 20);
        assert_eq!(policy(|s| s.max_instances = 8).max_instances(&phone), 8);
        assert_eq!(
            policy(|s| s.max_instances = 0).max_instances(&phone),
            1,
            "a zero limit would make every window unallocatable"
        );
    }

    #[test]
    fn test_increase_clears_downgrade_flag() {
        let registry = InstanceRegistry::new(Arc::new(MemoryRegistryStore::new()));

        assert_eq!(
            observe_instance_limit(&registry, 5).unwrap(),
            LimitChange::FirstObservation
        );
        assert_eq!(
            observe_instance_limit(&registry, 2).unwrap(),
            LimitChange::Decreased { from: 5 }
        );
        registry.set_downgrade_handled(true).unwrap();
        assert_eq!(observe_instance_limit(&registry, 2).unwrap(), LimitChange::Unchanged);
        assert!(registry.downgrade_handled(), "same limit keeps the flag");

        assert_eq!(
            observe_instance_limit(&registry, 4).unwrap(),
            LimitChange::Increased { from: 2 }
        );
        assert!(!registry.downgrade_handled());
        assert_eq!(registry.max_instance_limit(), Some(4));
    }
}
