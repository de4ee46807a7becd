//! Decides which instance identity a new or recovering window gets.

use std::sync::Arc;

use multiwindow_registry::{Durability, InstanceId, InstanceRegistry, ProfileKind, TaskId};
use multiwindow_shared::diagnostics;

use crate::host::Clock;
use crate::reaper::{ExcessInstanceReaper, ReapOutcome};
use crate::reconciler::Reconciler;
use crate::types::{Allocation, AllocationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRequest {
    /// Instance the caller asked for, e.g. picked in a window switcher.
    pub window_id_hint: Option<InstanceId>,
    pub task_id: Option<TaskId>,
    /// Only a brand-new instance will do.
    pub prefer_new: bool,
    pub profile_kind: ProfileKind,
    pub max_instances: u32,
}

impl AllocationRequest {
    pub fn new(task_id: Option<TaskId>, max_instances: u32) -> Self {
        Self {
            window_id_hint: None,
            task_id,
            prefer_new: false,
            profile_kind: ProfileKind::Regular,
            max_instances,
        }
    }

    pub fn with_hint(mut self, hint: InstanceId) -> Self {
        self.window_id_hint = Some(hint);
        self
    }

    pub fn prefer_new(mut self) -> Self {
        self.prefer_new = true;
        self
    }

    pub fn with_profile(mut self, profile_kind: ProfileKind) -> Self {
        self.profile_kind = profile_kind;
        self
    }
}

#[derive(Clone)]
pub struct Allocator {
    registry: InstanceRegistry,
    clock: Arc<dyn Clock>,
    reconciler: Reconciler,
    reaper: ExcessInstanceReaper,
}

impl Allocator {
    pub fn new(
        registry: InstanceRegistry,
        clock: Arc<dyn Clock>,
        reconciler: Reconciler,
        reaper: ExcessInstanceReaper,
    ) -> Self {
        Self {
            registry,
            clock,
            reconciler,
            reaper,
        }
    }

    /// Picks an instance for `request`, first match wins:
    ///
    /// 1. the hinted instance, if no live task holds it;
    /// 2. the instance already mapped to the requesting task;
    /// 3. with `prefer_new`, the lowest slot without any record;
    /// 4. the best slot without a live task, preferring a matching profile
    ///    and then the most recently used.
    ///
    /// The chosen slot is mapped to the requesting task before returning.
    pub fn allocate(&self, request: &AllocationRequest) -> Allocation {
        self.reconciler.reconcile();

        let allocation = self.decide(request);
        diagnostics::log(format!(
            "instance_allocated instance={} task={} kind={} prefer_new={} max={}",
            allocation
                .instance_id
                .map(|id| id.0.to_string())
                .unwrap_or_else(|| "none".to_string()),
            request
                .task_id
                .map(|task| task.0.to_string())
                .unwrap_or_else(|| "none".to_string()),
            allocation.kind,
            request.prefer_new,
            request.max_instances
        ));

        if let Some(id) = allocation.instance_id {
            // A hinted slot may have no record yet; it starts with the requested profile.
            let fresh_slot = allocation.kind == AllocationKind::NewInstanceNewTask
                || !self.registry.record_exists(id);
            self.record_allocation(id, request.task_id);
            if fresh_slot {
                if let Err(e) = self.registry.set_profile_kind(id, request.profile_kind) {
                    diagnostics::log(format!(
                        "allocation_profile_failed instance={} error={}",
                        id, e
                    ));
                }
            }
        }
        allocation
    }

    fn decide(&self, request: &AllocationRequest) -> Allocation {
        if let Some(hint) = request.window_id_hint {
            if self.registry.task_id(hint).is_none() {
                return Allocation::granted(hint, AllocationKind::ExistingInstanceUnmappedTask);
            }
        }

        if let Some(task) = request.task_id {
            if let Some(id) = self.registry.instance_for_task(task) {
                return Allocation::granted(id, AllocationKind::ExistingInstanceMappedTask);
            }
        }

        if let ReapOutcome::Reaped(reaped) = self
            .reaper
            .reap_if_downgraded(request.max_instances, request.task_id)
        {
            diagnostics::log(format!("allocation_freed_slots count={}", reaped.len()));
        }

        if request.prefer_new {
            return self.allocate_new(request);
        }
        self.allocate_existing(request)
    }

    fn allocate_new(&self, request: &AllocationRequest) -> Allocation {
        let active = self.registry.task_mappings().len();
        if active >= request.max_instances as usize {
            return Allocation::denied(AllocationKind::PreferNewInvalidInstance);
        }
        // Inactive records hold slots without counting against the limit,
        // so the search reaches past `max_instances` by that many.
        let inactive = self
            .registry
            .records()
            .iter()
            .filter(|record| record.task_id.is_none())
            .count();
        let range = request.max_instances as usize + inactive;
        (0..range)
            .filter_map(|slot| u32::try_from(slot).ok().map(InstanceId))
            .find(|id| !self.registry.record_exists(*id))
            .map(|id| Allocation::granted(id, AllocationKind::NewInstanceNewTask))
            .unwrap_or_else(|| Allocation::denied(AllocationKind::PreferNewInvalidInstance))
    }

    fn allocate_existing(&self, request: &AllocationRequest) -> Allocation {
        let mut best: Option<(bool, i64, InstanceId, bool)> = None;
        for slot in 0..request.max_instances {
            let id = InstanceId(slot);
            let (exists, profile_matches, accessed) = match self.registry.read(id) {
                Some(record) if record.task_id.is_some() => continue,
                Some(record) => (
                    true,
                    record.profile_kind == request.profile_kind,
                    record.last_accessed,
                ),
                None => (false, true, 0),
            };
            let better = match best {
                None => true,
                Some((best_matches, best_accessed, _, _)) => {
                    (profile_matches, accessed) > (best_matches, best_accessed)
                }
            };
            if better {
                best = Some((profile_matches, accessed, id, exists));
            }
        }

        match best {
            Some((_, _, id, true)) => Allocation::granted(id, AllocationKind::ExistingInstanceNewTask),
            Some((_, _, id, false)) => Allocation::granted(id, AllocationKind::NewInstanceNewTask),
            None => Allocation::denied(AllocationKind::NoInstanceAvailable),
        }
    }

    fn record_allocation(&self, id: InstanceId, task: Option<TaskId>) {
        if let Some(task) = task {
            for (other, mapped) in self.registry.task_mappings() {
                if mapped == task && other != id {
                    if let Err(e) = self.registry.clear_task_id(other, Durability::Immediate) {
                        diagnostics::log(format!(
                            "allocation_unmap_failed instance={} error={}",
                            other, e
                        ));
                    }
                }
            }
            if let Err(e) = self.registry.set_task_id(id, task, Durability::Immediate) {
                diagnostics::log(format!("allocation_map_failed instance={} error={}", id, e));
            }
        }
        if let Err(e) = self.registry.set_last_accessed(id, self.clock.now_millis()) {
            diagnostics::log(format!(
                "allocation_touch_failed instance={} error={}",
                id, e
            ));
        }
    }
}
