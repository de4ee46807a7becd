use std::collections::BTreeSet;
use std::sync::Arc;

use multiwindow_registry::{Durability, InstanceId, InstanceRegistry, TaskId};
use multiwindow_shared::diagnostics;

use crate::host::TaskHost;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReapOutcome {
    /// This downgrade was already reaped.
    AlreadyHandled,
    WithinLimit,
    Reaped(Vec<(InstanceId, TaskId)>),
}

/// Terminates least-recently-used windows after the instance limit drops.
#[derive(Clone)]
pub struct ExcessInstanceReaper {
    registry: InstanceRegistry,
    tasks: Arc<dyn TaskHost>,
}

impl ExcessInstanceReaper {
    pub fn new(registry: InstanceRegistry, tasks: Arc<dyn TaskHost>) -> Self {
        Self { registry, tasks }
    }

    /// Reaps once per downgrade.
    ///
    /// `requesting_task` is the window asking for an instance; it is never
    /// reaped. The extra slot in `active - new_limit + 1` is for that window,
    /// which has not been mapped yet. When it has no mapping the most recently
    /// used live instance is kept as well, so at least one window survives.
    pub fn reap_if_downgraded(
        &self,
        new_limit: u32,
        requesting_task: Option<TaskId>,
    ) -> ReapOutcome {
        if self.registry.downgrade_handled() {
            return ReapOutcome::AlreadyHandled;
        }

        let live = self.tasks.live_tasks();
        let mut seen = BTreeSet::new();
        let active: Vec<(InstanceId, TaskId)> = self
            .registry
            .task_mappings()
            .into_iter()
            .filter(|(_, task)| live.contains(task) && seen.insert(*task))
            .collect();

        let limit = new_limit as usize;
        // Reaping starts only once active exceeds the limit.
        if active.len() <= limit {
            return ReapOutcome::WithinLimit;
        }
        let excess = active.len() - limit + 1;

        let requester_mapped = requesting_task
            .is_some_and(|task| active.iter().any(|(_, mapped)| *mapped == task));
        let mut candidates: Vec<(i64, InstanceId, TaskId)> = active
            .iter()
            .filter(|(_, task)| Some(*task) != requesting_task)
            .map(|(id, task)| (self.registry.last_accessed(*id), *id, *task))
            .collect();
        candidates.sort();

        let reapable = if requester_mapped {
            candidates.len()
        } else {
            candidates.len().saturating_sub(1)
        };
        let victims: Vec<(InstanceId, TaskId)> = candidates
            .into_iter()
            .take(excess.min(reapable))
            .map(|(_, id, task)| (id, task))
            .collect();

        for (id, task) in &victims {
            self.tasks.finish_task(*task);
            if let Err(e) = self.registry.clear_task_id(*id, Durability::Immediate) {
                diagnostics::log(format!("reap_unmap_failed instance={} error={}", id, e));
            }
        }
        // Set last: a crash before this point reaps again on the next launch.
        if let Err(e) = self.registry.set_downgrade_handled(true) {
            diagnostics::log(format!("reap_flag_write_failed error={}", e));
        }

        diagnostics::log(format!(
            "instances_reaped limit={} active={} excess={} reaped={:?}",
            new_limit,
            active.len(),
            excess,
            victims
        ));
        ReapOutcome::Reaped(victims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InProcessTaskHost;
    use multiwindow_registry::MemoryRegistryStore;

    fn setup(
        instances: &[(u32, i64, i64)],
    ) -> (InstanceRegistry, Arc<InProcessTaskHost>, ExcessInstanceReaper) {
        let registry = InstanceRegistry::new(Arc::new(MemoryRegistryStore::new()));
        let tasks = Arc::new(InProcessTaskHost::new());
        for (id, accessed, task) in instances {
            tasks.adopt_task(TaskId(*task));
            registry
                .set_task_id(InstanceId(*id), TaskId(*task), Durability::Immediate)
                .unwrap();
            registry.set_last_accessed(InstanceId(*id), *accessed).unwrap();
        }
        let reaper = ExcessInstanceReaper::new(registry.clone(), tasks.clone());
        (registry, tasks, reaper)
    }

    #[test]
    fn test_downgrade_from_three_to_one_reaps_two_oldest() {
        let (registry, tasks, reaper) = setup(&[(0, 10, 100), (1, 20, 200), (2, 30, 300)]);

        let outcome = reaper.reap_if_downgraded(1, None);

        assert_eq!(
            outcome,
            ReapOutcome::Reaped(vec![
                (InstanceId(0), TaskId(100)),
                (InstanceId(1), TaskId(200))
            ])
        );
        assert_eq!(tasks.finished_tasks(), vec![TaskId(100), TaskId(200)]);
        assert_eq!(registry.task_mappings(), vec![(InstanceId(2), TaskId(300))]);
        assert!(registry.downgrade_handled());
        assert_eq!(
            registry.last_accessed(InstanceId(0)),
            10,
            "rest of the record stays"
        );
    }

    #[test]
    fn test_second_call_is_noop() {
        let (_, tasks, reaper) = setup(&[(0, 10, 100), (1, 20, 200), (2, 30, 300)]);

        reaper.reap_if_downgraded(1, None);
        tasks.adopt_task(TaskId(400));
        let outcome = reaper.reap_if_downgraded(1, None);

        assert_eq!(outcome, ReapOutcome::AlreadyHandled);
        assert_eq!(tasks.finished_tasks().len(), 2);
    }

    #[test]
    fn test_within_limit_leaves_flag_unset() {
        let (registry, _, reaper) = setup(&[(0, 10, 100), (1, 20, 200)]);

        assert_eq!(reaper.reap_if_downgraded(2, None), ReapOutcome::WithinLimit);
        assert!(!registry.downgrade_handled());
    }

    #[test]
    fn test_active_equal_to_limit_reaps_nothing() {
        let (registry, tasks, reaper) = setup(&[(0, 10, 100), (1, 20, 200)]);

        assert_eq!(
            reaper.reap_if_downgraded(2, Some(TaskId(300))),
            ReapOutcome::WithinLimit
        );
        assert!(tasks.finished_tasks().is_empty());
        assert_eq!(registry.task_mappings().len(), 2);
        assert!(!registry.downgrade_handled());
    }

    #[test]
    fn test_requesting_task_is_never_reaped() {
        let (registry, tasks, reaper) = setup(&[(0, 10, 100), (1, 20, 200), (2, 30, 300)]);

        let outcome = reaper.reap_if_downgraded(1, Some(TaskId(100)));

        assert_eq!(
            outcome,
            ReapOutcome::Reaped(vec![
                (InstanceId(1), TaskId(200)),
                (InstanceId(2), TaskId(300))
            ])
        );
        assert!(tasks.is_live(TaskId(100)));
        assert_eq!(registry.task_mappings(), vec![(InstanceId(0), TaskId(100))]);
    }

    #[test]
    fn test_dead_tasks_do_not_count_as_active() {
        let (_, tasks, reaper) = setup(&[(0, 10, 100), (1, 20, 200), (2, 30, 300)]);
        tasks.lose_task(TaskId(100));

        let outcome = reaper.reap_if_downgraded(2, None);

        assert_eq!(outcome, ReapOutcome::WithinLimit);
    }
}
