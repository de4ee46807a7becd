use std::collections::HashSet;

use multiwindow_registry::TaskId;
use multiwindow_shared::diagnostics;
use parking_lot::Mutex;

use crate::host::TaskHost;
use crate::merge::WindowRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupCheck {
    Proceed,
    /// Another live task absorbed this window's documents.
    Refuse { merged_into: TaskId },
}

#[derive(Debug, Default)]
struct ContextState {
    merged_instance_task_id: Option<TaskId>,
    /// Window classes whose merge waits for their next cold start.
    merges_deferred_to_cold_start: HashSet<WindowRole>,
}

/// Process-wide coordinator state. Never persisted: a fresh process starts
/// with the flag and every deferred merge clear.
#[derive(Debug, Default)]
pub struct CoordinatorContext {
    state: Mutex<ContextState>,
}

impl CoordinatorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merged_instance_task_id(&self) -> Option<TaskId> {
        self.state.lock().merged_instance_task_id
    }

    pub fn set_merged_instance_task_id(&self, task: TaskId) {
        self.state.lock().merged_instance_task_id = Some(task);
    }

    /// Bootstrap check for a window hosted by `task`.
    ///
    /// Refuses while a different, still-live task holds the merge flag;
    /// otherwise clears the flag.
    pub fn check_startup(&self, task: TaskId, tasks: &dyn TaskHost) -> StartupCheck {
        let mut state = self.state.lock();
        if let Some(merged) = state.merged_instance_task_id {
            if merged != task && tasks.is_live(merged) {
                diagnostics::log(format!(
                    "startup_refused task={} merged_into={}",
                    task, merged
                ));
                return StartupCheck::Refuse {
                    merged_into: merged,
                };
            }
        }
        state.merged_instance_task_id = None;
        StartupCheck::Proceed
    }

    /// Marks the merge of the `role` window for its next cold start.
    pub fn defer_merge_to_cold_start(&self, role: WindowRole) {
        self.state.lock().merges_deferred_to_cold_start.insert(role);
    }

    /// Returns and clears the deferred-merge marker of `role`.
    pub fn take_deferred_merge(&self, role: WindowRole) -> bool {
        self.state.lock().merges_deferred_to_cold_start.remove(&role)
    }

    pub fn clear_deferred_merge(&self, role: WindowRole) {
        self.state.lock().merges_deferred_to_cold_start.remove(&role);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InProcessTaskHost;

    #[test]
    fn test_startup_refused_while_absorbing_task_lives() {
        let tasks = InProcessTaskHost::new();
        let absorbing = tasks.spawn_task();
        let context = CoordinatorContext::new();
        context.set_merged_instance_task_id(absorbing);

        assert_eq!(
            context.check_startup(TaskId(999), &tasks),
            StartupCheck::Refuse {
                merged_into: absorbing
            }
        );
        assert_eq!(
            context.merged_instance_task_id(),
            Some(absorbing),
            "refusal keeps the flag"
        );
    }

    #[test]
    fn test_startup_clears_flag_once_absorbing_task_is_gone() {
        let tasks = InProcessTaskHost::new();
        let absorbing = tasks.spawn_task();
        let context = CoordinatorContext::new();
        context.set_merged_instance_task_id(absorbing);
        tasks.lose_task(absorbing);

        assert_eq!(context.check_startup(TaskId(999), &tasks), StartupCheck::Proceed);
        assert_eq!(context.merged_instance_task_id(), None);
    }

    #[test]
    fn test_absorbing_task_itself_may_start() {
        let tasks = InProcessTaskHost::new();
        let absorbing = tasks.spawn_task();
        let context = CoordinatorContext::new();
        context.set_merged_instance_task_id(absorbing);

        assert_eq!(context.check_startup(absorbing, &tasks), StartupCheck::Proceed);
        assert_eq!(context.merged_instance_task_id(), None);
    }

    #[test]
    fn test_deferred_merge_marker_is_taken_once() {
        let context = CoordinatorContext::new();
        context.defer_merge_to_cold_start(WindowRole::Primary);
        assert!(context.take_deferred_merge(WindowRole::Primary));
        assert!(!context.take_deferred_merge(WindowRole::Primary));
    }

    #[test]
    fn test_deferred_merge_marker_belongs_to_one_role() {
        let context = CoordinatorContext::new();
        context.defer_merge_to_cold_start(WindowRole::Primary);

        assert!(!context.take_deferred_merge(WindowRole::Secondary));
        context.clear_deferred_merge(WindowRole::Secondary);
        assert!(
            context.take_deferred_merge(WindowRole::Primary),
            "other role must not consume or clear the marker"
        );
    }
}
