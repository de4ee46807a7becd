use std::sync::Arc;

use multiwindow_registry::{Durability, InstanceId, InstanceRegistry};
use multiwindow_shared::diagnostics;

use crate::host::TaskHost;
use crate::types::CloseReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Task finished, record kept with `closed_by_user` for restoration.
    Retained,
    /// Task finished and record deleted.
    Deleted,
}

/// Ends a window and decides what happens to its record.
#[derive(Clone)]
pub struct WindowCloser {
    registry: InstanceRegistry,
    tasks: Arc<dyn TaskHost>,
    retain_closed_windows: bool,
}

impl WindowCloser {
    pub fn new(
        registry: InstanceRegistry,
        tasks: Arc<dyn TaskHost>,
        retain_closed_windows: bool,
    ) -> Self {
        Self {
            registry,
            tasks,
            retain_closed_windows,
        }
    }

    pub fn close(&self, id: InstanceId, reason: CloseReason) -> CloseOutcome {
        let task = self.registry.task_id(id);
        let outcome = if self.retain_closed_windows && reason.retains_record() {
            let result = self
                .registry
                .set_closed_by_user(id, true)
                .and_then(|_| self.registry.clear_task_id(id, Durability::Immediate));
            if let Err(e) = result {
                diagnostics::log(format!("close_retain_failed instance={} error={}", id, e));
            }
            CloseOutcome::Retained
        } else {
            if let Err(e) = self.registry.remove_record(id, Durability::Immediate) {
                diagnostics::log(format!("close_remove_failed instance={} error={}", id, e));
            }
            CloseOutcome::Deleted
        };

        if let Some(task) = task {
            self.tasks.finish_task(task);
        }
        diagnostics::log(format!(
            "window_closed instance={} reason={} outcome={:?}",
            id.0,
            reason.as_str(),
            outcome
        ));
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InProcessTaskHost;
    use multiwindow_registry::{MemoryRegistryStore, TaskId};

    fn setup(retain: bool) -> (InstanceRegistry, Arc<InProcessTaskHost>, WindowCloser) {
        let registry = InstanceRegistry::new(Arc::new(MemoryRegistryStore::new()));
        let tasks = Arc::new(InProcessTaskHost::new());
        tasks.adopt_task(TaskId(5));
        registry
            .set_task_id(InstanceId(0), TaskId(5), Durability::Immediate)
            .unwrap();
        registry.set_tab_counts(InstanceId(0), 3, 0).unwrap();
        let closer = WindowCloser::new(registry.clone(), tasks.clone(), retain);
        (registry, tasks, closer)
    }

    #[test]
    fn test_user_close_retains_record_when_enabled() {
        let (registry, tasks, closer) = setup(true);

        assert_eq!(
            closer.close(InstanceId(0), CloseReason::UserInitiated),
            CloseOutcome::Retained
        );

        let record = registry.read(InstanceId(0)).unwrap();
        assert!(record.closed_by_user);
        assert_eq!(record.task_id, None);
        assert_eq!(record.tab_count, 3);
        assert_eq!(tasks.finished_tasks(), vec![TaskId(5)]);
    }

    #[test]
    fn test_user_close_deletes_when_retention_disabled() {
        let (registry, _, closer) = setup(false);

        assert_eq!(
            closer.close(InstanceId(0), CloseReason::UserInitiated),
            CloseOutcome::Deleted
        );
        assert!(!registry.record_exists(InstanceId(0)));
    }

    #[test]
    fn test_retention_expiry_always_deletes() {
        let (registry, tasks, closer) = setup(true);

        closer.close(InstanceId(0), CloseReason::RetentionExpired);

        assert!(!registry.record_exists(InstanceId(0)));
        assert!(!tasks.is_live(TaskId(5)));
    }
}
