//! Brings the shared registry back in line with the live task list.
//!
//! Task mappings go stale whenever a window process dies without telling
//! anyone. Nothing else deletes them, so every decision that depends on the
//! mapping runs [`Reconciler::reconcile`] first.

use std::collections::BTreeMap;
use std::sync::Arc;

use multiwindow_registry::{Durability, InstanceId, InstanceRegistry, TaskId};
use multiwindow_shared::diagnostics;

use crate::host::TaskHost;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Instances whose task mapping was dropped.
    pub unmapped: Vec<InstanceId>,
    /// Instances whose whole record was deleted.
    pub removed: Vec<InstanceId>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.unmapped.is_empty() && self.removed.is_empty()
    }
}

#[derive(Clone)]
pub struct Reconciler {
    registry: InstanceRegistry,
    tasks: Arc<dyn TaskHost>,
}

impl Reconciler {
    pub fn new(registry: InstanceRegistry, tasks: Arc<dyn TaskHost>) -> Self {
        Self { registry, tasks }
    }

    /// Drops mappings to dead tasks, then deletes records that hold nothing
    /// worth restoring. Idempotent.
    pub fn reconcile(&self) -> ReconcileReport {
        self.registry.refresh();
        let live = self.tasks.live_tasks();
        let mut report = ReconcileReport::default();

        let mut holders: BTreeMap<TaskId, Vec<InstanceId>> = BTreeMap::new();
        for (id, task) in self.registry.task_mappings() {
            if live.contains(&task) {
                holders.entry(task).or_default().push(id);
            } else {
                self.unmap(id, &mut report);
            }
        }

        for (task, ids) in holders {
            if ids.len() < 2 {
                continue;
            }
            diagnostics::invariant_violation(format!(
                "task_mapped_twice task={} instances={:?}",
                task, ids
            ));
            // The most recently accessed instance is the one the task last
            // allocated or resumed.
            let keep = ids
                .iter()
                .copied()
                .max_by_key(|id| (self.registry.last_accessed(*id), std::cmp::Reverse(*id)));
            for id in ids {
                if Some(id) != keep {
                    self.unmap(id, &mut report);
                }
            }
        }

        for record in self.registry.records() {
            let restorable =
                record.has_documents() || record.task_id.is_some() || record.closed_by_user;
            if restorable {
                continue;
            }
            match self.registry.remove_record(record.id, Durability::Deferred) {
                Ok(()) => report.removed.push(record.id),
                Err(e) => diagnostics::log(format!(
                    "reconcile_remove_failed instance={} error={}",
                    record.id, e
                )),
            }
        }

        if !report.is_empty() {
            diagnostics::log(format!(
                "reconciled unmapped={:?} removed={:?}",
                report.unmapped, report.removed
            ));
        }
        report
    }

    fn unmap(&self, id: InstanceId, report: &mut ReconcileReport) {
        match self.registry.clear_task_id(id, Durability::Deferred) {
            Ok(()) => report.unmapped.push(id),
            Err(e) => diagnostics::log(format!(
                "reconcile_unmap_failed instance={} error={}",
                id, e
            )),
        }
    }
}
