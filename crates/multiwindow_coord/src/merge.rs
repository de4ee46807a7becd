//! Two-window merge state machine.
//!
//! In legacy two-window mode a primary and a secondary window can coexist
//! while the host is in multi-window mode. When the host leaves
//! multi-window mode the remaining window folds the other one's documents
//! into itself. One [`MergeCoordinator`] runs per window.

use std::sync::Arc;

use multiwindow_registry::{Durability, InstanceId, InstanceRegistry, TaskId};
use multiwindow_shared::diagnostics;

use crate::context::CoordinatorContext;
use crate::host::TaskHost;
use crate::lifecycle::{LifecycleBus, LifecycleEvent, Subscription};
use crate::types::{CloseReason, DisplayId, LifecycleState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowRole {
    Primary,
    Secondary,
}

impl WindowRole {
    pub fn companion(self) -> Self {
        match self {
            WindowRole::Primary => WindowRole::Secondary,
            WindowRole::Secondary => WindowRole::Primary,
        }
    }
}

/// A window that owns a document store.
pub trait DocumentStoreOwner: Send + Sync {
    fn role(&self) -> WindowRole;

    fn task_id(&self) -> TaskId;

    fn lifecycle_state(&self) -> LifecycleState;

    /// Writes the document store to disk before returning.
    fn persist_documents_now(&self);

    /// Loads the documents last persisted by the window in `role`.
    fn absorb_documents_from(&self, role: WindowRole);
}

/// Windows running in this process.
pub trait WindowDirectory: Send + Sync {
    fn windows(&self) -> Vec<Arc<dyn DocumentStoreOwner>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    /// Nothing has happened since a cold start.
    Unknown,
    Idle,
    PendingOnResume,
    PendingOnConfigChange,
    Merging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    NoAction,
    Pending(MergeState),
    /// Waiting for the companion's task to pause. The merge runs from the
    /// first entry point called after the companion publishes its pause.
    WaitingForCompanion(TaskId),
    Merged { companion: Option<InstanceId> },
    /// Cold start: the companion was finished without merging.
    CompanionFinished(TaskId),
    /// The window is already torn down.
    Rejected,
}

struct Companion {
    instance: Option<InstanceId>,
    window: Arc<dyn DocumentStoreOwner>,
}

pub struct MergeCoordinator {
    window: Arc<dyn DocumentStoreOwner>,
    directory: Arc<dyn WindowDirectory>,
    registry: InstanceRegistry,
    tasks: Arc<dyn TaskHost>,
    context: Arc<CoordinatorContext>,
    bus: LifecycleBus,
    state: MergeState,
    display: Option<DisplayId>,
    in_multi_window_mode: bool,
    destroyed: bool,
    waiting_for: Option<(TaskId, Subscription)>,
}

impl MergeCoordinator {
    pub fn new(
        window: Arc<dyn DocumentStoreOwner>,
        directory: Arc<dyn WindowDirectory>,
        registry: InstanceRegistry,
        tasks: Arc<dyn TaskHost>,
        context: Arc<CoordinatorContext>,
        bus: LifecycleBus,
    ) -> Self {
        Self {
            window,
            directory,
            registry,
            tasks,
            context,
            bus,
            state: MergeState::Unknown,
            display: None,
            in_multi_window_mode: false,
            destroyed: false,
            waiting_for: None,
        }
    }

    pub fn state(&self) -> MergeState {
        self.state
    }

    pub fn is_waiting_for_companion(&self) -> bool {
        self.waiting_for.is_some()
    }

    pub fn set_display(&mut self, display: DisplayId) {
        self.display = Some(display);
    }

    pub fn on_multi_window_mode_changed(&mut self, in_multi_window_mode: bool) -> MergeOutcome {
        self.in_multi_window_mode = in_multi_window_mode;
        if in_multi_window_mode || self.destroyed {
            return MergeOutcome::NoAction;
        }

        if !self.window.lifecycle_state().is_foreground() {
            return self.set_pending(MergeState::PendingOnResume);
        }

        match self.find_companion() {
            Some(companion) if companion.window.lifecycle_state().is_foreground() => {
                let task = companion.window.task_id();
                // Replaces any earlier wait; the old subscription drops here.
                self.waiting_for = Some((task, self.bus.subscribe()));
                diagnostics::log(format!(
                    "merge_waiting_for_companion task={} companion={}",
                    self.window.task_id(),
                    task
                ));
                MergeOutcome::WaitingForCompanion(task)
            }
            _ => self.merge_now(),
        }
    }

    /// Publishes this window's resume and runs any merge waiting on it.
    pub fn on_resume_with_native(&mut self) -> MergeOutcome {
        self.publish(LifecycleState::Resumed);
        if self.destroyed {
            return MergeOutcome::Rejected;
        }

        if let Some(outcome) = self.complete_companion_wait() {
            return outcome;
        }

        if self.state == MergeState::PendingOnResume {
            return self.merge_now();
        }

        if self.state == MergeState::Unknown && self.waiting_for.is_none() {
            if self.context.take_deferred_merge(self.window.role()) {
                return self.merge_now();
            }
            self.state = MergeState::Idle;
            if !self.in_multi_window_mode {
                if let Some(companion) = self.find_companion() {
                    let task = companion.window.task_id();
                    self.tasks.finish_task(task);
                    diagnostics::log(format!(
                        "merge_cold_start_finished_companion task={} companion={}",
                        self.window.task_id(),
                        task
                    ));
                    return MergeOutcome::CompanionFinished(task);
                }
            }
        }
        MergeOutcome::NoAction
    }

    pub fn on_pause(&mut self) -> MergeOutcome {
        self.publish(LifecycleState::Paused);
        self.complete_companion_wait()
            .unwrap_or(MergeOutcome::NoAction)
    }

    pub fn on_display_added(&mut self, display: DisplayId) -> MergeOutcome {
        log::debug!(target: "multiwindow", "display_added display={:?}", display);
        self.complete_companion_wait()
            .unwrap_or(MergeOutcome::NoAction)
    }

    pub fn on_display_changed(&mut self, display: DisplayId) -> MergeOutcome {
        log::debug!(target: "multiwindow", "display_changed display={:?}", display);
        self.complete_companion_wait()
            .unwrap_or(MergeOutcome::NoAction)
    }

    /// The display this window sits on went away. A configuration change
    /// usually follows, so the merge waits for it.
    pub fn on_display_removed(&mut self, display: DisplayId) -> MergeOutcome {
        if let Some(outcome) = self.complete_companion_wait() {
            return outcome;
        }
        if self.destroyed
            || self.display != Some(display)
            || !self.window.lifecycle_state().is_foreground()
        {
            return MergeOutcome::NoAction;
        }
        self.set_pending(MergeState::PendingOnConfigChange)
    }

    /// `recreating` is set when the window is about to be torn down and
    /// rebuilt for the new configuration.
    pub fn on_configuration_changed(&mut self, recreating: bool) -> MergeOutcome {
        if let Some(outcome) = self.complete_companion_wait() {
            return outcome;
        }
        if self.state != MergeState::PendingOnConfigChange {
            return MergeOutcome::NoAction;
        }
        if recreating {
            self.context.defer_merge_to_cold_start(self.window.role());
            self.state = MergeState::Idle;
            diagnostics::log(format!(
                "merge_deferred_to_cold_start task={}",
                self.window.task_id()
            ));
            return MergeOutcome::Pending(MergeState::PendingOnConfigChange);
        }
        self.context.clear_deferred_merge(self.window.role());
        self.merge_now()
    }

    /// Drains lifecycle events and merges once the awaited companion has
    /// paused.
    ///
    /// Every `on_*` entry point already does this. Hosts that can go a long
    /// time without calling one of them while waiting call this directly.
    pub fn pump_lifecycle_events(&mut self) -> MergeOutcome {
        let Some((task, subscription)) = &self.waiting_for else {
            return MergeOutcome::NoAction;
        };
        let task = *task;
        let companion_paused = subscription
            .drain()
            .iter()
            .any(|event| event.task == task && event.state.is_paused_or_later());
        if !companion_paused {
            return MergeOutcome::WaitingForCompanion(task);
        }
        self.waiting_for = None;
        self.merge_now()
    }

    /// Folds the companion's documents into this window.
    pub fn merge_now(&mut self) -> MergeOutcome {
        if self.destroyed {
            diagnostics::log(format!(
                "merge_rejected_destroyed task={}",
                self.window.task_id()
            ));
            return MergeOutcome::Rejected;
        }
        self.state = MergeState::Merging;
        self.waiting_for = None;

        let companion = self.find_companion();
        if let Some(companion) = &companion {
            companion.window.persist_documents_now();
            self.tasks.finish_task(companion.window.task_id());
        }
        self.context.set_merged_instance_task_id(self.window.task_id());
        self.window.absorb_documents_from(self.window.role().companion());

        let evicted = companion.and_then(|c| c.instance);
        if let Some(id) = evicted {
            if let Err(e) = self.registry.remove_record(id, Durability::Immediate) {
                diagnostics::log(format!("merge_evict_failed instance={} error={}", id, e));
            }
        }
        diagnostics::log(format!(
            "merged task={} companion_instance={:?} reason={}",
            self.window.task_id(),
            evicted.map(|id| id.0),
            CloseReason::CompanionCleanup.as_str()
        ));

        self.state = MergeState::Idle;
        MergeOutcome::Merged { companion: evicted }
    }

    /// Tears the coordinator down; later merge requests are rejected.
    pub fn destroy(&mut self) {
        self.destroyed = true;
        self.waiting_for = None;
        self.publish(LifecycleState::Destroyed);
    }

    /// `Some` once a companion wait has ended in a merge.
    fn complete_companion_wait(&mut self) -> Option<MergeOutcome> {
        match self.pump_lifecycle_events() {
            outcome @ MergeOutcome::Merged { .. } => Some(outcome),
            _ => None,
        }
    }

    fn set_pending(&mut self, state: MergeState) -> MergeOutcome {
        self.state = state;
        MergeOutcome::Pending(state)
    }

    fn publish(&self, state: LifecycleState) {
        self.bus.publish(LifecycleEvent {
            task: self.window.task_id(),
            state,
        });
    }

    /// The live window of the companion role, looked up through the task map.
    fn find_companion(&self) -> Option<Companion> {
        let own_task = self.window.task_id();
        let wanted = self.window.role().companion();
        let windows: Vec<_> = self
            .directory
            .windows()
            .into_iter()
            .filter(|w| w.role() == wanted && w.task_id() != own_task)
            .collect();

        for (id, task) in self.registry.task_mappings() {
            if task == own_task || !self.tasks.is_live(task) {
                continue;
            }
            if let Some(window) = windows.iter().find(|w| w.task_id() == task) {
                return Some(Companion {
                    instance: Some(id),
                    window: window.clone(),
                });
            }
        }

        // A companion that never registered still has a task worth folding.
        windows
            .into_iter()
            .find(|w| self.tasks.is_live(w.task_id()))
            .map(|window| Companion {
                instance: None,
                window,
            })
    }
}

impl Drop for MergeCoordinator {
    fn drop(&mut self) {
        if !self.destroyed {
            self.destroy();
        }
    }
}
