//! Seams to the operating system: task enumeration and wall-clock time.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};

use multiwindow_registry::TaskId;
use parking_lot::Mutex;
use time::OffsetDateTime;

/// OS task enumeration and termination.
pub trait TaskHost: Send + Sync {
    /// Tasks currently alive, as the OS sees them.
    fn live_tasks(&self) -> BTreeSet<TaskId>;

    /// Terminates `task`. Unknown or already finished tasks are ignored.
    fn finish_task(&self, task: TaskId);

    fn is_live(&self, task: TaskId) -> bool {
        self.live_tasks().contains(&task)
    }
}

pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
        i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Task host for embedders that run every window inside one process and
/// track task lifetimes themselves.
#[derive(Debug, Default)]
pub struct InProcessTaskHost {
    state: Mutex<InProcessTasks>,
}

#[derive(Debug, Default)]
struct InProcessTasks {
    next_id: i64,
    live: BTreeSet<TaskId>,
    finished: Vec<TaskId>,
}

impl InProcessTaskHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a task with a fresh id.
    pub fn spawn_task(&self) -> TaskId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let task = TaskId(state.next_id);
        state.live.insert(task);
        task
    }

    /// Registers a task started elsewhere.
    pub fn adopt_task(&self, task: TaskId) {
        let mut state = self.state.lock();
        state.next_id = state.next_id.max(task.0);
        state.live.insert(task);
    }

    /// Marks a task dead without going through [`TaskHost::finish_task`],
    /// as when the OS kills it.
    pub fn lose_task(&self, task: TaskId) {
        self.state.lock().live.remove(&task);
    }

    /// Tasks terminated through [`TaskHost::finish_task`], in call order.
    pub fn finished_tasks(&self) -> Vec<TaskId> {
        self.state.lock().finished.clone()
    }
}

impl TaskHost for InProcessTaskHost {
    fn live_tasks(&self) -> BTreeSet<TaskId> {
        self.state.lock().live.clone()
    }

    fn finish_task(&self, task: TaskId) {
        let mut state = self.state.lock();
        if state.live.remove(&task) {
            state.finished.push(task);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_process_host_tracks_finished_tasks() {
        let host = InProcessTaskHost::new();
        let a = host.spawn_task();
        let b = host.spawn_task();
        host.adopt_task(TaskId(100));

        host.finish_task(a);
        host.finish_task(a);
        host.lose_task(b);

        assert_eq!(host.live_tasks().into_iter().collect::<Vec<_>>(), vec![TaskId(100)]);
        assert_eq!(host.finished_tasks(), vec![a], "double finish is recorded once");
        assert_eq!(host.spawn_task(), TaskId(101), "ids continue past adopted tasks");
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }
}
