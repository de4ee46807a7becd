//! Publish/subscribe channel for window lifecycle transitions.
//!
//! A window that needs to wait for another window (for example, for its
//! companion to pause before merging) subscribes here. Dropping the
//! [`Subscription`] unsubscribes.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Weak};

use multiwindow_registry::TaskId;
use parking_lot::Mutex;

use crate::types::LifecycleState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub task: TaskId,
    pub state: LifecycleState,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    subscribers: BTreeMap<u64, Sender<LifecycleEvent>>,
}

#[derive(Clone, Default)]
pub struct LifecycleBus {
    inner: Arc<Mutex<BusInner>>,
}

impl LifecycleBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, event: LifecycleEvent) {
        let mut inner = self.inner.lock();
        inner
            .subscribers
            .retain(|_, sender| sender.send(event).is_ok());
    }

    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel();
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.subscribers.insert(id, sender);
        Subscription {
            id,
            receiver,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

pub struct Subscription {
    id: u64,
    receiver: Receiver<LifecycleEvent>,
    bus: Weak<Mutex<BusInner>>,
}

impl Subscription {
    /// Events published since the last call, oldest first.
    pub fn drain(&self) -> Vec<LifecycleEvent> {
        self.receiver.try_iter().collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.lock().subscribers.remove(&self.id);
        }
    }
}
