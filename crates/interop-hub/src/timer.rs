//! Cancellable deadlines keyed by entity.
//!
//! Each scheduled deadline is a spawned task that sleeps and then reports
//! `(key, generation)` on a channel. Rescheduling or cancelling aborts the task
//! and bumps the generation, so a firing that raced with cancellation is
//! recognised as stale by [`Timers::fire`].

use interop_core::{InstanceId, RequestId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    Heartbeat(InstanceId),
    Intent(RequestId),
}

/// A deadline that elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fired {
    pub key: TimerKey,
    generation: u64,
}

struct Entry {
    generation: u64,
    handle: AbortHandle,
}

pub struct Timers {
    tx: mpsc::UnboundedSender<Fired>,
    entries: HashMap<TimerKey, Entry>,
    next_generation: u64,
}

impl Timers {
    pub fn new(tx: mpsc::UnboundedSender<Fired>) -> Self {
        Self {
            tx,
            entries: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Arm (or re-arm) the deadline for `key`.
    pub fn schedule(&mut self, key: TimerKey, after: Duration) {
        self.cancel(key);
        self.next_generation += 1;
        let generation = self.next_generation;
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(Fired { key, generation });
        });
        self.entries.insert(
            key,
            Entry {
                generation,
                handle: task.abort_handle(),
            },
        );
    }

    /// Disarm the deadline for `key`. Returns whether one was armed.
    pub fn cancel(&mut self, key: TimerKey) -> bool {
        match self.entries.remove(&key) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Accept a firing if it is still current; returns the key to act on.
    pub fn fire(&mut self, fired: Fired) -> Option<TimerKey> {
        match self.entries.get(&fired.key) {
            Some(entry) if entry.generation == fired.generation => {
                self.entries.remove(&fired.key);
                Some(fired.key)
            }
            _ => None,
        }
    }

    pub fn is_armed(&self, key: TimerKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cancel_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.handle.abort();
        }
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
