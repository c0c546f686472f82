//! Keyed, cancellable one-shot timers
//!
//! A firing is delivered as `(key, generation)` on the channel handed to
//! [`Timers::new`]. Re-arming a key cancels the previous timer and bumps the
//! generation, so a firing that raced with a cancel is recognised as stale by
//! [`Timers::take_if_current`].

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct Armed {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Set of pending timers keyed by `K`
pub struct Timers<K> {
    armed: HashMap<K, Armed>,
    next_generation: u64,
    fire_tx: mpsc::UnboundedSender<(K, u64)>,
}

impl<K> Timers<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    /// Create an empty timer set that reports firings on `fire_tx`
    pub fn new(fire_tx: mpsc::UnboundedSender<(K, u64)>) -> Self {
        Self {
            armed: HashMap::new(),
            next_generation: 0,
            fire_tx,
        }
    }

    /// Arm `key` to fire after `delay`, cancelling any timer already armed for it
    pub fn schedule(&mut self, key: K, delay: Duration) {
        self.cancel(&key);
        self.next_generation += 1;
        let generation = self.next_generation;
        let tx = self.fire_tx.clone();
        let fired = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send((fired, generation));
        });
        self.armed.insert(key, Armed { generation, handle });
    }

    /// Cancel the timer for `key`; returns whether one was armed
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.armed.remove(key) {
            Some(armed) => {
                armed.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Consume a firing; false when it was cancelled or superseded
    pub fn take_if_current(&mut self, key: &K, generation: u64) -> bool {
        match self.armed.get(key) {
            Some(armed) if armed.generation == generation => {
                self.armed.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Whether `key` currently has a timer armed
    #[must_use]
    pub fn is_armed(&self, key: &K) -> bool {
        self.armed.contains_key(key)
    }

    /// Number of armed timers
    #[must_use]
    pub fn len(&self) -> usize {
        self.armed.len()
    }

    /// Whether no timer is armed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    /// Cancel every timer
    pub fn cancel_all(&mut self) {
        for (_, armed) in self.armed.drain() {
            armed.handle.abort();
        }
    }
}

impl<K> Drop for Timers<K> {
    fn drop(&mut self) {
        for armed in self.armed.values() {
            armed.handle.abort();
        }
    }
}
