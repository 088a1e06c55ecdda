//! A keyed, deduplicating work queue with per-key exponential backoff.
//!
//! Events are queued by key. While a key is waiting, further events for it
//! are coalesced into the waiting one; while a key is being processed, new
//! events are held back until [`WorkQueue::done`] is called, so no two workers
//! ever handle the same key at once and events for a key are handled in the
//! order they were observed.

use crate::event::Event;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::{sync::Notify, time};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub base: time::Duration,
    pub max: time::Duration,
}

pub struct WorkQueue {
    state: Mutex<State>,
    ready: Notify,
    backoff: Backoff,
}

#[derive(Default)]
struct State {
    /// Keys ready to be handed to a worker.
    queue: VecDeque<String>,
    /// The event waiting for each key that is queued or being processed.
    pending: HashMap<String, Event>,
    /// Keys handed to a worker, with the generation of the event handed out.
    processing: HashMap<String, u64>,
    requeues: HashMap<String, u32>,
    /// Bumped on every `add`, so a delayed retry can tell whether it was
    /// superseded by a newer event.
    generations: HashMap<String, u64>,
    shutting_down: bool,
}

// === impl Backoff ===

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: time::Duration::from_millis(5),
            max: time::Duration::from_secs(1000),
        }
    }
}

impl Backoff {
    /// The delay before retry number `requeues + 1`.
    pub fn delay(&self, requeues: u32) -> time::Duration {
        let factor = 2u32.checked_pow(requeues).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

// === impl WorkQueue ===

impl WorkQueue {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: Mutex::default(),
            ready: Notify::new(),
            backoff,
        }
    }

    pub fn add(&self, event: Event) {
        let mut state = self.lock();
        if state.shutting_down {
            return;
        }
        let key = event.key();
        *state.generations.entry(key.clone()).or_default() += 1;
        self.enqueue(&mut state, key, event, false);
    }

    /// Waits for the next event. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<Event> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                while let Some(key) = state.queue.pop_front() {
                    if let Some(event) = state.pending.remove(&key) {
                        let generation = state.generations.get(&key).copied().unwrap_or(0);
                        state.processing.insert(key, generation);
                        return Some(event);
                    }
                }
            }

            notified.await;
        }
    }

    /// Releases `key` after processing. An event that arrived meanwhile is
    /// queued again.
    pub fn done(&self, key: &str) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.pending.contains_key(key) {
            state.queue.push_back(key.to_string());
            drop(state);
            self.ready.notify_one();
        }
    }

    /// Clears the retry history of `key`.
    pub fn forget(&self, key: &str) {
        self.lock().requeues.remove(key);
    }

    pub fn num_requeues(&self, key: &str) -> u32 {
        self.lock().requeues.get(key).copied().unwrap_or(0)
    }

    /// Queues `event` again after a delay that grows with each retry of its
    /// key.
    ///
    /// The retry is stamped with the generation of the event that was handed
    /// out, so any event added after it, even one added while it was being
    /// processed, supersedes the retry.
    pub fn add_rate_limited(self: &Arc<Self>, event: Event) {
        let key = event.key();
        let (delay, generation) = {
            let mut state = self.lock();
            let generation = match state.processing.get(&key) {
                Some(generation) => *generation,
                None => state.generations.get(&key).copied().unwrap_or(0),
            };
            let requeues = state.requeues.entry(key.clone()).or_default();
            let delay = self.backoff.delay(*requeues);
            *requeues += 1;
            (delay, generation)
        };

        tracing::debug!(%key, ?delay, "requeueing");
        let queue = self.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            queue.retry(key, event, generation);
        });
    }

    /// Stops handing out events; blocked and future `get` calls return `None`.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.ready.notify_waiters();
    }

    /// The number of keys waiting for a worker.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn retry(&self, key: String, event: Event, generation: u64) {
        let mut state = self.lock();
        if state.shutting_down {
            return;
        }
        let current = state.generations.get(&key).copied().unwrap_or(0);
        if current != generation && !state.pending.contains_key(&key) {
            tracing::debug!(%key, "dropping retry superseded by a newer event");
            return;
        }
        self.enqueue(&mut state, key, event, true);
    }

    /// `older` events are folded in front of a pending one rather than after it.
    fn enqueue(&self, state: &mut State, key: String, event: Event, older: bool) {
        let event = match state.pending.remove(&key) {
            Some(pending) if older => event.coalesce(pending),
            Some(pending) => pending.coalesce(event),
            None => {
                if !state.processing.contains_key(&key) {
                    state.queue.push_back(key.clone());
                    self.ready.notify_one();
                }
                event
            }
        };
        state.pending.insert(key, event);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // No update spans a panic point, so a poisoned state is still valid.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
