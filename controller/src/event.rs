//! Turns Service watch notifications into keyed events for the work queue.

use crate::{queue::WorkQueue, snapshot::ResourceSnapshot};
use futures::prelude::*;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::watcher;
use std::{collections::HashMap, sync::Arc};
use tokio::time;

/// An observed transition of a Service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Create {
        current: ResourceSnapshot,
    },
    Update {
        previous: ResourceSnapshot,
        current: ResourceSnapshot,
    },
    Delete {
        snapshot: ResourceSnapshot,
    },
}

/// Keeps the last snapshot seen for each Service so that updates carry both
/// the previous and the current state.
pub struct Normalizer {
    queue: Arc<WorkQueue>,
    known: HashMap<String, ResourceSnapshot>,
}

// === impl Event ===

impl Event {
    pub fn key(&self) -> String {
        self.snapshot().key()
    }

    /// The most recent state carried by the event.
    pub fn snapshot(&self) -> &ResourceSnapshot {
        match self {
            Self::Create { current } | Self::Update { current, .. } => current,
            Self::Delete { snapshot } => snapshot,
        }
    }

    /// Folds a newer event for the same key into this one.
    ///
    /// The result keeps the oldest known previous state, since that is what the
    /// cluster currently reflects, and the newest current state.
    pub fn coalesce(self, newer: Event) -> Event {
        match (self, newer) {
            (Self::Create { .. }, Self::Create { current } | Self::Update { current, .. }) => {
                Self::Create { current }
            }
            (Self::Create { .. }, Self::Delete { snapshot }) => Self::Delete { snapshot },

            (
                Self::Update { previous, .. },
                Self::Create { current } | Self::Update { current, .. },
            ) => Self::Update { previous, current },
            (Self::Update { previous, .. }, Self::Delete { .. }) => {
                Self::Delete { snapshot: previous }
            }

            (
                Self::Delete { snapshot },
                Self::Create { current } | Self::Update { current, .. },
            ) => Self::Update {
                previous: snapshot,
                current,
            },
            (Self::Delete { snapshot }, Self::Delete { .. }) => Self::Delete { snapshot },
        }
    }
}

// === impl Normalizer ===

impl Normalizer {
    pub fn new(queue: Arc<WorkQueue>) -> Self {
        Self {
            queue,
            known: HashMap::new(),
        }
    }

    /// Feeds watch events into the queue until the stream ends, re-delivering
    /// every known Service each `resync` period.
    pub async fn process<S>(mut self, events: S, resync: time::Duration)
    where
        S: Stream<Item = watcher::Event<Service>>,
    {
        tokio::pin!(events);
        let mut resyncs = time::interval_at(time::Instant::now() + resync, resync);
        resyncs.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                ev = events.next() => match ev {
                    Some(ev) => self.handle(ev),
                    None => break,
                },
                _ = resyncs.tick() => self.resync(),
            }
        }

        tracing::debug!("service watch ended");
    }

    pub fn handle(&mut self, ev: watcher::Event<Service>) {
        match ev {
            watcher::Event::Applied(svc) => {
                if let Some(current) = snapshot(&svc) {
                    self.applied(current);
                }
            }

            watcher::Event::Deleted(svc) => {
                if let Some(snapshot) = snapshot(&svc) {
                    self.known.remove(&snapshot.key());
                    self.queue.add(Event::Delete { snapshot });
                }
            }

            watcher::Event::Restarted(svcs) => {
                let current = svcs.iter().filter_map(snapshot).collect::<Vec<_>>();
                let stale = self
                    .known
                    .keys()
                    .filter(|key| !current.iter().any(|s| &s.key() == *key))
                    .cloned()
                    .collect::<Vec<_>>();
                for key in stale {
                    if let Some(snapshot) = self.known.remove(&key) {
                        tracing::debug!(service = %key, "service removed while the watch restarted");
                        self.queue.add(Event::Delete { snapshot });
                    }
                }
                for snapshot in current {
                    self.applied(snapshot);
                }
            }
        }
    }

    /// Re-delivers every known Service as an update with no changes.
    pub fn resync(&self) {
        tracing::trace!(services = self.known.len(), "resyncing");
        for snapshot in self.known.values() {
            self.queue.add(Event::Update {
                previous: snapshot.clone(),
                current: snapshot.clone(),
            });
        }
    }

    fn applied(&mut self, current: ResourceSnapshot) {
        let event = match self.known.insert(current.key(), current.clone()) {
            Some(previous) => Event::Update { previous, current },
            None => Event::Create { current },
        };
        self.queue.add(event);
    }
}

fn snapshot(svc: &Service) -> Option<ResourceSnapshot> {
    let snapshot = ResourceSnapshot::from_service(svc);
    if snapshot.is_none() {
        tracing::warn!(
            name = ?svc.metadata.name,
            namespace = ?svc.metadata.namespace,
            "dropping service without a name or namespace"
        );
    }
    snapshot
}
