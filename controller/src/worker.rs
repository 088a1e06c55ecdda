use crate::{error::Error, event::Event, queue::WorkQueue};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Handles a single event.
#[async_trait::async_trait]
pub trait Reconcile: Send + Sync + 'static {
    async fn reconcile(&self, event: &Event) -> Result<(), Error>;
}

/// Told about events that were dropped after exhausting their retries.
#[async_trait::async_trait]
pub trait FailureSink: Send + Sync + 'static {
    async fn dropped(&self, event: &Event, error: &Error);
}

#[derive(Clone)]
pub struct Workers {
    queue: Arc<WorkQueue>,
    reconciler: Arc<dyn Reconcile>,
    failures: Arc<dyn FailureSink>,
    max_retries: u32,
}

impl Workers {
    pub fn new(
        queue: Arc<WorkQueue>,
        reconciler: Arc<dyn Reconcile>,
        failures: Arc<dyn FailureSink>,
        max_retries: u32,
    ) -> Self {
        Self {
            queue,
            reconciler,
            failures,
            max_retries,
        }
    }

    /// Spawns `count` workers. Each one exits once the queue shuts down.
    pub fn spawn(self, count: usize) -> Vec<JoinHandle<()>> {
        (0..count.max(1))
            .map(|id| {
                let worker = self.clone();
                tokio::spawn(worker.run().instrument(tracing::info_span!("worker", id)))
            })
            .collect()
    }

    pub async fn run(self) {
        while let Some(event) = self.queue.get().await {
            let key = event.key();
            self.process(event).instrument(tracing::debug_span!("reconcile", %key)).await;
            self.queue.done(&key);
        }
        tracing::debug!("work queue shut down");
    }

    async fn process(&self, event: Event) {
        let key = event.key();
        let error = match self.reconciler.reconcile(&event).await {
            Ok(()) => {
                self.queue.forget(&key);
                return;
            }
            Err(error) => error,
        };

        let requeues = self.queue.num_requeues(&key);
        if requeues < self.max_retries {
            tracing::warn!(%error, %requeues, "reconcile failed; retrying");
            self.queue.add_rate_limited(event);
            return;
        }

        self.queue.forget(&key);
        tracing::error!(%error, retries = %requeues, "dropping service from the queue");
        self.failures.dropped(&event, &error).await;
    }
}
