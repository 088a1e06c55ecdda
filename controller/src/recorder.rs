use crate::{error::Error, event::Event, worker::FailureSink};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events;

const CONTROLLER: &str = "exposer";

/// Publishes a `Warning` event on a Service whose exposure could not be
/// reconciled.
#[derive(Clone)]
pub struct EventRecorder {
    client: kube::Client,
}

impl EventRecorder {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl FailureSink for EventRecorder {
    async fn dropped(&self, event: &Event, error: &Error) {
        let snapshot = event.snapshot();
        let reference = ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Service".to_string()),
            name: Some(snapshot.name.clone()),
            namespace: Some(snapshot.namespace.clone()),
            ..Default::default()
        };
        let reporter = events::Reporter {
            controller: CONTROLLER.to_string(),
            instance: None,
        };
        let recorder = events::Recorder::new(self.client.clone(), reporter, reference);
        let res = recorder
            .publish(events::Event {
                type_: events::EventType::Warning,
                reason: "ExposeFailed".to_string(),
                note: Some(error.to_string()),
                action: "Reconcile".to_string(),
                secondary: None,
            })
            .await;
        if let Err(error) = res {
            tracing::error!(%error, service = %event.key(), "failed to record event");
        }
    }
}
