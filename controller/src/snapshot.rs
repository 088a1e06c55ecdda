use crate::consts::OPT_IN_LABEL;
use k8s_openapi::api::core::v1::Service;
use std::collections::BTreeMap;

/// The parts of a Service that exposure decisions depend on, captured when a
/// watch notification is observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceSnapshot {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub ports: Vec<i32>,
}

impl ResourceSnapshot {
    /// Returns `None` when the Service has no name or namespace.
    pub fn from_service(svc: &Service) -> Option<Self> {
        let name = svc.metadata.name.clone()?;
        let namespace = svc.metadata.namespace.clone()?;
        let ports = svc
            .spec
            .as_ref()
            .and_then(|spec| spec.ports.as_ref())
            .map(|ports| ports.iter().map(|p| p.port).collect())
            .unwrap_or_default();

        Some(Self {
            name,
            namespace,
            labels: svc.metadata.labels.clone().unwrap_or_default(),
            annotations: svc.metadata.annotations.clone().unwrap_or_default(),
            ports,
        })
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn is_opted_in(&self) -> bool {
        self.labels.get(OPT_IN_LABEL).map(String::as_str) == Some("true")
    }

    /// Builds a snapshot without a Service object.
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            ports: Vec::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn with_port(mut self, port: i32) -> Self {
        self.ports.push(port);
        self
    }

    pub fn exposed(self) -> Self {
        self.with_label(OPT_IN_LABEL, "true")
    }
}
