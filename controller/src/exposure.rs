use crate::{
    consts::{self, FIELD_MANAGER, MANAGED_BY_LABEL, MANAGED_BY_VALUE, SERVICE_LABEL},
    descriptor::ExposureDescriptor,
    error::Result,
};
use kube::api::PatchParams;
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Creates, updates and deletes the objects that expose Services.
#[async_trait::async_trait]
pub trait ExposureApi: Send + Sync + 'static {
    fn kind(&self) -> ExposureKind;

    async fn exists(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Creates the object, or brings an existing object with the same name in
    /// line with `desc`.
    async fn create(&self, desc: &ExposureDescriptor) -> Result<()>;

    async fn update(&self, desc: &ExposureDescriptor) -> Result<()>;

    /// Deleting an object that does not exist succeeds.
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;

    /// Names of the managed objects in `namespace` labelled as belonging to
    /// `service`.
    async fn owned(&self, namespace: &str, service: &str) -> Result<Vec<String>>;

    /// Returns the Service whose managed object already serves `host` and
    /// `path` in `namespace`, if any.
    async fn owner(&self, namespace: &str, host: &str, path: &str) -> Result<Option<String>>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExposureKind {
    Ingress,
    Route,
}

/// Server-side apply under the controller's field manager, for creates and
/// updates alike.
pub(crate) fn apply_params() -> PatchParams {
    PatchParams::apply(FIELD_MANAGER).force()
}

/// Selects the managed objects of one Service.
pub(crate) fn service_selector(service: &str) -> String {
    format!("{},{}={}", consts::managed_selector(), SERVICE_LABEL, service)
}

/// Labels set on every generated object.
pub(crate) fn labels(desc: &ExposureDescriptor) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (SERVICE_LABEL.to_string(), desc.service.clone()),
    ])
}

// === impl ExposureKind ===

impl FromStr for ExposureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingress" => Ok(Self::Ingress),
            "route" => Ok(Self::Route),
            _ => Err(format!("unknown exposure kind {s:?}")),
        }
    }
}

impl fmt::Display for ExposureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingress => f.write_str("Ingress"),
            Self::Route => f.write_str("Route"),
        }
    }
}
