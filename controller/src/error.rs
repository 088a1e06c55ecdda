use crate::template::TemplateError;
use std::{future::Future, time::Duration};
use tokio::time;

/// Errors that fail a single reconciliation. All of them are retried by the
/// worker pool.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("service {namespace}/{name} declares no ports")]
    NoPorts { namespace: String, name: String },

    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error("{op} timed out after {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },

    #[error("{namespace}/{name} was modified concurrently")]
    Conflict { namespace: String, name: String },

    #[error("{host}{path} in {namespace} is already exposed for service {owner}")]
    Collision {
        namespace: String,
        host: String,
        path: String,
        owner: String,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Bounds a downstream API call by `timeout`.
pub(crate) async fn with_timeout<T, F>(op: &'static str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T, kube::Error>>,
{
    match time::timeout(timeout, fut).await {
        Ok(res) => res.map_err(Error::from),
        Err(_) => Err(Error::Timeout { op, timeout }),
    }
}

pub(crate) fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(rsp) if rsp.code == 404)
}

pub(crate) fn is_conflict(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(rsp) if rsp.code == 409)
}
