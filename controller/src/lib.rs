#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Exposes opted-in Services through Ingresses or Routes and records their
//! public hosts in a per-namespace registry.
//!
//! Service watch notifications are normalized into keyed [`Event`]s, queued
//! on a deduplicating [`WorkQueue`], and handed to [`Workers`] that run the
//! [`Reconciler`] with per-key retries.

pub mod config;
pub mod consts;
pub mod descriptor;
pub mod error;
pub mod event;
pub mod exposure;
pub mod ingress;
pub mod merge;
pub mod queue;
pub mod reconcile;
pub mod recorder;
pub mod registry;
pub mod route;
pub mod snapshot;
pub mod template;
pub mod worker;

pub use self::{
    config::{BaseConfig, ConfigError, Scope},
    descriptor::ExposureDescriptor,
    error::{Error, Result},
    event::{Event, Normalizer},
    exposure::{ExposureApi, ExposureKind},
    ingress::IngressApi,
    queue::{Backoff, WorkQueue},
    reconcile::Reconciler,
    recorder::EventRecorder,
    registry::{ConfigMapStore, RegistryStore, RegistrySync},
    route::RouteApi,
    snapshot::ResourceSnapshot,
    template::TemplateEngine,
    worker::{FailureSink, Reconcile, Workers},
};
