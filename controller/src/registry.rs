//! Keeps the per-namespace registry of exposed hosts up to date.
//!
//! The registry is a ConfigMap whose data maps `<service>-<namespace>` to the
//! public host of that Service. Every change is a read-modify-write guarded by
//! the record's resource version; a conflicting write is retried against a
//! fresh read.

use crate::{
    config::Scope,
    consts::{self, REGISTRY_NAME},
    error::{self, Error, Result},
};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use kube::{
    api::{Api, ListParams, ObjectMeta, PostParams},
    Client, ResourceExt,
};
use std::{collections::BTreeMap, sync::Arc, time::Duration};

/// A registry record as read from the cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistryRecord {
    pub namespace: String,
    pub entries: BTreeMap<String, String>,
    pub resource_version: Option<String>,
}

/// Storage for registry records.
#[async_trait::async_trait]
pub trait RegistryStore: Send + Sync + 'static {
    async fn namespaces(&self) -> Result<Vec<String>>;

    async fn get(&self, namespace: &str) -> Result<Option<RegistryRecord>>;

    /// Fails with [`Error::Conflict`] if the record already exists.
    async fn create(&self, namespace: &str, entries: BTreeMap<String, String>) -> Result<()>;

    /// Fails with [`Error::Conflict`] if the record changed since it was read.
    async fn replace(&self, record: RegistryRecord) -> Result<()>;
}

#[derive(Clone)]
pub struct RegistrySync {
    store: Arc<dyn RegistryStore>,
    max_attempts: usize,
}

/// A [`RegistryStore`] backed by ConfigMaps.
#[derive(Clone)]
pub struct ConfigMapStore {
    client: Client,
    timeout: Duration,
}

enum Change<'a> {
    Set { key: &'a str, host: &'a str },
    Remove { key: &'a str },
}

// === impl RegistrySync ===

impl RegistrySync {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self {
            store,
            max_attempts: 5,
        }
    }

    /// Records `key -> host` in `namespace` or, for [`Scope::Global`], in every
    /// namespace.
    pub async fn populate(&self, scope: Scope, namespace: &str, key: &str, host: &str) -> Result<()> {
        for ns in self.targets(scope, namespace).await? {
            self.apply(&ns, Change::Set { key, host }).await?;
        }
        Ok(())
    }

    /// Removes `key` from `namespace` or, for [`Scope::Global`], from every
    /// namespace. Namespaces without a registry are skipped.
    pub async fn remove(&self, scope: Scope, namespace: &str, key: &str) -> Result<()> {
        for ns in self.targets(scope, namespace).await? {
            self.apply(&ns, Change::Remove { key }).await?;
        }
        Ok(())
    }

    async fn targets(&self, scope: Scope, namespace: &str) -> Result<Vec<String>> {
        match scope {
            Scope::Local => Ok(vec![namespace.to_string()]),
            Scope::Global => self.store.namespaces().await,
        }
    }

    #[tracing::instrument(skip(self, change), fields(registry = REGISTRY_NAME))]
    async fn apply(&self, namespace: &str, change: Change<'_>) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_apply(namespace, &change).await {
                Err(Error::Conflict { .. }) if attempt < self.max_attempts => {
                    tracing::debug!(%attempt, "registry changed concurrently; retrying");
                }
                res => return res,
            }
        }
    }

    async fn try_apply(&self, namespace: &str, change: &Change<'_>) -> Result<()> {
        let record = self.store.get(namespace).await?;
        match (record, change) {
            (None, Change::Remove { .. }) => Ok(()),

            (None, Change::Set { key, host }) => {
                let entries = BTreeMap::from([(key.to_string(), host.to_string())]);
                self.store.create(namespace, entries).await?;
                tracing::info!(%key, %host, "created registry");
                Ok(())
            }

            (Some(mut record), Change::Set { key, host }) => {
                if record.entries.get(*key).map(String::as_str) == Some(*host) {
                    return Ok(());
                }
                record.entries.insert(key.to_string(), host.to_string());
                self.store.replace(record).await?;
                tracing::info!(%key, %host, "updated registry");
                Ok(())
            }

            (Some(mut record), Change::Remove { key }) => {
                if record.entries.remove(*key).is_none() {
                    return Ok(());
                }
                self.store.replace(record).await?;
                tracing::info!(%key, "removed registry entry");
                Ok(())
            }
        }
    }
}

// === impl ConfigMapStore ===

impl ConfigMapStore {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn api(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl RegistryStore for ConfigMapStore {
    async fn namespaces(&self) -> Result<Vec<String>> {
        let api = Api::<Namespace>::all(self.client.clone());
        let list = error::with_timeout(
            "list namespaces",
            self.timeout,
            api.list(&ListParams::default()),
        )
        .await?;
        Ok(list.items.iter().map(|ns| ns.name_any()).collect())
    }

    async fn get(&self, namespace: &str) -> Result<Option<RegistryRecord>> {
        let api = self.api(namespace);
        let cm = error::with_timeout("get registry", self.timeout, api.get_opt(REGISTRY_NAME)).await?;
        Ok(cm.map(|cm| RegistryRecord {
            namespace: namespace.to_string(),
            resource_version: cm.resource_version(),
            entries: cm.data.unwrap_or_default(),
        }))
    }

    async fn create(&self, namespace: &str, entries: BTreeMap<String, String>) -> Result<()> {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(REGISTRY_NAME.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([(
                    consts::MANAGED_BY_LABEL.to_string(),
                    consts::MANAGED_BY_VALUE.to_string(),
                )])),
                ..Default::default()
            },
            data: Some(entries),
            ..Default::default()
        };
        let api = self.api(namespace);
        let params = PostParams::default();
        match error::with_timeout("create registry", self.timeout, api.create(&params, &cm)).await {
            Err(Error::Kube(e)) if error::is_conflict(&e) => Err(conflict(namespace)),
            res => res.map(|_| ()),
        }
    }

    async fn replace(&self, record: RegistryRecord) -> Result<()> {
        let api = self.api(&record.namespace);
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(REGISTRY_NAME.to_string()),
                namespace: Some(record.namespace.clone()),
                resource_version: record.resource_version,
                labels: Some(BTreeMap::from([(
                    consts::MANAGED_BY_LABEL.to_string(),
                    consts::MANAGED_BY_VALUE.to_string(),
                )])),
                ..Default::default()
            },
            data: Some(record.entries),
            ..Default::default()
        };
        let params = PostParams::default();
        let replace = api.replace(REGISTRY_NAME, &params, &cm);
        match error::with_timeout("replace registry", self.timeout, replace).await {
            Err(Error::Kube(e)) if error::is_conflict(&e) => Err(conflict(&record.namespace)),
            res => res.map(|_| ()),
        }
    }
}

fn conflict(namespace: &str) -> Error {
    Error::Conflict {
        namespace: namespace.to_string(),
        name: REGISTRY_NAME.to_string(),
    }
}
