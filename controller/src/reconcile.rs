//! Decides what a Service event means for its exposure object and registry
//! entry, and carries it out.

use crate::{
    config::BaseConfig,
    descriptor::{self, ExposureDescriptor},
    error::{Error, Result},
    event::Event,
    exposure::ExposureApi,
    registry::RegistrySync,
    snapshot::ResourceSnapshot,
    template::TemplateEngine,
    worker::Reconcile,
};
use std::sync::Arc;

pub struct Reconciler {
    base: Arc<BaseConfig>,
    engine: TemplateEngine,
    exposures: Arc<dyn ExposureApi>,
    registry: RegistrySync,
}

impl Reconciler {
    pub fn new(
        base: Arc<BaseConfig>,
        engine: TemplateEngine,
        exposures: Arc<dyn ExposureApi>,
        registry: RegistrySync,
    ) -> Self {
        Self {
            base,
            engine,
            exposures,
            registry,
        }
    }

    fn resolve(&self, snapshot: &ResourceSnapshot) -> Result<ExposureDescriptor> {
        ExposureDescriptor::resolve(snapshot, &self.base, &self.engine)
    }

    /// Resolves a state the cluster already reflects. When it no longer
    /// resolves, the objects it left behind are found by their service label.
    fn resolve_existing(&self, snapshot: &ResourceSnapshot) -> Option<ExposureDescriptor> {
        match self.resolve(snapshot) {
            Ok(desc) => Some(desc),
            Err(error) => {
                tracing::debug!(%error, "previous state does not resolve");
                None
            }
        }
    }

    async fn expose(&self, current: &ResourceSnapshot) -> Result<()> {
        let desc = self.resolve(current)?;
        self.check_collision(&desc).await?;
        self.exposures.create(&desc).await?;
        self.registry
            .populate(desc.scope, &desc.namespace, &desc.registry_key(), &desc.host)
            .await
    }

    async fn withdraw(&self, previous: &ResourceSnapshot) -> Result<()> {
        match self.resolve_existing(previous) {
            Some(desc) => self.exposures.delete(&desc.namespace, &desc.name).await?,
            None => self.delete_owned(previous, None).await?,
        }
        let scope = descriptor::scope(previous, self.base.scope);
        let key = descriptor::registry_key(&previous.name, &previous.namespace);
        self.registry.remove(scope, &previous.namespace, &key).await
    }

    /// Deletes every managed object of the Service except `keep`.
    async fn delete_owned(&self, snapshot: &ResourceSnapshot, keep: Option<&str>) -> Result<()> {
        let names = self
            .exposures
            .owned(&snapshot.namespace, &snapshot.name)
            .await?;
        for name in names.iter().filter(|name| Some(name.as_str()) != keep) {
            self.exposures.delete(&snapshot.namespace, name).await?;
        }
        Ok(())
    }

    /// Recreates the exposure object if it went missing.
    async fn ensure(&self, current: &ResourceSnapshot) -> Result<()> {
        let desc = self.resolve(current)?;
        if self.exposures.exists(&desc.namespace, &desc.name).await? {
            return Ok(());
        }
        tracing::info!(kind = %self.exposures.kind(), name = %desc.name, "recreating missing exposure");
        self.check_collision(&desc).await?;
        self.exposures.create(&desc).await?;
        self.registry
            .populate(desc.scope, &desc.namespace, &desc.registry_key(), &desc.host)
            .await
    }

    async fn change(&self, previous: &ResourceSnapshot, current: &ResourceSnapshot) -> Result<()> {
        let desc = self.resolve(current)?;
        let old = match self.resolve_existing(previous) {
            Some(old) if old.name == desc.name => old,
            Some(old) => {
                tracing::info!(from = %old.name, to = %desc.name, "exposure renamed");
                self.exposures.delete(&old.namespace, &old.name).await?;
                self.registry
                    .remove(old.scope, &old.namespace, &old.registry_key())
                    .await?;
                return self.expose(current).await;
            }
            None => {
                self.delete_owned(previous, Some(&desc.name)).await?;
                return self.expose(current).await;
            }
        };

        self.check_collision(&desc).await?;
        self.exposures.update(&desc).await?;
        if old.scope != desc.scope {
            self.registry
                .remove(old.scope, &old.namespace, &old.registry_key())
                .await?;
        }
        self.registry
            .populate(desc.scope, &desc.namespace, &desc.registry_key(), &desc.host)
            .await
    }

    /// Fails if another Service's managed object already serves the same host
    /// and path.
    async fn check_collision(&self, desc: &ExposureDescriptor) -> Result<()> {
        match self
            .exposures
            .owner(&desc.namespace, &desc.host, &desc.path)
            .await?
        {
            Some(owner) if owner != desc.service => Err(Error::Collision {
                namespace: desc.namespace.clone(),
                host: desc.host.clone(),
                path: desc.path.clone(),
                owner,
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Reconcile for Reconciler {
    async fn reconcile(&self, event: &Event) -> Result<()> {
        match event {
            Event::Create { current } if current.is_opted_in() => self.expose(current).await,
            Event::Create { .. } => Ok(()),

            Event::Delete { snapshot } if snapshot.is_opted_in() => self.withdraw(snapshot).await,
            Event::Delete { .. } => Ok(()),

            Event::Update { previous, current } => {
                match (previous.is_opted_in(), current.is_opted_in()) {
                    (false, false) => Ok(()),
                    (false, true) => self.expose(current).await,
                    (true, false) => self.withdraw(previous).await,
                    (true, true) if previous == current => self.ensure(current).await,
                    (true, true) => self.change(previous, current).await,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Scope,
        consts::{CONFIG_ANNOTATION_PREFIX, FORWARD_ANNOTATION},
        exposure::ExposureKind,
        registry::tests::MemoryStore,
    };
    use std::{collections::BTreeMap, sync::Mutex};

    /// Exposure objects keyed by namespace and name.
    #[derive(Default)]
    struct Objects {
        objects: Mutex<BTreeMap<(String, String), ExposureDescriptor>>,
        calls: Mutex<Vec<String>>,
    }

    impl Objects {
        fn get(&self, namespace: &str, name: &str) -> Option<ExposureDescriptor> {
            let objects = self.objects.lock().unwrap();
            objects
                .get(&(namespace.to_string(), name.to_string()))
                .cloned()
        }

        fn len(&self) -> usize {
            self.objects.lock().unwrap().len()
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn put(&self, desc: &ExposureDescriptor) {
            self.objects.lock().unwrap().insert(
                (desc.namespace.clone(), desc.name.clone()),
                desc.clone(),
            );
        }
    }

    #[async_trait::async_trait]
    impl ExposureApi for Objects {
        fn kind(&self) -> ExposureKind {
            ExposureKind::Ingress
        }

        async fn exists(&self, namespace: &str, name: &str) -> Result<bool> {
            Ok(self.get(namespace, name).is_some())
        }

        async fn create(&self, desc: &ExposureDescriptor) -> Result<()> {
            self.record(format!("create {}", desc.name));
            self.put(desc);
            Ok(())
        }

        async fn update(&self, desc: &ExposureDescriptor) -> Result<()> {
            self.record(format!("update {}", desc.name));
            self.put(desc);
            Ok(())
        }

        async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
            self.record(format!("delete {name}"));
            self.objects
                .lock()
                .unwrap()
                .remove(&(namespace.to_string(), name.to_string()));
            Ok(())
        }

        async fn owned(&self, namespace: &str, service: &str) -> Result<Vec<String>> {
            let objects = self.objects.lock().unwrap();
            Ok(objects
                .values()
                .filter(|d| d.namespace == namespace && d.service == service)
                .map(|d| d.name.clone())
                .collect())
        }

        async fn owner(&self, namespace: &str, host: &str, path: &str) -> Result<Option<String>> {
            let objects = self.objects.lock().unwrap();
            Ok(objects
                .values()
                .find(|d| d.namespace == namespace && d.host == host && d.path == path)
                .map(|d| d.service.clone()))
        }
    }

    struct Fixture {
        objects: Arc<Objects>,
        store: Arc<MemoryStore>,
        reconciler: Reconciler,
    }

    fn fixture() -> Fixture {
        let mut base = BaseConfig::new("example.com");
        base.host_template = "{{.Service}}.{{.Domain}}".to_string();
        let objects = Arc::new(Objects::default());
        let store = Arc::new(MemoryStore::with_namespaces(&["team-a", "team-b"]));
        let reconciler = Reconciler::new(
            Arc::new(base),
            TemplateEngine::new(),
            objects.clone(),
            RegistrySync::new(store.clone()),
        );
        Fixture {
            objects,
            store,
            reconciler,
        }
    }

    fn api() -> ResourceSnapshot {
        ResourceSnapshot::new("api", "team-a").exposed().with_port(8080)
    }

    fn hidden() -> ResourceSnapshot {
        ResourceSnapshot::new("api", "team-a").with_port(8080)
    }

    fn registry(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn create_exposes_service() {
        let f = fixture();
        f.reconciler
            .reconcile(&Event::Create { current: api() })
            .await
            .unwrap();

        let desc = f.objects.get("team-a", "api").unwrap();
        assert_eq!(desc.host, "api.example.com");
        assert_eq!(desc.path, "/");
        assert_eq!(desc.port, 8080);
        assert_eq!(
            f.store.entries("team-a").unwrap(),
            registry(&[("api-team-a", "api.example.com")])
        );
    }

    #[tokio::test]
    async fn create_without_opt_in_does_nothing() {
        let f = fixture();
        f.reconciler
            .reconcile(&Event::Create { current: hidden() })
            .await
            .unwrap();
        assert!(f.objects.calls().is_empty());
        assert!(f.store.entries("team-a").is_none());
    }

    #[tokio::test]
    async fn opting_in_exposes_service() {
        let f = fixture();
        let event = Event::Update {
            previous: hidden(),
            current: api(),
        };
        f.reconciler.reconcile(&event).await.unwrap();
        assert_eq!(f.objects.calls(), vec!["create api"]);
        assert_eq!(f.store.entries("team-a").unwrap()["api-team-a"], "api.example.com");
    }

    #[tokio::test]
    async fn opting_out_withdraws_service() {
        let f = fixture();
        f.reconciler
            .reconcile(&Event::Create { current: api() })
            .await
            .unwrap();
        let event = Event::Update {
            previous: api(),
            current: hidden(),
        };
        f.reconciler.reconcile(&event).await.unwrap();

        assert_eq!(f.objects.len(), 0);
        assert!(f.store.entries("team-a").unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_without_opt_in_does_nothing() {
        let f = fixture();
        let event = Event::Update {
            previous: hidden(),
            current: hidden().with_annotation("color", "blue"),
        };
        f.reconciler.reconcile(&event).await.unwrap();
        assert!(f.objects.calls().is_empty());
    }

    #[tokio::test]
    async fn resync_recreates_missing_object() {
        let f = fixture();
        let resync = Event::Update {
            previous: api(),
            current: api(),
        };
        f.reconciler.reconcile(&resync).await.unwrap();
        assert_eq!(f.objects.calls(), vec!["create api"]);
        assert_eq!(f.store.entries("team-a").unwrap()["api-team-a"], "api.example.com");

        f.reconciler.reconcile(&resync).await.unwrap();
        assert_eq!(f.objects.calls(), vec!["create api"]);
    }

    #[tokio::test]
    async fn host_change_updates_in_place() {
        let f = fixture();
        f.reconciler
            .reconcile(&Event::Create { current: api() })
            .await
            .unwrap();

        let changed = api().with_annotation(
            format!("{CONFIG_ANNOTATION_PREFIX}host-template"),
            "{{.Service}}.internal.{{.Domain}}",
        );
        let event = Event::Update {
            previous: api(),
            current: changed,
        };
        f.reconciler.reconcile(&event).await.unwrap();

        assert_eq!(f.objects.calls(), vec!["create api", "update api"]);
        assert_eq!(
            f.objects.get("team-a", "api").unwrap().host,
            "api.internal.example.com"
        );
        assert_eq!(
            f.store.entries("team-a").unwrap(),
            registry(&[("api-team-a", "api.internal.example.com")])
        );
    }

    #[tokio::test]
    async fn scope_change_moves_registry_entries() {
        let f = fixture();
        let global = api().with_annotation(FORWARD_ANNOTATION, "exposer.io/scope: global");
        f.reconciler
            .reconcile(&Event::Create {
                current: global.clone(),
            })
            .await
            .unwrap();
        assert_eq!(f.store.entries("team-b").unwrap()["api-team-a"], "api.example.com");

        let event = Event::Update {
            previous: global,
            current: api(),
        };
        f.reconciler.reconcile(&event).await.unwrap();

        assert!(f.store.entries("team-b").unwrap().is_empty());
        assert_eq!(
            f.store.entries("team-a").unwrap(),
            registry(&[("api-team-a", "api.example.com")])
        );
        assert_eq!(f.objects.get("team-a", "api").unwrap().scope, Scope::Local);
    }

    #[tokio::test]
    async fn rename_replaces_object() {
        let f = fixture();
        f.reconciler
            .reconcile(&Event::Create { current: api() })
            .await
            .unwrap();

        let renamed = api().with_annotation(
            format!("{CONFIG_ANNOTATION_PREFIX}name-template"),
            "{{.Service}}-public",
        );
        let event = Event::Update {
            previous: api(),
            current: renamed,
        };
        f.reconciler.reconcile(&event).await.unwrap();

        assert_eq!(
            f.objects.calls(),
            vec!["create api", "delete api", "create api-public"]
        );
        assert!(f.objects.get("team-a", "api").is_none());
        assert!(f.objects.get("team-a", "api-public").is_some());
        assert_eq!(
            f.store.entries("team-a").unwrap(),
            registry(&[("api-team-a", "api.example.com")])
        );
    }

    fn broken(snapshot: ResourceSnapshot) -> ResourceSnapshot {
        snapshot.with_annotation(
            format!("{CONFIG_ANNOTATION_PREFIX}name-template"),
            "{{.Cluster}}",
        )
    }

    #[tokio::test]
    async fn opting_out_with_broken_template_withdraws_service() {
        let f = fixture();
        f.reconciler
            .reconcile(&Event::Create { current: api() })
            .await
            .unwrap();

        let err = f
            .reconciler
            .reconcile(&Event::Update {
                previous: api(),
                current: broken(api()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Template(_)));
        assert!(f.objects.get("team-a", "api").is_some());

        f.reconciler
            .reconcile(&Event::Update {
                previous: broken(api()),
                current: broken(hidden()),
            })
            .await
            .unwrap();
        assert_eq!(f.objects.len(), 0);
        assert!(f.store.entries("team-a").unwrap().is_empty());

        let resync = Event::Update {
            previous: broken(hidden()),
            current: broken(hidden()),
        };
        f.reconciler.reconcile(&resync).await.unwrap();
        assert_eq!(f.objects.len(), 0);
    }

    #[tokio::test]
    async fn deleting_service_without_ports_withdraws_it() {
        let f = fixture();
        f.reconciler
            .reconcile(&Event::Create { current: api() })
            .await
            .unwrap();

        let portless = ResourceSnapshot::new("api", "team-a").exposed();
        f.reconciler
            .reconcile(&Event::Delete { snapshot: portless })
            .await
            .unwrap();
        assert_eq!(f.objects.len(), 0);
        assert!(f.store.entries("team-a").unwrap().is_empty());
    }

    #[tokio::test]
    async fn recovering_from_broken_template_replaces_stale_object() {
        let f = fixture();
        f.reconciler
            .reconcile(&Event::Create { current: api() })
            .await
            .unwrap();

        let renamed = api().with_annotation(
            format!("{CONFIG_ANNOTATION_PREFIX}name-template"),
            "{{.Service}}-public",
        );
        f.reconciler
            .reconcile(&Event::Update {
                previous: broken(api()),
                current: renamed,
            })
            .await
            .unwrap();

        assert!(f.objects.get("team-a", "api").is_none());
        assert!(f.objects.get("team-a", "api-public").is_some());
        assert_eq!(f.objects.len(), 1);
    }

    #[tokio::test]
    async fn delete_withdraws_opted_in_service() {
        let f = fixture();
        f.store.seed("team-a", &[("web-team-a", "web.example.com")]);
        f.reconciler
            .reconcile(&Event::Create { current: api() })
            .await
            .unwrap();
        f.reconciler
            .reconcile(&Event::Delete { snapshot: api() })
            .await
            .unwrap();

        assert_eq!(f.objects.len(), 0);
        assert_eq!(
            f.store.entries("team-a").unwrap(),
            registry(&[("web-team-a", "web.example.com")])
        );
    }

    #[tokio::test]
    async fn delete_without_opt_in_does_nothing() {
        let f = fixture();
        f.reconciler
            .reconcile(&Event::Delete { snapshot: hidden() })
            .await
            .unwrap();
        assert!(f.objects.calls().is_empty());
    }

    #[tokio::test]
    async fn colliding_host_is_rejected() {
        let f = fixture();
        f.reconciler
            .reconcile(&Event::Create { current: api() })
            .await
            .unwrap();

        let web = ResourceSnapshot::new("web", "team-a")
            .exposed()
            .with_port(80)
            .with_annotation(
                format!("{CONFIG_ANNOTATION_PREFIX}host-template"),
                "api.{{.Domain}}",
            );
        let err = f
            .reconciler
            .reconcile(&Event::Create { current: web })
            .await
            .unwrap_err();

        match err {
            Error::Collision { owner, host, .. } => {
                assert_eq!(owner, "api");
                assert_eq!(host, "api.example.com");
            }
            error => panic!("unexpected error: {error}"),
        }
        assert!(f.objects.get("team-a", "web").is_none());
    }

    #[tokio::test]
    async fn service_without_ports_fails() {
        let f = fixture();
        let current = ResourceSnapshot::new("api", "team-a").exposed();
        let err = f
            .reconciler
            .reconcile(&Event::Create { current })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoPorts { .. }));
    }
}
