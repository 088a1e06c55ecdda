use crate::{
    consts::{self, SERVICE_LABEL},
    descriptor::ExposureDescriptor,
    error::{self, Error, Result},
    exposure::{self, ExposureApi, ExposureKind},
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use kube::{
    api::{Api, DeleteParams, ListParams, ObjectMeta, Patch},
    Client, ResourceExt,
};
use std::time::Duration;

/// Exposes Services through `networking.k8s.io/v1` Ingresses.
#[derive(Clone)]
pub struct IngressApi {
    client: Client,
    timeout: Duration,
}

impl IngressApi {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn api(&self, namespace: &str) -> Api<Ingress> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn apply(&self, desc: &ExposureDescriptor) -> Result<()> {
        let api = self.api(&desc.namespace);
        let ingress = mk_ingress(desc);
        let params = exposure::apply_params();
        let patch = Patch::Apply(&ingress);
        let apply = api.patch(&desc.name, &params, &patch);
        error::with_timeout("apply ingress", self.timeout, apply).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ExposureApi for IngressApi {
    fn kind(&self) -> ExposureKind {
        ExposureKind::Ingress
    }

    async fn exists(&self, namespace: &str, name: &str) -> Result<bool> {
        let api = self.api(namespace);
        let ingress = error::with_timeout("get ingress", self.timeout, api.get_opt(name)).await?;
        Ok(ingress.is_some())
    }

    async fn create(&self, desc: &ExposureDescriptor) -> Result<()> {
        self.apply(desc).await?;
        tracing::info!(ingress = %desc.name, host = %desc.host, "applied ingress");
        Ok(())
    }

    async fn update(&self, desc: &ExposureDescriptor) -> Result<()> {
        self.apply(desc).await?;
        tracing::info!(ingress = %desc.name, host = %desc.host, "updated ingress");
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let api = self.api(namespace);
        let params = DeleteParams::default();
        match error::with_timeout("delete ingress", self.timeout, api.delete(name, &params)).await {
            Ok(_) => {
                tracing::info!(ingress = %name, "deleted ingress");
                Ok(())
            }
            Err(Error::Kube(e)) if error::is_not_found(&e) => Ok(()),
            Err(error) => Err(error),
        }
    }

    async fn owned(&self, namespace: &str, service: &str) -> Result<Vec<String>> {
        let api = self.api(namespace);
        let params = ListParams::default().labels(&exposure::service_selector(service));
        let list = error::with_timeout("list ingresses", self.timeout, api.list(&params)).await?;
        Ok(list.items.iter().map(|ing| ing.name_any()).collect())
    }

    async fn owner(&self, namespace: &str, host: &str, path: &str) -> Result<Option<String>> {
        let api = self.api(namespace);
        let params = ListParams::default().labels(&consts::managed_selector());
        let list = error::with_timeout("list ingresses", self.timeout, api.list(&params)).await?;
        Ok(list
            .items
            .iter()
            .find(|ing| serves(ing, host, path))
            .and_then(|ing| ing.labels().get(SERVICE_LABEL).cloned()))
    }
}

fn serves(ingress: &Ingress, host: &str, path: &str) -> bool {
    ingress
        .spec
        .iter()
        .flat_map(|spec| spec.rules.iter().flatten())
        .filter(|rule| rule.host.as_deref() == Some(host))
        .flat_map(|rule| rule.http.iter().flat_map(|http| http.paths.iter()))
        .any(|p| p.path.as_deref() == Some(path))
}

fn mk_ingress(desc: &ExposureDescriptor) -> Ingress {
    let backend = IngressBackend {
        service: Some(IngressServiceBackend {
            name: desc.service.clone(),
            port: Some(ServiceBackendPort {
                number: Some(desc.port),
                ..Default::default()
            }),
        }),
        ..Default::default()
    };

    let tls = desc.tls.then(|| {
        vec![IngressTLS {
            hosts: Some(vec![desc.host.clone()]),
            secret_name: Some(desc.secret_name.clone()),
        }]
    });

    Ingress {
        metadata: ObjectMeta {
            name: Some(desc.name.clone()),
            namespace: Some(desc.namespace.clone()),
            labels: Some(exposure::labels(desc)),
            annotations: Some(desc.annotations.clone()),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            default_backend: desc.default_backend.then(|| backend.clone()),
            rules: Some(vec![IngressRule {
                host: Some(desc.host.clone()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(desc.path.clone()),
                        path_type: Some("ImplementationSpecific".to_string()),
                        backend,
                    }],
                }),
            }]),
            tls,
            ..Default::default()
        }),
        ..Default::default()
    }
}
