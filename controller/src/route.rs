use crate::{
    consts::{self, SERVICE_LABEL},
    descriptor::ExposureDescriptor,
    error::{self, Error, Result},
    exposure::{self, ExposureApi, ExposureKind},
};
use kube::{
    api::{Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch},
    Client, ResourceExt,
};
use std::time::Duration;

pub const ROUTE_GROUP: &str = "route.openshift.io";

/// Exposes Services through `route.openshift.io/v1` Routes.
#[derive(Clone)]
pub struct RouteApi {
    client: Client,
    resource: ApiResource,
    timeout: Duration,
}

pub fn route_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk(ROUTE_GROUP, "v1", "Route");
    ApiResource::from_gvk_with_plural(&gvk, "routes")
}

impl RouteApi {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self {
            client,
            resource: route_resource(),
            timeout,
        }
    }

    fn api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.resource)
    }

    async fn apply(&self, desc: &ExposureDescriptor) -> Result<()> {
        let api = self.api(&desc.namespace);
        let route = mk_route(desc, &self.resource);
        let params = exposure::apply_params();
        let patch = Patch::Apply(&route);
        let apply = api.patch(&desc.name, &params, &patch);
        error::with_timeout("apply route", self.timeout, apply).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ExposureApi for RouteApi {
    fn kind(&self) -> ExposureKind {
        ExposureKind::Route
    }

    async fn exists(&self, namespace: &str, name: &str) -> Result<bool> {
        let api = self.api(namespace);
        let route = error::with_timeout("get route", self.timeout, api.get_opt(name)).await?;
        Ok(route.is_some())
    }

    async fn create(&self, desc: &ExposureDescriptor) -> Result<()> {
        self.apply(desc).await?;
        tracing::info!(route = %desc.name, host = %desc.host, "applied route");
        Ok(())
    }

    async fn update(&self, desc: &ExposureDescriptor) -> Result<()> {
        self.apply(desc).await?;
        tracing::info!(route = %desc.name, host = %desc.host, "updated route");
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let api = self.api(namespace);
        let params = DeleteParams::default();
        match error::with_timeout("delete route", self.timeout, api.delete(name, &params)).await {
            Ok(_) => {
                tracing::info!(route = %name, "deleted route");
                Ok(())
            }
            Err(Error::Kube(e)) if error::is_not_found(&e) => Ok(()),
            Err(error) => Err(error),
        }
    }

    async fn owned(&self, namespace: &str, service: &str) -> Result<Vec<String>> {
        let api = self.api(namespace);
        let params = ListParams::default().labels(&exposure::service_selector(service));
        let list = error::with_timeout("list routes", self.timeout, api.list(&params)).await?;
        Ok(list.items.iter().map(|route| route.name_any()).collect())
    }

    async fn owner(&self, namespace: &str, host: &str, path: &str) -> Result<Option<String>> {
        let api = self.api(namespace);
        let params = ListParams::default().labels(&consts::managed_selector());
        let list = error::with_timeout("list routes", self.timeout, api.list(&params)).await?;
        Ok(list
            .items
            .iter()
            .find(|route| serves(route, host, path))
            .and_then(|route| route.labels().get(SERVICE_LABEL).cloned()))
    }
}

fn serves(route: &DynamicObject, host: &str, path: &str) -> bool {
    let spec = &route.data["spec"];
    spec["host"].as_str() == Some(host) && spec["path"].as_str().unwrap_or("/") == path
}

fn mk_route(desc: &ExposureDescriptor, resource: &ApiResource) -> DynamicObject {
    let mut spec = serde_json::json!({
        "host": desc.host,
        "path": desc.path,
        "to": {
            "kind": "Service",
            "name": desc.service,
        },
        "port": {
            "targetPort": desc.port,
        },
    });
    if desc.tls {
        spec["tls"] = serde_json::json!({
            "termination": "edge",
            "insecureEdgeTerminationPolicy": "Redirect",
        });
    }

    let mut route = DynamicObject::new(&desc.name, resource)
        .within(&desc.namespace)
        .data(serde_json::json!({ "spec": spec }));
    route.metadata.labels = Some(exposure::labels(desc));
    route.metadata.annotations = Some(desc.annotations.clone());
    route
}
