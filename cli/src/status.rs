use crate::table::{Column, Table};
use anyhow::Result;
use exposer::consts::REGISTRY_NAME;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{api::ListParams, Api, Client, ResourceExt};
use serde::Serialize;

/// One host recorded in a namespace's registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RegistryEntry {
    namespace: String,
    key: String,
    host: String,
}

pub async fn status(client: Client, namespace: Option<&str>) -> Result<Vec<RegistryEntry>> {
    let api = match namespace {
        Some(ns) => Api::<ConfigMap>::namespaced(client, ns),
        None => Api::<ConfigMap>::all(client),
    };
    let params = ListParams::default().fields(&format!("metadata.name={}", REGISTRY_NAME));
    let registries = api.list(&params).await?;
    Ok(entries(registries.items))
}

fn entries(registries: Vec<ConfigMap>) -> Vec<RegistryEntry> {
    let mut entries = registries
        .into_iter()
        .flat_map(|cm| {
            let namespace = cm.namespace().unwrap_or_default();
            cm.data
                .unwrap_or_default()
                .into_iter()
                .map(move |(key, host)| RegistryEntry {
                    namespace: namespace.clone(),
                    key,
                    host,
                })
        })
        .collect::<Vec<_>>();
    entries.sort_by(|a, b| (&a.namespace, &a.key).cmp(&(&b.namespace, &b.key)));
    entries
}

pub fn print_status(results: &[RegistryEntry]) {
    let table = Table {
        cols: vec![
            Column::new("NAMESPACE", Box::new(|e: &RegistryEntry| e.namespace.clone())),
            Column::new("SERVICE", Box::new(|e: &RegistryEntry| e.key.clone())),
            Column::new("HOST", Box::new(|e: &RegistryEntry| e.host.clone())),
        ],
        data: results,
    };
    print!("{}", table);
}

pub fn json_print_status(results: &[RegistryEntry]) -> Result<()> {
    serde_json::to_writer_pretty(std::io::stdout(), results)?;
    println!();
    Ok(())
}
