use crate::{
    config::{BaseConfig, Scope},
    consts::{FORWARD_ANNOTATION, SCOPE_ANNOTATION, SECRET_SUFFIX},
    error::{Error, Result},
    merge::{self, EffectiveConfig},
    snapshot::ResourceSnapshot,
    template::{HostContext, SecretContext, TemplateEngine},
};
use std::collections::BTreeMap;

/// Everything needed to create or update the exposure object for one Service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExposureDescriptor {
    pub name: String,
    pub namespace: String,
    pub annotations: BTreeMap<String, String>,
    pub host: String,
    pub path: String,
    pub service: String,
    /// Taken from the Service's first port. Services with several ports are
    /// always exposed on the first one.
    pub port: i32,
    pub tls: bool,
    pub secret_name: String,
    pub default_backend: bool,
    pub scope: Scope,
}

impl ExposureDescriptor {
    /// Merges `base` with the snapshot's overrides and resolves the result.
    pub fn resolve(
        snapshot: &ResourceSnapshot,
        base: &BaseConfig,
        engine: &TemplateEngine,
    ) -> Result<Self> {
        build(snapshot, &merge::merge(base, snapshot), engine)
    }

    /// The key under which this Service is recorded in the registry.
    pub fn registry_key(&self) -> String {
        registry_key(&self.service, &self.namespace)
    }
}

pub fn registry_key(service: &str, namespace: &str) -> String {
    format!("{}-{}", service, namespace)
}

/// The registry scope a Service selects through its forwarded annotations, or
/// `default`. Does not depend on any template.
pub fn scope(snapshot: &ResourceSnapshot, default: Scope) -> Scope {
    let annotations = forwarded(snapshot);
    scope_from(snapshot, &annotations, default)
}

pub fn build(
    snapshot: &ResourceSnapshot,
    config: &EffectiveConfig,
    engine: &TemplateEngine,
) -> Result<ExposureDescriptor> {
    let host_ctx = HostContext {
        service: &snapshot.name,
        namespace: &snapshot.namespace,
        domain: &config.domain,
    };
    let name = engine.render(&config.name_template, &host_ctx)?;
    let host = engine.render(&config.host_template, &host_ctx)?;
    let path = engine.render(&config.path, &host_ctx)?;

    let secret_name = match &config.secret_name_template {
        Some(template) => {
            let secret_ctx = SecretContext {
                service: &snapshot.name,
                namespace: &snapshot.namespace,
            };
            engine.render(template, &secret_ctx)?
        }
        None => String::new(),
    };
    let secret_name = if secret_name.is_empty() {
        format!("{}{}", name, SECRET_SUFFIX)
    } else {
        secret_name
    };

    let annotations = forwarded(snapshot);
    let scope = scope_from(snapshot, &annotations, config.scope);

    let port = *snapshot.ports.first().ok_or_else(|| Error::NoPorts {
        namespace: snapshot.namespace.clone(),
        name: snapshot.name.clone(),
    })?;

    Ok(ExposureDescriptor {
        name,
        namespace: snapshot.namespace.clone(),
        annotations,
        host,
        path,
        service: snapshot.name.clone(),
        port,
        tls: config.tls,
        secret_name,
        default_backend: config.default_backend,
        scope,
    })
}

fn forwarded(snapshot: &ResourceSnapshot) -> BTreeMap<String, String> {
    snapshot
        .annotations
        .get(FORWARD_ANNOTATION)
        .map(|list| parse_forwarded(list))
        .unwrap_or_default()
}

fn scope_from(
    snapshot: &ResourceSnapshot,
    annotations: &BTreeMap<String, String>,
    default: Scope,
) -> Scope {
    annotations
        .get(SCOPE_ANNOTATION)
        .and_then(|value| match value.parse() {
            Ok(scope) => Some(scope),
            Err(error) => {
                tracing::warn!(%error, service = %snapshot.key(), "using the default scope");
                None
            }
        })
        .unwrap_or(default)
}

/// Parses newline-separated `key: value` entries.
///
/// An entry must split into exactly two parts on `:`. Values that contain a
/// colon themselves are therefore rejected.
pub fn parse_forwarded(list: &str) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    for entry in list.lines() {
        if entry.trim().is_empty() {
            continue;
        }
        let parts = entry.split(':').collect::<Vec<_>>();
        match parts.as_slice() {
            [key, value] if !key.trim().is_empty() => {
                annotations.insert(key.trim().to_string(), value.trim().to_string());
            }
            _ => tracing::warn!(%entry, "skipping malformed forwarded annotation"),
        }
    }
    annotations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::CONFIG_ANNOTATION_PREFIX;

    fn base() -> BaseConfig {
        let mut base = BaseConfig::new("example.com");
        base.host_template = "{{.Service}}.{{.Domain}}".to_string();
        base
    }

    fn api() -> ResourceSnapshot {
        ResourceSnapshot::new("api", "team-a").exposed().with_port(8080)
    }

    #[test]
    fn resolves_end_to_end_example() {
        let desc = ExposureDescriptor::resolve(&api(), &base(), &TemplateEngine::new()).unwrap();
        assert_eq!(desc.name, "api");
        assert_eq!(desc.namespace, "team-a");
        assert_eq!(desc.host, "api.example.com");
        assert_eq!(desc.path, "/");
        assert_eq!(desc.service, "api");
        assert_eq!(desc.port, 8080);
        assert!(!desc.tls);
        assert_eq!(desc.secret_name, "api-cert");
        assert_eq!(desc.scope, Scope::Local);
        assert_eq!(desc.registry_key(), "api-team-a");
    }

    #[test]
    fn resolving_is_idempotent() {
        let engine = TemplateEngine::new();
        let snap = api()
            .with_annotation(FORWARD_ANNOTATION, "color: blue\nexposer.io/scope: global")
            .with_annotation(format!("{CONFIG_ANNOTATION_PREFIX}tls"), "true");
        let first = ExposureDescriptor::resolve(&snap, &base(), &engine).unwrap();
        let second = ExposureDescriptor::resolve(&snap, &base(), &engine).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn uses_first_port() {
        let snap = api().with_port(9090);
        let desc = ExposureDescriptor::resolve(&snap, &base(), &TemplateEngine::new()).unwrap();
        assert_eq!(desc.port, 8080);
    }

    #[test]
    fn requires_a_port() {
        let snap = ResourceSnapshot::new("api", "team-a").exposed();
        let err = ExposureDescriptor::resolve(&snap, &base(), &TemplateEngine::new()).unwrap_err();
        assert!(matches!(err, Error::NoPorts { .. }));
    }

    #[test]
    fn template_errors_are_returned() {
        let snap = api().with_annotation(
            format!("{CONFIG_ANNOTATION_PREFIX}name-template"),
            "{{.Cluster}}",
        );
        let err = ExposureDescriptor::resolve(&snap, &base(), &TemplateEngine::new()).unwrap_err();
        assert!(matches!(err, Error::Template(_)));
    }

    #[test]
    fn secret_name_from_template() {
        let mut base = base();
        base.secret_name_template = Some("{{.Namespace}}-wildcard".to_string());
        base.name_template = "{{.Service}}-ing".to_string();
        let desc = ExposureDescriptor::resolve(&api(), &base, &TemplateEngine::new()).unwrap();
        assert_eq!(desc.name, "api-ing");
        assert_eq!(desc.secret_name, "team-a-wildcard");
    }

    #[test]
    fn empty_secret_template_uses_suffix() {
        let mut base = base();
        base.secret_name_template = Some(String::new());
        let desc = ExposureDescriptor::resolve(&api(), &base, &TemplateEngine::new()).unwrap();
        assert_eq!(desc.secret_name, "api-cert");
    }

    #[test]
    fn path_template_is_rendered() {
        let snap = api().with_annotation(
            format!("{CONFIG_ANNOTATION_PREFIX}path"),
            "{{.Namespace}}/{{.Service}}",
        );
        let desc = ExposureDescriptor::resolve(&snap, &base(), &TemplateEngine::new()).unwrap();
        assert_eq!(desc.path, "/team-a/api");
    }

    #[test]
    fn forwards_only_well_formed_entries() {
        let parsed = parse_forwarded("color: blue\nbad-entry\ntier:1:extra");
        assert_eq!(
            parsed,
            BTreeMap::from([("color".to_string(), "blue".to_string())])
        );
    }

    #[test]
    fn forwarded_blank_lines_are_ignored() {
        let parsed = parse_forwarded("\n  kubernetes.io/ingress.class : nginx \n\n: orphan\n");
        assert_eq!(
            parsed,
            BTreeMap::from([("kubernetes.io/ingress.class".to_string(), "nginx".to_string())])
        );
    }

    #[test]
    fn scope_from_forwarded_annotation() {
        let engine = TemplateEngine::new();
        let snap = api().with_annotation(FORWARD_ANNOTATION, "exposer.io/scope: global");
        let desc = ExposureDescriptor::resolve(&snap, &base(), &engine).unwrap();
        assert_eq!(desc.scope, Scope::Global);
        assert_eq!(desc.annotations.get(SCOPE_ANNOTATION).unwrap(), "global");

        let snap = api().with_annotation(FORWARD_ANNOTATION, "exposer.io/scope: everywhere");
        let desc = ExposureDescriptor::resolve(&snap, &base(), &engine).unwrap();
        assert_eq!(desc.scope, Scope::Local);
    }

    #[test]
    fn scope_survives_broken_templates() {
        let snap = api()
            .with_annotation(FORWARD_ANNOTATION, "exposer.io/scope: global")
            .with_annotation(format!("{CONFIG_ANNOTATION_PREFIX}name-template"), "{{.Cluster}}");
        assert!(ExposureDescriptor::resolve(&snap, &base(), &TemplateEngine::new()).is_err());
        assert_eq!(scope(&snap, Scope::Local), Scope::Global);
        assert_eq!(scope(&api(), Scope::Local), Scope::Local);
        assert_eq!(registry_key("api", "team-a"), "api-team-a");
    }
}
