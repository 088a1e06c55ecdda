//! Merges the base configuration with a Service's override annotations.

use crate::{
    config::{BaseConfig, Scope},
    consts::{self, CONFIG_ANNOTATION_PREFIX},
    snapshot::ResourceSnapshot,
};

/// The configuration that applies to a single event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EffectiveConfig {
    pub domain: String,
    pub host_template: String,
    pub path: String,
    pub name_template: String,
    pub secret_name_template: Option<String>,
    pub tls: bool,
    pub default_backend: bool,
    pub scope: Scope,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Override {
    HostTemplate,
    Path,
    NameTemplate,
    Tls,
    SecretNameTemplate,
    DefaultBackend,
}

const OVERRIDES: [(&str, Override); 6] = [
    (consts::OVERRIDE_HOST_TEMPLATE, Override::HostTemplate),
    (consts::OVERRIDE_PATH, Override::Path),
    (consts::OVERRIDE_NAME_TEMPLATE, Override::NameTemplate),
    (consts::OVERRIDE_TLS, Override::Tls),
    (consts::OVERRIDE_SECRET_NAME_TEMPLATE, Override::SecretNameTemplate),
    (consts::OVERRIDE_DEFAULT_BACKEND, Override::DefaultBackend),
];

pub fn merge(base: &BaseConfig, snapshot: &ResourceSnapshot) -> EffectiveConfig {
    let mut config = EffectiveConfig {
        domain: base.domain.clone(),
        host_template: base.host_template.clone(),
        path: base.path.clone(),
        name_template: base.name_template.clone(),
        secret_name_template: base.secret_name_template.clone(),
        tls: base.tls,
        default_backend: base.default_backend,
        scope: base.scope,
    };

    for (key, value) in &snapshot.annotations {
        let Some(field) = key.strip_prefix(CONFIG_ANNOTATION_PREFIX) else {
            continue;
        };
        let Some((_, field)) = OVERRIDES.iter().find(|(name, _)| *name == field) else {
            tracing::debug!(annotation = %key, "ignoring unrecognized override");
            continue;
        };

        match field {
            Override::HostTemplate => config.host_template = value.clone(),
            Override::Path => config.path = value.clone(),
            Override::NameTemplate => config.name_template = value.clone(),
            Override::SecretNameTemplate => config.secret_name_template = Some(value.clone()),
            Override::Tls => config.tls = parse_flag(key, value, base.tls),
            Override::DefaultBackend => {
                config.default_backend = parse_flag(key, value, base.default_backend)
            }
        }
    }

    normalize_path(&mut config);
    split_host_template(&mut config);
    config
}

fn parse_flag(annotation: &str, value: &str, default: bool) -> bool {
    match value.trim().parse::<bool>() {
        Ok(flag) => flag,
        Err(_) => {
            tracing::warn!(
                %annotation,
                %value,
                %default,
                "override must be `true` or `false`; using the default"
            );
            default
        }
    }
}

fn normalize_path(config: &mut EffectiveConfig) {
    if !config.path.starts_with('/') {
        config.path.insert(0, '/');
    }
}

/// A host template of the form `host/path` carries its own path. The path is
/// only taken from the template when nothing more specific was configured.
fn split_host_template(config: &mut EffectiveConfig) {
    let Some((host, path)) = config.host_template.split_once('/') else {
        return;
    };
    let (host, path) = (host.to_string(), path.trim_start_matches('/').to_string());

    config.host_template = host;
    if config.path == "/" {
        config.path.push_str(&path);
    }
}
