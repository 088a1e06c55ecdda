//! Well-known label, annotation, and object names shared by the controller and the CLI.

/// A Service is only exposed when this label is set to exactly `"true"`.
pub const OPT_IN_LABEL: &str = "expose";

/// Newline-separated `key: value` pairs copied onto the generated object.
pub const FORWARD_ANNOTATION: &str = "exposer.io/annotations";

/// Forwarded annotation that selects the registry scope (`global` or `local`).
pub const SCOPE_ANNOTATION: &str = "exposer.io/scope";

/// Prefix for per-Service overrides of the base configuration.
pub const CONFIG_ANNOTATION_PREFIX: &str = "config.exposer.io/";

pub const OVERRIDE_HOST_TEMPLATE: &str = "host-template";
pub const OVERRIDE_PATH: &str = "path";
pub const OVERRIDE_NAME_TEMPLATE: &str = "name-template";
pub const OVERRIDE_TLS: &str = "tls";
pub const OVERRIDE_SECRET_NAME_TEMPLATE: &str = "secret-name-template";
pub const OVERRIDE_DEFAULT_BACKEND: &str = "default-backend";

/// Name of the per-namespace registry ConfigMap.
pub const REGISTRY_NAME: &str = "exposer-registry";

/// Appended to the exposure name when no secret-name template yields a name.
pub const SECRET_SUFFIX: &str = "-cert";

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "exposer";

/// Records which Service a generated object belongs to.
pub const SERVICE_LABEL: &str = "exposer.io/service";

/// Field manager used for server-side apply.
pub const FIELD_MANAGER: &str = "exposer.io";

pub fn managed_selector() -> String {
    format!("{}={}", MANAGED_BY_LABEL, MANAGED_BY_VALUE)
}
