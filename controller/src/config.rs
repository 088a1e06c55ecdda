use crate::template::{HostContext, SecretContext, TemplateEngine, TemplateError};
use serde::Deserialize;
use std::{fmt, path::Path, str::FromStr};

/// Process-wide defaults, loaded once before the controller starts.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseConfig {
    pub domain: String,

    #[serde(default = "default_host_template")]
    pub host_template: String,

    #[serde(default = "default_path")]
    pub path: String,

    #[serde(default = "default_name_template")]
    pub name_template: String,

    #[serde(default)]
    pub secret_name_template: Option<String>,

    #[serde(default)]
    pub tls: bool,

    #[serde(default)]
    pub default_backend: bool,

    #[serde(default)]
    pub scope: Scope,
}

/// Which namespaces' registries learn about an exposed host.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Global,
    #[default]
    Local,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("domain must not be empty")]
    EmptyDomain,

    #[error("{field} must not be empty")]
    EmptyTemplate { field: &'static str },

    #[error("invalid {field}: {source}")]
    Template {
        field: &'static str,
        #[source]
        source: TemplateError,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("invalid scope {0:?}; expected `global` or `local`")]
pub struct InvalidScope(String);

fn default_host_template() -> String {
    "{{ service }}.{{ namespace }}.{{ domain }}".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

fn default_name_template() -> String {
    "{{ service }}".to_string()
}

// === impl BaseConfig ===

impl BaseConfig {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            host_template: default_host_template(),
            path: default_path(),
            name_template: default_name_template(),
            secret_name_template: None,
            tls: false,
            default_backend: false,
            scope: Scope::default(),
        }
    }

    /// Reads and validates a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_yaml(&source).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate(&TemplateEngine::new())?;
        Ok(config)
    }

    pub fn from_yaml(source: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(source)
    }

    /// Renders every template against a sample Service so that a broken
    /// configuration fails at startup instead of on the first event.
    pub fn validate(&self, engine: &TemplateEngine) -> Result<(), ConfigError> {
        if self.domain.trim().is_empty() {
            return Err(ConfigError::EmptyDomain);
        }
        if self.host_template.trim().is_empty() {
            return Err(ConfigError::EmptyTemplate {
                field: "hostTemplate",
            });
        }
        if self.name_template.trim().is_empty() {
            return Err(ConfigError::EmptyTemplate {
                field: "nameTemplate",
            });
        }

        let host_ctx = HostContext {
            service: "sample",
            namespace: "default",
            domain: &self.domain,
        };
        for (field, template) in [
            ("hostTemplate", &self.host_template),
            ("path", &self.path),
            ("nameTemplate", &self.name_template),
        ] {
            engine
                .render(template, &host_ctx)
                .map_err(|source| ConfigError::Template { field, source })?;
        }

        if let Some(template) = &self.secret_name_template {
            let secret_ctx = SecretContext {
                service: "sample",
                namespace: "default",
            };
            engine
                .render(template, &secret_ctx)
                .map_err(|source| ConfigError::Template {
                    field: "secretNameTemplate",
                    source,
                })?;
        }

        Ok(())
    }
}

// === impl Scope ===

impl FromStr for Scope {
    type Err = InvalidScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "local" => Ok(Self::Local),
            _ => Err(InvalidScope(s.to_string())),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Local => f.write_str("local"),
        }
    }
}
