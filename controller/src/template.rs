//! Placeholder substitution for exposure names, hosts, paths and secret names.
//!
//! Templates are rendered with minijinja in strict mode, so a reference to a
//! field that the context does not carry is an error rather than an empty
//! string. Both `{{ service }}` and the `{{ .Service }}` spelling found in
//! existing configurations are accepted.

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
#[error("failed to render template {template:?}: {source}")]
pub struct TemplateError {
    template: String,
    #[source]
    source: minijinja::Error,
}

/// Fields available to host, path and name templates.
#[derive(Clone, Debug, Serialize)]
pub struct HostContext<'a> {
    pub service: &'a str,
    pub namespace: &'a str,
    pub domain: &'a str,
}

/// Fields available to secret-name templates.
#[derive(Clone, Debug, Serialize)]
pub struct SecretContext<'a> {
    pub service: &'a str,
    pub namespace: &'a str,
}

#[derive(Debug)]
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self { env }
    }

    pub fn render<C: Serialize>(&self, template: &str, ctx: &C) -> Result<String, TemplateError> {
        let normalized = normalize_placeholders(template);
        self.env
            .render_str(&normalized, ctx)
            .map_err(|source| TemplateError {
                template: template.to_string(),
                source,
            })
    }
}

/// Rewrites `{{ .Service }}` as `{{ service }}`.
///
/// Only expressions that are a single dotted identifier are touched; anything
/// else is left for minijinja to accept or reject.
fn normalize_placeholders(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start + 2]);
        rest = &rest[start + 2..];

        let Some(end) = rest.find("}}") else {
            break;
        };
        let expr = &rest[..end];
        match expr.trim().strip_prefix('.') {
            Some(ident) if !ident.is_empty() && ident.chars().all(is_ident_char) => {
                out.push(' ');
                out.push_str(&ident.to_ascii_lowercase());
                out.push(' ');
            }
            _ => out.push_str(expr),
        }
        rest = &rest[end..];
    }

    out.push_str(rest);
    out
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
