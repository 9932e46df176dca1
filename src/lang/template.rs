//! String and structured templates.
//!
//! Templates are Handlebars templates rendered in strict mode, so a
//! reference to a missing field is an error rather than an empty string.
//! Structured values are rendered leaf by leaf: every string is a
//! template, other scalars pass through unchanged.

use handlebars::Handlebars;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use crate::error::EvalError;
use crate::external::SecretLoader;

use super::proxy;

/// Marker whose presence in a template triggers secret loading.
const SECRETS_REFERENCE: &str = "User.Secrets";

/// Renderer for policy templates.
pub struct TemplateEngine {
    registry: RwLock<Handlebars<'static>>,
    secrets: Option<Arc<dyn SecretLoader>>,
}

impl TemplateEngine {
    /// Creates an engine without access to secrets.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(handlebars::no_escape);
        Self {
            registry: RwLock::new(registry),
            secrets: None,
        }
    }

    /// Creates an engine that loads secrets on demand.
    #[must_use]
    pub fn with_secrets(secrets: Arc<dyn SecretLoader>) -> Self {
        Self {
            secrets: Some(secrets),
            ..Self::new()
        }
    }

    /// Renders a string template.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::Template`] carrying the template text if it does
    /// not compile, references a missing field, or needs secrets that
    /// cannot be loaded.
    pub fn render(&self, template: &str, data: &Value) -> Result<String, EvalError> {
        if template.contains(SECRETS_REFERENCE) {
            let data = self.with_secrets_loaded(template, data)?;
            return self.render_plain(template, &data);
        }
        self.render_plain(template, data)
    }

    /// Renders every string leaf of a structured value.
    ///
    /// Secrets are loaded at most once per call, and only if some leaf
    /// references them.
    ///
    /// # Errors
    ///
    /// Returns the first template error encountered.
    pub fn render_value(&self, value: &Value, data: &Value) -> Result<Value, EvalError> {
        match find_secret_reference(value) {
            Some(template) => {
                let data = self.with_secrets_loaded(template, data)?;
                self.render_tree(value, &data)
            }
            None => self.render_tree(value, data),
        }
    }

    /// Renders a list of templates.
    ///
    /// # Errors
    ///
    /// Returns the first template error encountered.
    pub fn render_all(&self, templates: &[String], data: &Value) -> Result<Vec<String>, EvalError> {
        templates.iter().map(|t| self.render(t, data)).collect()
    }

    fn render_tree(&self, value: &Value, data: &Value) -> Result<Value, EvalError> {
        match value {
            Value::String(template) => self.render_plain(template, data).map(Value::String),
            Value::Array(items) => items
                .iter()
                .map(|item| self.render_tree(item, data))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(fields) => fields
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.render_tree(v, data)?)))
                .collect::<Result<Map<_, _>, EvalError>>()
                .map(Value::Object),
            other => Ok(other.clone()),
        }
    }

    fn render_plain(&self, template: &str, data: &Value) -> Result<String, EvalError> {
        if !template.contains("{{") {
            return Ok(template.to_string());
        }

        if !self.registry.read().has_template(template) {
            self.registry
                .write()
                .register_template_string(template, template)
                .map_err(|e| EvalError::template(template, e.to_string()))?;
        }

        self.registry
            .read()
            .render(template, data)
            .map_err(|e| EvalError::template(template, e.to_string()))
    }

    fn with_secrets_loaded(&self, template: &str, data: &Value) -> Result<Value, EvalError> {
        let Some(loader) = &self.secrets else {
            return Err(EvalError::template(template, "secrets are not available"));
        };
        let Some(user) = proxy::user_name(data) else {
            return Err(EvalError::template(template, "no user in scope"));
        };

        debug!("Loading secrets for user '{}'", user);
        let secrets = loader
            .load_secrets_by_user_name(user)
            .map_err(|e| EvalError::template(template, e.to_string()))?;

        let mut data = data.clone();
        proxy::attach_secrets(&mut data, secrets);
        Ok(data)
    }
}

fn find_secret_reference(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) if s.contains(SECRETS_REFERENCE) => Some(s),
        Value::Array(items) => items.iter().find_map(find_secret_reference),
        Value::Object(fields) => fields.values().find_map(find_secret_reference),
        _ => None,
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine")
            .field("secrets", &self.secrets.is_some())
            .finish_non_exhaustive()
    }
}
