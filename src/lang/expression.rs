//! Boolean criteria expressions.
//!
//! An expression is a Handlebars helper parameter, for example
//! `(eq env "prod")`, `(and (eq tier "db") (not debug))` or a bare label
//! name. It is evaluated by rendering `{{#if EXPR}}true{{else}}false{{/if}}`
//! against curated data. Unknown identifiers are falsy. Compiled
//! expressions are cached for the lifetime of the evaluator.

use handlebars::Handlebars;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::EvalError;
use crate::policy::Criteria;

/// Evaluator for criteria expressions.
pub struct ExpressionEvaluator {
    registry: RwLock<Handlebars<'static>>,
}

impl ExpressionEvaluator {
    /// Creates an evaluator with an empty cache.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);
        registry.register_escape_fn(handlebars::no_escape);
        Self {
            registry: RwLock::new(registry),
        }
    }

    /// Evaluates a single expression to a boolean.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError`] carrying the expression text if it does not
    /// compile or render.
    pub fn evaluate(&self, expression: &str, data: &Value) -> Result<bool, EvalError> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(EvalError::expression(expression, "empty expression"));
        }
        if expression.contains("{{") || expression.contains("}}") {
            return Err(EvalError::expression(expression, "mustache delimiters are not allowed"));
        }

        self.compile(expression)?;

        let rendered = self
            .registry
            .read()
            .render(expression, data)
            .map_err(|e| EvalError::expression(expression, e.to_string()))?;

        match rendered.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(EvalError::NotBoolean {
                expression: expression.to_string(),
                value: other.to_string(),
            }),
        }
    }

    /// Evaluates criteria.
    ///
    /// `require_none` is checked first, then `require_all`, then
    /// `require_any` (when non-empty). Empty criteria match.
    ///
    /// # Errors
    ///
    /// Returns the first expression error encountered.
    pub fn allows(&self, criteria: &Criteria, data: &Value) -> Result<bool, EvalError> {
        for expression in &criteria.require_none {
            if self.evaluate(expression, data)? {
                return Ok(false);
            }
        }

        for expression in &criteria.require_all {
            if !self.evaluate(expression, data)? {
                return Ok(false);
            }
        }

        if criteria.require_any.is_empty() {
            return Ok(true);
        }
        for expression in &criteria.require_any {
            if self.evaluate(expression, data)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Evaluates optional criteria; absent criteria match.
    ///
    /// # Errors
    ///
    /// Returns the first expression error encountered.
    pub fn allows_optional(&self, criteria: Option<&Criteria>, data: &Value) -> Result<bool, EvalError> {
        criteria.map_or(Ok(true), |c| self.allows(c, data))
    }

    /// Returns the number of cached expressions.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.registry.read().get_templates().len()
    }

    fn compile(&self, expression: &str) -> Result<(), EvalError> {
        if self.registry.read().has_template(expression) {
            return Ok(());
        }

        let source = format!("{{{{#if {expression}}}}}true{{{{else}}}}false{{{{/if}}}}");
        self.registry
            .write()
            .register_template_string(expression, source)
            .map_err(|e| EvalError::expression(expression, e.to_string()))
    }
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExpressionEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionEvaluator")
            .field("cached", &self.cached())
            .finish()
    }
}
