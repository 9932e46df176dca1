//! Policy language: criteria expressions and templates.
//!
//! Both evaluators only ever see data built by [`proxy`], never the
//! engine's own objects.

mod expression;
pub mod proxy;
mod template;

pub use expression::ExpressionEvaluator;
pub use template::TemplateEngine;
