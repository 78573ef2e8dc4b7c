// ABOUTME: Collaborator seams consumed by the engine core
// ABOUTME: Parameter interpolation, script evaluation, and pre/post run hooks

use async_trait::async_trait;
use handlebars::Handlebars;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::model::{TaskRef, Workflow};

/// Resolves interpolation expressions in parameter strings against the
/// session namespace. Strings without expressions pass through unchanged.
pub trait Interpolator: Send + Sync {
    fn interpolate(&self, input: &str, namespace: &Value) -> Value;
}

/// Evaluates an expression in a named scripting language. Used by switch,
/// while, and catch conditions when a language tag is supplied.
#[async_trait]
pub trait ScriptEvaluator: Send + Sync {
    async fn eval(&self, expression: &str, language: &str, scope: &Value) -> anyhow::Result<Value>;
}

/// Pre/post run hook dispatch. The scheduler fires the task hooks around
/// every invocation, including failed ones.
#[async_trait]
pub trait RunHooks: Send + Sync {
    async fn before_workflow(&self, _workflow: &Workflow) {}
    async fn after_workflow(&self, _workflow: &Workflow) {}
    async fn before_task(&self, _task: &TaskRef) {}
    async fn after_task(&self, _task: &TaskRef) {}
}

pub struct NoopHooks;

#[async_trait]
impl RunHooks for NoopHooks {}

pub struct NoScripting;

#[async_trait]
impl ScriptEvaluator for NoScripting {
    async fn eval(&self, _expression: &str, language: &str, _scope: &Value) -> anyhow::Result<Value> {
        anyhow::bail!("no scripting engine configured for language '{}'", language)
    }
}

/// Handlebars-backed interpolator. A parameter that is exactly one
/// `{{path}}` expression resolves to the typed value at that path; anything
/// else renders to a string. Interpolation is best-effort: render failures
/// log a warning and leave the input unchanged.
pub struct TemplateInterpolator {
    handlebars: Handlebars<'static>,
    bare_expression: Regex,
}

impl TemplateInterpolator {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        // Parameters feed shell-less task handlers, not HTML.
        handlebars.register_escape_fn(handlebars::no_escape);

        Self {
            handlebars,
            bare_expression: Regex::new(r"^\{\{\s*([\w.\-]+)\s*\}\}$").expect("valid regex"),
        }
    }

    fn lookup_path<'v>(namespace: &'v Value, path: &str) -> Option<&'v Value> {
        let mut current = namespace;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current)
    }
}

impl Default for TemplateInterpolator {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpolator for TemplateInterpolator {
    fn interpolate(&self, input: &str, namespace: &Value) -> Value {
        if !input.contains("{{") {
            return Value::String(input.to_string());
        }

        if let Some(capture) = self.bare_expression.captures(input.trim()) {
            if let Some(value) = Self::lookup_path(namespace, &capture[1]) {
                return value.clone();
            }
        }

        match self.handlebars.render_template(input, namespace) {
            Ok(rendered) => Value::String(rendered),
            Err(e) => {
                warn!("Interpolation failed for '{}': {}", input, e);
                Value::String(input.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_string_passes_through() {
        let interp = TemplateInterpolator::new();
        let ns = json!({});
        assert_eq!(interp.interpolate("hello", &ns), json!("hello"));
    }

    #[test]
    fn test_bare_expression_keeps_type() {
        let interp = TemplateInterpolator::new();
        let ns = json!({"variables": {"count": 7, "flag": true}});
        assert_eq!(interp.interpolate("{{variables.count}}", &ns), json!(7));
        assert_eq!(interp.interpolate("{{variables.flag}}", &ns), json!(true));
    }

    #[test]
    fn test_embedded_expression_renders_to_string() {
        let interp = TemplateInterpolator::new();
        let ns = json!({"variables": {"env": "staging"}});
        assert_eq!(
            interp.interpolate("deploy to {{variables.env}}", &ns),
            json!("deploy to staging")
        );
    }

    #[test]
    fn test_unknown_path_renders_empty_not_error() {
        let interp = TemplateInterpolator::new();
        let ns = json!({});
        assert_eq!(interp.interpolate("x={{missing.path}}", &ns), json!("x="));
    }
}
