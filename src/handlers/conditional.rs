// ABOUTME: Conditional (if) task handler comparing two resolved values
// ABOUTME: Selects the then- or else-branch synchronously; no rerun needed

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use super::{HandlerResult, RunContext, TaskHandler};
use crate::engine::error::{EngineError, Result};
use crate::model::TaskRef;

pub struct IfHandler;

#[async_trait]
impl TaskHandler for IfHandler {
    fn kind(&self) -> &'static str {
        "if"
    }

    async fn run(&self, task: &TaskRef, ctx: &RunContext) -> Result<HandlerResult> {
        let (name, params, then_tasks, else_tasks) = {
            let guard = task.read().await;
            (
                guard.name.clone(),
                guard.parameters.clone(),
                guard.then_tasks.clone(),
                guard.else_tasks.clone(),
            )
        };

        let operator = params
            .get("operator")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::InvalidParameter {
                task: name.clone(),
                reason: "missing operator".to_string(),
            })?;
        let left = params.get("left").unwrap_or(&Value::Null);
        let right = params.get("right");

        let result =
            compare(left, operator, right).map_err(|reason| EngineError::InvalidParameter {
                task: name,
                reason,
            })?;

        let branch = if result { then_tasks } else { else_tasks };
        ctx.session.set_tasks(task, branch).await;

        Ok(HandlerResult::Done(json!(result)))
    }
}

/// Evaluate a comparison between two resolved values. Shared with the while
/// loop's condition check.
pub(crate) fn compare(
    left: &Value,
    operator: &str,
    right: Option<&Value>,
) -> std::result::Result<bool, String> {
    let binary = |op: fn(&Value, &Value) -> std::result::Result<bool, String>| {
        let right = right.ok_or_else(|| format!("operator '{}' needs a right value", operator))?;
        op(left, right)
    };

    match operator {
        "==" => binary(|l, r| Ok(values_equal(l, r))),
        "!=" => binary(|l, r| Ok(!values_equal(l, r))),
        ">" => binary(|l, r| order(l, r).map(|o| o == std::cmp::Ordering::Greater)),
        ">=" => binary(|l, r| order(l, r).map(|o| o != std::cmp::Ordering::Less)),
        "<" => binary(|l, r| order(l, r).map(|o| o == std::cmp::Ordering::Less)),
        "<=" => binary(|l, r| order(l, r).map(|o| o != std::cmp::Ordering::Greater)),
        "in" => binary(|l, r| contains(r, l)),
        "not_in" => binary(|l, r| contains(r, l).map(|b| !b)),
        "contains" => binary(contains),
        "matches" => binary(|l, r| {
            let pattern = r
                .as_str()
                .ok_or_else(|| "'matches' needs a string pattern".to_string())?;
            let subject = l
                .as_str()
                .ok_or_else(|| "'matches' needs a string subject".to_string())?;
            let regex = Regex::new(pattern).map_err(|e| format!("invalid pattern: {}", e))?;
            Ok(regex.is_match(subject))
        }),
        "is_empty" => Ok(is_empty(left)),
        "is_not_empty" => Ok(!is_empty(left)),
        "is_defined" => Ok(!left.is_null()),
        "is_null" => Ok(left.is_null()),
        "is_true" => Ok(is_truthy(left)),
        "is_false" => Ok(!is_truthy(left)),
        other => Err(format!("unknown operator '{}'", other)),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn order(left: &Value, right: &Value) -> std::result::Result<std::cmp::Ordering, String> {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return l
            .partial_cmp(&r)
            .ok_or_else(|| "values are not comparable".to_string());
    }
    if let (Some(l), Some(r)) = (left.as_str(), right.as_str()) {
        return Ok(l.cmp(r));
    }
    Err(format!("cannot order {} against {}", left, right))
}

fn contains(collection: &Value, needle: &Value) -> std::result::Result<bool, String> {
    match collection {
        Value::Array(items) => Ok(items.iter().any(|item| values_equal(item, needle))),
        Value::String(s) => {
            let needle = needle
                .as_str()
                .ok_or_else(|| "membership in a string needs a string value".to_string())?;
            Ok(s.contains(needle))
        }
        Value::Object(fields) => {
            let key = needle
                .as_str()
                .ok_or_else(|| "membership in an object needs a string key".to_string())?;
            Ok(fields.contains_key(key))
        }
        other => Err(format!("cannot test membership in {}", other)),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    }
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ordering_operators() {
        assert!(compare(&json!(11), ">", Some(&json!(10))).unwrap());
        assert!(!compare(&json!(5), ">", Some(&json!(10))).unwrap());
        assert!(compare(&json!(5), "<=", Some(&json!(5))).unwrap());
        assert!(compare(&json!("b"), ">", Some(&json!("a"))).unwrap());
    }

    #[test]
    fn test_equality_across_number_forms() {
        assert!(compare(&json!(2), "==", Some(&json!(2.0))).unwrap());
        assert!(compare(&json!("x"), "!=", Some(&json!("y"))).unwrap());
    }

    #[test]
    fn test_membership_and_emptiness() {
        assert!(compare(&json!(2), "in", Some(&json!([1, 2, 3]))).unwrap());
        assert!(compare(&json!("ab"), "not_in", Some(&json!(["cd"]))).unwrap());
        assert!(compare(&json!([]), "is_empty", None).unwrap());
        assert!(compare(&json!("x"), "is_not_empty", None).unwrap());
    }

    #[test]
    fn test_pattern_and_definedness() {
        assert!(compare(&json!("v1.2.3"), "matches", Some(&json!(r"^v\d+"))).unwrap());
        assert!(compare(&json!(null), "is_null", None).unwrap());
        assert!(compare(&json!(0), "is_false", None).unwrap());
        assert!(compare(&json!("yes"), "is_true", None).unwrap());
    }

    #[test]
    fn test_unknown_operator_rejected() {
        assert!(compare(&json!(1), "~=", Some(&json!(1))).is_err());
    }
}
