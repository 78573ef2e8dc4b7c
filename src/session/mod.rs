// ABOUTME: Per-run execution session holding task registries and the interpolation namespace
// ABOUTME: Provides ancestor lookup, child replacement, and best-effort parameter resolution

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::interp::Interpolator;
use crate::model::{Task, TaskId, TaskRef};

/// Composite parameters deeper than this are passed through unresolved.
/// Interpolation is best-effort, never fail-fast.
pub const MAX_RESOLUTION_DEPTH: usize = 10;

#[derive(Default)]
struct Registries {
    by_id: HashMap<TaskId, TaskRef>,
    by_name: HashMap<String, TaskRef>,
}

/// Per-run registry of all live tasks, keyed by identifier (for parent
/// traversal) and by runtime name (for parameter interpolation). Shared by
/// the scheduler and every handler during one workflow execution; never
/// shared across runs.
pub struct Session {
    workflow_name: String,
    workflow_id: String,
    registries: RwLock<Registries>,
    variables: RwLock<Map<String, Value>>,
    interpolator: Arc<dyn Interpolator>,
}

impl Session {
    pub fn new(
        workflow_name: impl Into<String>,
        workflow_id: impl Into<String>,
        variables: Map<String, Value>,
        interpolator: Arc<dyn Interpolator>,
    ) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            workflow_id: workflow_id.into(),
            registries: RwLock::new(Registries::default()),
            variables: RwLock::new(variables),
            interpolator,
        }
    }

    /// Register a task tree, recursing through every child container so
    /// branch tasks are addressable before a handler activates them.
    pub async fn register_tasks(&self, tasks: &[TaskRef]) {
        let mut stack: Vec<TaskRef> = tasks.to_vec();
        let mut registries = self.registries.write().await;

        while let Some(task) = stack.pop() {
            let guard = task.read().await;
            registries.by_id.insert(guard.id.clone(), Arc::clone(&task));
            registries
                .by_name
                .insert(guard.name.clone(), Arc::clone(&task));
            push_all_containers(&guard, &mut stack);
        }
    }

    async fn deregister_tasks(&self, tasks: &[TaskRef]) {
        let mut stack: Vec<TaskRef> = tasks.to_vec();
        let mut registries = self.registries.write().await;

        while let Some(task) = stack.pop() {
            let guard = task.read().await;
            registries.by_id.remove(&guard.id);
            registries.by_name.remove(&guard.name);
            push_all_containers(&guard, &mut stack);
        }
    }

    /// Replace a parent's active children wholesale. Used exclusively by
    /// control-flow handlers.
    pub async fn set_tasks(&self, parent: &TaskRef, tasks: Vec<TaskRef>) {
        let old = {
            let mut guard = parent.write().await;
            std::mem::replace(&mut guard.children, tasks.clone())
        };
        self.deregister_tasks(&old).await;
        self.register_tasks(&tasks).await;
    }

    /// Deregister and drop a parent's current children.
    pub async fn clear_tasks(&self, parent: &TaskRef) {
        let old = {
            let mut guard = parent.write().await;
            std::mem::take(&mut guard.children)
        };
        self.deregister_tasks(&old).await;
    }

    pub async fn get_task(&self, id: &TaskId) -> Option<TaskRef> {
        self.registries.read().await.by_id.get(id).cloned()
    }

    pub async fn get_task_by_name(&self, name: &str) -> Option<TaskRef> {
        self.registries.read().await.by_name.get(name).cloned()
    }

    /// Nearest registered ancestor, found by truncating identifier segments.
    pub async fn parent_task(&self, task_id: &TaskId) -> Option<TaskRef> {
        let registries = self.registries.read().await;
        let mut current = task_id.parent();
        while let Some(id) = current {
            if let Some(task) = registries.by_id.get(&id) {
                return Some(Arc::clone(task));
            }
            current = id.parent();
        }
        None
    }

    /// Walks ancestors upward until the predicate matches or the root is
    /// exhausted.
    pub async fn find_ancestor<F>(&self, task_id: &TaskId, predicate: F) -> Option<TaskRef>
    where
        F: Fn(&Task) -> bool,
    {
        let mut current = task_id.parent();
        while let Some(id) = current {
            if let Some(task) = self.get_task(&id).await {
                if predicate(&*task.read().await) {
                    return Some(task);
                }
            }
            current = id.parent();
        }
        None
    }

    pub async fn get_variable(&self, key: &str) -> Option<Value> {
        self.variables.read().await.get(key).cloned()
    }

    pub async fn set_variable(&self, key: String, value: Value) {
        self.variables.write().await.insert(key, value);
    }

    pub async fn variables_snapshot(&self) -> Map<String, Value> {
        self.variables.read().await.clone()
    }

    /// Build the interpolation namespace: workflow info, shared variables,
    /// and per-task status/output records keyed by runtime name.
    pub async fn namespace(&self) -> Value {
        let variables = self.variables.read().await.clone();

        let mut tasks = Map::new();
        let registries = self.registries.read().await;
        for (name, task) in &registries.by_name {
            let guard = task.read().await;
            tasks.insert(
                name.clone(),
                json!({
                    "status": guard.status,
                    "output": guard.output,
                }),
            );
        }

        json!({
            "workflow": {
                "name": self.workflow_name,
                "id": self.workflow_id,
            },
            "variables": variables,
            "tasks": tasks,
        })
    }

    /// Resolve one parameter value against a prebuilt namespace. Scalar
    /// strings go through the interpolation collaborator; composites resolve
    /// element-wise with an incremented depth.
    pub fn resolve_value(&self, value: &Value, namespace: &Value, depth: usize) -> Value {
        if depth > MAX_RESOLUTION_DEPTH {
            warn!(
                "Parameter nesting exceeds {} levels, passing through unresolved",
                MAX_RESOLUTION_DEPTH
            );
            return value.clone();
        }

        match value {
            Value::String(s) => self.interpolator.interpolate(s, namespace),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.resolve_value(item, namespace, depth + 1))
                    .collect(),
            ),
            Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v, namespace, depth + 1)))
                    .collect(),
            ),
            scalar => scalar.clone(),
        }
    }

    /// Resolve a full parameter map against the current namespace.
    pub async fn resolve_parameters(&self, parameters: &Map<String, Value>) -> Map<String, Value> {
        let namespace = self.namespace().await;
        parameters
            .iter()
            .map(|(k, v)| (k.clone(), self.resolve_value(v, &namespace, 0)))
            .collect()
    }
}

fn push_all_containers(task: &Task, stack: &mut Vec<TaskRef>) {
    stack.extend(task.children.iter().cloned());
    stack.extend(task.then_tasks.iter().cloned());
    stack.extend(task.else_tasks.iter().cloned());
    for case in task.case_tasks.values() {
        stack.extend(case.iter().cloned());
    }
    stack.extend(task.default_tasks.iter().cloned());
    stack.extend(task.loop_tasks.iter().cloned());
    stack.extend(task.catch_tasks.iter().cloned());
    stack.extend(task.finally_tasks.iter().cloned());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::TaskDefs;
    use crate::factory::TasksFactory;
    use crate::interp::TemplateInterpolator;
    use serde_json::json;

    fn session() -> Session {
        Session::new(
            "wf",
            "run-1",
            Map::new(),
            Arc::new(TemplateInterpolator::new()),
        )
    }

    async fn build(yaml: &str) -> Vec<TaskRef> {
        let defs: TaskDefs = serde_yaml::from_str(yaml).unwrap();
        TasksFactory::new().create_tasks(&defs, None).unwrap()
    }

    #[tokio::test]
    async fn test_registration_covers_branch_containers() {
        let tasks = build(
            r#"
            - name: gate
              type: if
              then:
                - name: inner
                  type: noop
            "#,
        )
        .await;

        let session = session();
        session.register_tasks(&tasks).await;

        assert!(session.get_task_by_name("gate").await.is_some());
        assert!(session.get_task_by_name("inner").await.is_some());
        assert!(session.get_task(&TaskId::from("0/0")).await.is_some());
    }

    #[tokio::test]
    async fn test_parent_task_walks_truncated_ids() {
        let tasks = build(
            r#"
            - name: outer
              type: try
              tasks:
                - name: mid
                  type: try
                  tasks:
                    - name: leaf
                      type: noop
            "#,
        )
        .await;

        let session = session();
        session.register_tasks(&tasks).await;

        let leaf_id = TaskId::from("0/0/0");
        let parent = session.parent_task(&leaf_id).await.unwrap();
        assert_eq!(parent.read().await.name, "mid");

        let outer = session
            .find_ancestor(&leaf_id, |t| t.name == "outer")
            .await
            .unwrap();
        assert_eq!(outer.read().await.id.as_str(), "0");

        assert!(session
            .find_ancestor(&leaf_id, |t| t.name == "elsewhere")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_set_tasks_replaces_and_reregisters() {
        let tasks = build("[{name: parent, type: try, tasks: [{name: old, type: noop}]}]").await;
        let session = session();
        session.register_tasks(&tasks).await;

        let replacement = build("[{name: fresh, type: noop}]").await;
        session.set_tasks(&tasks[0], replacement).await;

        assert!(session.get_task_by_name("old").await.is_none());
        assert!(session.get_task_by_name("fresh").await.is_some());
        assert_eq!(tasks[0].read().await.children.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_parameters_through_namespace() {
        let session = Session::new(
            "wf",
            "run-1",
            serde_json::from_value(json!({"limit": 10})).unwrap(),
            Arc::new(TemplateInterpolator::new()),
        );

        let params: Map<String, Value> = serde_json::from_value(json!({
            "typed": "{{variables.limit}}",
            "nested": {"text": "limit is {{variables.limit}}"},
            "list": ["{{variables.limit}}", 3],
        }))
        .unwrap();

        let resolved = session.resolve_parameters(&params).await;
        assert_eq!(resolved["typed"], json!(10));
        assert_eq!(resolved["nested"]["text"], json!("limit is 10"));
        assert_eq!(resolved["list"], json!([10, 3]));
    }

    #[tokio::test]
    async fn test_resolution_depth_guard_passes_through() {
        let session = session();
        let namespace = session.namespace().await;

        let mut value = json!("{{variables.x}}");
        for _ in 0..(MAX_RESOLUTION_DEPTH + 2) {
            value = json!([value]);
        }

        // Deeply nested values come back unresolved instead of failing.
        let resolved = session.resolve_value(&value, &namespace, 0);
        let mut cursor = &resolved;
        while let Value::Array(items) = cursor {
            cursor = &items[0];
        }
        assert_eq!(cursor, &json!("{{variables.x}}"));
    }
}
