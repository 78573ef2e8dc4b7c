// ABOUTME: Tasks factory building live task trees from static definitions
// ABOUTME: Assigns hierarchical identifiers, validates per-kind structure, rejects duplicate names

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::definition::{DefinitionError, Result, TaskDef, TaskDefs};
use crate::model::{Task, TaskId, TaskRef};

/// Per-handler-kind structural rule, consulted for every created task.
pub type StructureRule = Arc<dyn Fn(&TaskDef) -> std::result::Result<(), String> + Send + Sync>;

/// Post-processes every created task. Used to inject cross-cutting fields
/// without coupling the factory to them.
pub trait TaskCustomizer: Send + Sync {
    fn customize(&self, task: &mut Task);
}

/// Builds live task trees from definition trees. One factory instance is
/// scoped to one workflow run; its duplicate-name check spans the whole tree
/// it has built so far, including per-iteration loop children.
pub struct TasksFactory {
    counters: Mutex<HashMap<String, u64>>,
    used_names: Mutex<HashSet<String>>,
    rules: HashMap<String, StructureRule>,
    customizer: Option<Arc<dyn TaskCustomizer>>,
}

impl TasksFactory {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            used_names: Mutex::new(HashSet::new()),
            rules: default_rules(),
            customizer: None,
        }
    }

    pub fn with_customizer(mut self, customizer: Arc<dyn TaskCustomizer>) -> Self {
        self.customizer = Some(customizer);
        self
    }

    pub fn register_rule(&mut self, kind: impl Into<String>, rule: StructureRule) {
        self.rules.insert(kind.into(), rule);
    }

    /// Build live tasks for a definition set under the given parent.
    /// List-form tasks are blocking (sequential); map-form tasks are not.
    pub fn create_tasks(&self, defs: &TaskDefs, parent: Option<&TaskId>) -> Result<Vec<TaskRef>> {
        self.create_tasks_suffixed(defs, parent, None)
    }

    /// Same as `create_tasks`, but appends `-<suffix>` to every runtime name
    /// in the created subtree. Loop handlers use this to keep per-iteration
    /// children distinct in the session registries.
    pub fn create_tasks_suffixed(
        &self,
        defs: &TaskDefs,
        parent: Option<&TaskId>,
        suffix: Option<&str>,
    ) -> Result<Vec<TaskRef>> {
        match defs {
            TaskDefs::List(list) => list
                .iter()
                .map(|def| {
                    let name = def.name.clone().ok_or(DefinitionError::MissingName)?;
                    self.create_one(def, name, parent, true, suffix)
                })
                .collect(),
            TaskDefs::Map(map) => map
                .iter()
                .map(|(key, def)| self.create_one(def, key.clone(), parent, false, suffix))
                .collect(),
        }
    }

    fn create_one(
        &self,
        def: &Arc<TaskDef>,
        name: String,
        parent: Option<&TaskId>,
        blocking: bool,
        suffix: Option<&str>,
    ) -> Result<TaskRef> {
        self.check_structure(def, &name)?;

        let runtime_name = match suffix {
            Some(s) => format!("{}-{}", name, s),
            None => name,
        };
        self.claim_name(&runtime_name)?;

        let id = self.next_id(parent);
        let mut task = Task::new(id.clone(), runtime_name, Arc::clone(def));
        task.blocking = blocking;
        task.name_suffix = suffix.map(str::to_string);

        if let Some(children) = &def.tasks {
            task.children = self.create_tasks_suffixed(children, Some(&id), suffix)?;
        }
        if let Some(then) = &def.then_tasks {
            task.then_tasks = self.create_tasks_suffixed(then, Some(&id), suffix)?;
        }
        if let Some(els) = &def.else_tasks {
            task.else_tasks = self.create_tasks_suffixed(els, Some(&id), suffix)?;
        }
        if let Some(cases) = &def.cases {
            for (case, case_defs) in cases {
                let tasks = self.create_tasks_suffixed(case_defs, Some(&id), suffix)?;
                task.case_tasks.insert(case.clone(), tasks);
            }
        }
        if let Some(default) = &def.default_case {
            task.default_tasks = self.create_tasks_suffixed(default, Some(&id), suffix)?;
        }
        if let Some(body) = &def.loop_over {
            task.loop_tasks = self.create_tasks_suffixed(body, Some(&id), suffix)?;
        }
        if let Some(catch) = &def.catch_tasks {
            task.catch_tasks = self.create_tasks_suffixed(catch, Some(&id), suffix)?;
        }
        if let Some(finally) = &def.finally_tasks {
            task.finally_tasks = self.create_tasks_suffixed(finally, Some(&id), suffix)?;
        }

        if let Some(customizer) = &self.customizer {
            customizer.customize(&mut task);
        }

        Ok(task.into_ref())
    }

    fn check_structure(&self, def: &TaskDef, name: &str) -> Result<()> {
        if let Some(rule) = self.rules.get(&def.kind) {
            rule(def).map_err(|reason| DefinitionError::InvalidStructure {
                kind: def.kind.clone(),
                name: name.to_string(),
                reason,
            })?;
        }
        Ok(())
    }

    fn claim_name(&self, name: &str) -> Result<()> {
        let mut used = self.used_names.lock().expect("name set poisoned");
        if !used.insert(name.to_string()) {
            return Err(DefinitionError::DuplicateName {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Identifiers are assigned from a per-parent counter before children are
    /// known, which is what makes the truncation rule work.
    fn next_id(&self, parent: Option<&TaskId>) -> TaskId {
        let key = parent.map(|p| p.as_str().to_string()).unwrap_or_default();
        let mut counters = self.counters.lock().expect("id counters poisoned");
        let counter = counters.entry(key).or_insert(0);
        let local = *counter;
        *counter += 1;
        match parent {
            Some(parent) => parent.child(local),
            None => TaskId::root(local),
        }
    }
}

impl Default for TasksFactory {
    fn default() -> Self {
        Self::new()
    }
}

fn default_rules() -> HashMap<String, StructureRule> {
    let mut rules: HashMap<String, StructureRule> = HashMap::new();

    rules.insert(
        "if".to_string(),
        Arc::new(|def: &TaskDef| {
            if def.then_tasks.is_none() && def.else_tasks.is_none() {
                return Err("requires a then or else branch".to_string());
            }
            if def.has_plain_children() {
                return Err("must not have plain children".to_string());
            }
            Ok(())
        }),
    );

    rules.insert(
        "switch".to_string(),
        Arc::new(|def: &TaskDef| {
            match &def.cases {
                Some(cases) if !cases.is_empty() => {}
                _ => return Err("requires at least one case".to_string()),
            }
            if def.has_plain_children() {
                return Err("must not have plain children".to_string());
            }
            Ok(())
        }),
    );

    let loop_rule: StructureRule = Arc::new(|def: &TaskDef| {
        match &def.loop_over {
            Some(body) if !body.is_empty() => {}
            _ => return Err("requires a loop body".to_string()),
        }
        if def.has_plain_children() {
            return Err("must not have plain children".to_string());
        }
        Ok(())
    });
    for kind in ["each", "while", "repeat"] {
        rules.insert(kind.to_string(), Arc::clone(&loop_rule));
    }

    rules.insert(
        "try".to_string(),
        Arc::new(|def: &TaskDef| {
            if !def.has_plain_children() {
                return Err("requires body tasks".to_string());
            }
            Ok(())
        }),
    );

    rules
}
