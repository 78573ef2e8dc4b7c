// ABOUTME: Task invoker routing invocations to built-in or externally resolved handlers
// ABOUTME: Pure dispatch boundary; neither scheduler nor handlers know how a handler was obtained

use std::collections::HashMap;
use std::sync::Arc;

use super::error::{EngineError, Result};
use crate::handlers::{
    EachHandler, HandlerResult, IfHandler, NoopHandler, RepeatHandler, RunContext, SwitchHandler,
    TaskHandler, TryHandler, VariableHandler, WhileHandler,
};
use crate::model::TaskRef;

/// Resolves handler kinds the built-in registry does not know about.
/// Implemented outside the core (a module-loading concern).
pub trait HandlerResolver: Send + Sync {
    fn resolve(&self, kind: &str) -> Result<Arc<dyn TaskHandler>>;
}

/// The session's registered built-in handler set.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry preloaded with the control-flow family and basic leaves.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(IfHandler));
        registry.register(Arc::new(SwitchHandler));
        registry.register(Arc::new(EachHandler));
        registry.register(Arc::new(RepeatHandler));
        registry.register(Arc::new(WhileHandler));
        registry.register(Arc::new(TryHandler));
        registry.register(Arc::new(NoopHandler));
        registry.register(Arc::new(VariableHandler));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(handler.kind().to_string(), handler);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Routes a task to its handler: built-in set first, then the external
/// resolver collaborator. Stateless.
pub struct TaskInvoker {
    registry: HandlerRegistry,
    resolver: Option<Arc<dyn HandlerResolver>>,
}

impl TaskInvoker {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry,
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn HandlerResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub async fn invoke(&self, task: &TaskRef, ctx: &RunContext) -> Result<HandlerResult> {
        let kind = task.read().await.def.kind.clone();
        let handler = self.lookup(&kind)?;
        handler.run(task, ctx).await
    }

    /// Whether a handler kind implements catch semantics; used by the
    /// scheduler's error short-circuit.
    pub fn is_catch_kind(&self, kind: &str) -> bool {
        self.registry
            .get(kind)
            .map(|handler| handler.is_catch())
            .unwrap_or(false)
    }

    fn lookup(&self, kind: &str) -> Result<Arc<dyn TaskHandler>> {
        if let Some(handler) = self.registry.get(kind) {
            return Ok(handler);
        }
        match &self.resolver {
            Some(resolver) => resolver.resolve(kind),
            None => Err(EngineError::HandlerNotFound {
                kind: kind.to_string(),
            }),
        }
    }
}

impl Default for TaskInvoker {
    fn default() -> Self {
        Self::new(HandlerRegistry::with_builtins())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_contents() {
        let registry = HandlerRegistry::with_builtins();
        for kind in ["if", "switch", "each", "while", "repeat", "try", "noop"] {
            assert!(registry.get(kind).is_some(), "missing builtin '{}'", kind);
        }
        assert!(registry.get("s3_upload").is_none());
    }

    #[test]
    fn test_catch_kind_detection() {
        let invoker = TaskInvoker::default();
        assert!(invoker.is_catch_kind("try"));
        assert!(!invoker.is_catch_kind("if"));
        assert!(!invoker.is_catch_kind("unknown"));
    }

    #[test]
    fn test_unknown_kind_without_resolver() {
        let invoker = TaskInvoker::new(HandlerRegistry::empty());
        assert!(matches!(
            invoker.lookup("mystery"),
            Err(EngineError::HandlerNotFound { ref kind }) if kind == "mystery"
        ));
    }
}
