// ABOUTME: Workflow runner wiring the capability registry and mapping outcomes to status
// ABOUTME: A run always yields an inspectable Workflow entity, never a lost task tree

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::invoker::{HandlerRegistry, TaskInvoker};
use super::retry::RetryEngine;
use super::scheduler::Scheduler;
use crate::definition::WorkflowDef;
use crate::factory::TasksFactory;
use crate::handlers::RunContext;
use crate::interp::{Interpolator, NoScripting, NoopHooks, RunHooks, ScriptEvaluator, TemplateInterpolator};
use crate::model::{Workflow, WorkflowStatus};
use crate::session::Session;

/// Typed capability registry: one interface per concern, implementations
/// selected at startup and passed explicitly into every run.
pub struct Capabilities {
    pub invoker: Arc<TaskInvoker>,
    pub retry: Arc<RetryEngine>,
    pub hooks: Arc<dyn RunHooks>,
    pub interpolator: Arc<dyn Interpolator>,
    pub scripting: Arc<dyn ScriptEvaluator>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            invoker: Arc::new(TaskInvoker::new(HandlerRegistry::with_builtins())),
            retry: Arc::new(RetryEngine::new()),
            hooks: Arc::new(NoopHooks),
            interpolator: Arc::new(TemplateInterpolator::new()),
            scripting: Arc::new(NoScripting),
        }
    }
}

pub struct WorkflowRunner {
    capabilities: Arc<Capabilities>,
}

impl WorkflowRunner {
    pub fn new() -> Self {
        Self {
            capabilities: Arc::new(Capabilities::default()),
        }
    }

    pub fn with_capabilities(capabilities: Arc<Capabilities>) -> Self {
        Self { capabilities }
    }

    /// Run a workflow definition to completion. The returned entity carries
    /// the final status: `Completed` with the last batch result as output,
    /// `Error` with the message and partial tree, or `Cancelled` when the
    /// token was observed set.
    #[instrument(skip(self, def, input, cancel), fields(workflow_name = %def.name))]
    pub async fn run(
        &self,
        def: Arc<WorkflowDef>,
        input: Value,
        cancel: CancellationToken,
    ) -> Workflow {
        let mut workflow = Workflow::new(Arc::clone(&def), input);
        info!("Starting workflow run {}", workflow.id);

        let session = Arc::new(Session::new(
            workflow.name.clone(),
            workflow.id.clone(),
            workflow.variables.clone(),
            Arc::clone(&self.capabilities.interpolator),
        ));
        let factory = Arc::new(TasksFactory::new());

        let tasks = match factory.create_tasks(&def.tasks, None) {
            Ok(tasks) => tasks,
            Err(e) => {
                workflow.mark_error(e.to_string());
                return workflow;
            }
        };
        session.register_tasks(&tasks).await;
        workflow.tasks = tasks.clone();

        self.capabilities.hooks.before_workflow(&workflow).await;
        workflow.mark_started();

        let ctx = RunContext {
            session: Arc::clone(&session),
            factory,
            scripting: Arc::clone(&self.capabilities.scripting),
            cancel,
        };
        let scheduler = Scheduler::new(
            Arc::clone(&session),
            Arc::clone(&self.capabilities.invoker),
            Arc::clone(&self.capabilities.retry),
            Arc::clone(&self.capabilities.hooks),
            ctx,
            def.retry.clone(),
        );

        match scheduler.run(&tasks).await {
            Ok(output) => workflow.mark_completed(output),
            Err(e) if e.is_interrupted() => workflow.mark_cancelled(),
            Err(e) => workflow.mark_error(e.to_string()),
        }

        workflow.variables = session.variables_snapshot().await;
        self.capabilities.hooks.after_workflow(&workflow).await;

        info!(
            "Workflow run {} finished with status {}",
            workflow.id, workflow.status
        );
        workflow
    }
}

impl Default for WorkflowRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl Workflow {
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            WorkflowStatus::Completed | WorkflowStatus::Error | WorkflowStatus::Cancelled
        )
    }
}
