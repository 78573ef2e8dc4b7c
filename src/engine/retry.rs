// ABOUTME: Retry engine wrapping every task invocation with a backoff policy
// ABOUTME: Resolves policy task -> ancestor -> workflow -> defaults; waits are cancellable

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::{EngineError, Result};
use crate::definition::{RetryDef, RetryStrategy};
use crate::model::TaskRef;
use crate::session::Session;

const DEFAULT_RETRY_COUNT: u32 = 3;
const MAX_RETRY_COUNT: u32 = 10;
const DEFAULT_DELAY_SECONDS: f64 = 3.0;

#[derive(Debug, Clone, Copy)]
pub struct RetryOptions {
    /// Number of retries after the first attempt, capped at 10.
    pub count: u32,
    pub strategy: RetryStrategy,
    pub delay_seconds: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            count: DEFAULT_RETRY_COUNT,
            strategy: RetryStrategy::Fixed,
            delay_seconds: DEFAULT_DELAY_SECONDS,
        }
    }
}

impl RetryOptions {
    pub fn from_def(def: &RetryDef) -> Self {
        let defaults = Self::default();
        Self {
            count: def.count.unwrap_or(defaults.count).min(MAX_RETRY_COUNT),
            strategy: def.strategy.unwrap_or(defaults.strategy),
            delay_seconds: def.delay_seconds.unwrap_or(defaults.delay_seconds),
        }
    }

    /// Delay before retry `attempt` (0-based), by strategy.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let d = self.delay_seconds;
        let millis = match self.strategy {
            RetryStrategy::Fixed => d * 1000.0,
            RetryStrategy::ExponentialBackoff => d * f64::from(2u32.pow(attempt)) * 1000.0,
            RetryStrategy::LinearBackoff => d * 1.5 * f64::from(attempt) * 1000.0,
        };
        Duration::from_millis(millis as u64)
    }
}

/// Resolve the retry policy for a task: its own definition first, else the
/// nearest ancestor definition carrying one, else the workflow-level policy,
/// else defaults.
pub async fn resolve_retry_options(
    task: &TaskRef,
    session: &Session,
    workflow_retry: Option<&RetryDef>,
) -> RetryOptions {
    let (task_id, own) = {
        let guard = task.read().await;
        (guard.id.clone(), guard.def.retry.clone())
    };
    if let Some(def) = own {
        return RetryOptions::from_def(&def);
    }

    if let Some(ancestor) = session
        .find_ancestor(&task_id, |t| t.def.retry.is_some())
        .await
    {
        let def = ancestor.read().await.def.retry.clone();
        if let Some(def) = def {
            return RetryOptions::from_def(&def);
        }
    }

    match workflow_retry {
        Some(def) => RetryOptions::from_def(def),
        None => RetryOptions::default(),
    }
}

pub struct RetryEngine;

impl RetryEngine {
    pub fn new() -> Self {
        Self
    }

    /// Run `job`, retrying per `options` while `should_retry` approves the
    /// error. The cancellation signal is checked before every attempt and
    /// during every wait; observing it raises `Interrupted`, never an
    /// ordinary failure. A spent budget re-raises the original error
    /// unwrapped.
    pub async fn retry<T, F, Fut, P>(
        &self,
        mut job: F,
        should_retry: P,
        retryable: &TaskRef,
        options: &RetryOptions,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&EngineError) -> bool,
    {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Interrupted);
            }

            match job().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_interrupted() => return Err(e),
                Err(e) => {
                    if cancel.is_cancelled() {
                        return Err(EngineError::Interrupted);
                    }
                    if !should_retry(&e) || attempt >= options.count {
                        return Err(e);
                    }

                    retryable.write().await.increment_retry();
                    let delay = options.delay_for(attempt);
                    debug!(
                        "Retrying after {:?} (attempt {}/{}): {}",
                        delay,
                        attempt + 1,
                        options.count,
                        e
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(EngineError::Interrupted),
                        _ = sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryEngine {
    fn default() -> Self {
        Self::new()
    }
}
