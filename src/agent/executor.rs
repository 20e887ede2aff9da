//! The action execution seam.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::step::ToolCall;
use crate::util::blocking_within;
use crate::Result;

/// What to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum Invocation {
    Tool(ToolCall),
    Code(String),
}

/// Per-call context handed to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    pub timeout: Option<Duration>,
    /// Steps left in the run, counting the current one.
    pub remaining_steps: usize,
    pub step_number: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub logs: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, rename = "final")]
    pub is_final_answer: bool,
}

impl ExecutionOutcome {
    pub fn output(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn final_answer(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_final_answer: true,
            ..Default::default()
        }
    }

    /// Observation text: output followed by captured logs.
    pub fn observation(&self) -> String {
        match (self.output.is_empty(), self.logs.is_empty()) {
            (_, true) => self.output.clone(),
            (true, false) => self.logs.clone(),
            (false, false) => format!("{}\n{}", self.output, self.logs),
        }
    }
}

/// Runs tool calls and code actions.
///
/// A recoverable action failure belongs in [`ExecutionOutcome::error`]; an
/// `Err` means the executor itself broke and ends the run.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        invocation: &Invocation,
        context: &ExecutionContext,
    ) -> Result<ExecutionOutcome>;
}

/// A synchronous executor, for tools that block.
pub trait SyncExecutor: Send + Sync + 'static {
    fn execute(&self, invocation: &Invocation, context: &ExecutionContext)
        -> Result<ExecutionOutcome>;
}

/// Adapts a [`SyncExecutor`] by running each call on the blocking pool, so a
/// slow tool does not stall the runtime the computation is driven on.
pub struct BlockingExecutor<E> {
    inner: Arc<E>,
    default_timeout: Duration,
}

impl<E: SyncExecutor> BlockingExecutor<E> {
    pub fn new(inner: E, default_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(inner),
            default_timeout,
        }
    }
}

#[async_trait]
impl<E: SyncExecutor> Executor for BlockingExecutor<E> {
    async fn execute(
        &self,
        invocation: &Invocation,
        context: &ExecutionContext,
    ) -> Result<ExecutionOutcome> {
        let inner = Arc::clone(&self.inner);
        let invocation = invocation.clone();
        let context = *context;
        let limit = context.timeout.unwrap_or(self.default_timeout);
        blocking_within(Some(limit), move || inner.execute(&invocation, &context)).await
    }
}
