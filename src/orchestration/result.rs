//! Per-task results and their aggregate.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::task::TaskId;
use crate::agent::TokenUsage;
use crate::error::FailureKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSuccess {
    task_id: TaskId,
    output: String,
    reached_final_answer: bool,
    steps: usize,
    usage: TokenUsage,
    duration: Duration,
}

impl TaskSuccess {
    pub fn new(
        task_id: TaskId,
        output: impl Into<String>,
        reached_final_answer: bool,
        steps: usize,
        usage: TokenUsage,
        duration: Duration,
    ) -> Self {
        Self {
            task_id,
            output: output.into(),
            reached_final_answer,
            steps,
            usage,
            duration,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    /// `false` when the unit hit its step ceiling and `output` is partial.
    pub fn reached_final_answer(&self) -> bool {
        self.reached_final_answer
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    task_id: TaskId,
    kind: FailureKind,
    message: String,
    partial_steps: usize,
    duration: Duration,
}

impl TaskFailure {
    pub fn new(
        task_id: TaskId,
        kind: FailureKind,
        message: impl Into<String>,
        partial_steps: usize,
        duration: Duration,
    ) -> Self {
        Self {
            task_id,
            kind,
            message: message.into(),
            partial_steps,
            duration,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn partial_steps(&self) -> usize {
        self.partial_steps
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// Outcome of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum TaskResult {
    Success(TaskSuccess),
    Failure(TaskFailure),
}

impl TaskResult {
    pub fn task_id(&self) -> TaskId {
        match self {
            TaskResult::Success(s) => s.task_id(),
            TaskResult::Failure(f) => f.task_id(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskResult::Success(_))
    }

    pub fn duration(&self) -> Duration {
        match self {
            TaskResult::Success(s) => s.duration(),
            TaskResult::Failure(f) => f.duration(),
        }
    }

    /// Completed steps, partial for failures.
    pub fn steps(&self) -> usize {
        match self {
            TaskResult::Success(s) => s.steps(),
            TaskResult::Failure(f) => f.partial_steps(),
        }
    }
}

/// Results of one parallel run, in task input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorResult {
    results: Vec<TaskResult>,
    wall_time: Duration,
}

impl OrchestratorResult {
    pub fn new(results: Vec<TaskResult>, wall_time: Duration) -> Self {
        Self { results, wall_time }
    }

    pub fn results(&self) -> &[TaskResult] {
        &self.results
    }

    pub fn wall_time(&self) -> Duration {
        self.wall_time
    }

    pub fn successes(&self) -> Vec<&TaskSuccess> {
        self.results
            .iter()
            .filter_map(|r| match r {
                TaskResult::Success(s) => Some(s),
                TaskResult::Failure(_) => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<&TaskFailure> {
        self.results
            .iter()
            .filter_map(|r| match r {
                TaskResult::Failure(f) => Some(f),
                TaskResult::Success(_) => None,
            })
            .collect()
    }

    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.results.len() - self.success_count()
    }

    /// Tokens spent by successful units.
    pub fn total_usage(&self) -> TokenUsage {
        self.successes().into_iter().map(|s| s.usage()).sum()
    }

    /// Steps across all units, counting partial steps of failures.
    pub fn total_steps(&self) -> usize {
        self.results.iter().map(TaskResult::steps).sum()
    }

    pub fn outputs(&self) -> Vec<&str> {
        self.successes().into_iter().map(|s| s.output()).collect()
    }

    pub fn error_messages(&self) -> Vec<&str> {
        self.failures().into_iter().map(|f| f.message()).collect()
    }
}
