//! Parallel orchestrator for independent tasks.
//!
//! Each task runs in its own tokio task with its own freshly built agent.
//! Nothing mutable is shared between units: a unit receives its [`Task`] by
//! value and hands back a [`TaskResult`] through its join handle. Failures,
//! timeouts and panics are caught at the unit boundary and turned into
//! `Failure` results, so one unit can never take down its siblings.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, info_span, warn, Instrument};

use super::result::{OrchestratorResult, TaskFailure, TaskResult, TaskSuccess};
use super::task::{Task, TaskId};
use crate::agent::Agent;
use crate::config::OrchestratorConfig;
use crate::error::FailureKind;
use crate::{Error, Result};

/// Builds the agent for one unit.
pub trait UnitFactory: Send + Sync + 'static {
    fn build(&self, task: &Task) -> Result<Agent>;
}

impl<F> UnitFactory for F
where
    F: Fn(&Task) -> Result<Agent> + Send + Sync + 'static,
{
    fn build(&self, task: &Task) -> Result<Agent> {
        self(task)
    }
}

/// Lifecycle events emitted while units run.
///
/// These let observers follow progress without polling.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    /// A unit acquired a concurrency slot and started.
    UnitStarted {
        /// The task the unit runs.
        task_id: TaskId,
        /// Position of the task in the input.
        index: usize,
    },
    /// A unit produced its result.
    UnitFinished {
        task_id: TaskId,
        index: usize,
        success: bool,
        duration: Duration,
    },
}

pub struct ParallelOrchestrator {
    factory: Arc<dyn UnitFactory>,
    max_concurrency: usize,
    default_timeout: Option<Duration>,
    events: Option<mpsc::UnboundedSender<OrchestratorEvent>>,
}

impl ParallelOrchestrator {
    pub fn new(factory: impl UnitFactory) -> Self {
        Self::from_config(&OrchestratorConfig::default(), factory)
    }

    pub fn from_config(config: &OrchestratorConfig, factory: impl UnitFactory) -> Self {
        Self {
            factory: Arc::new(factory),
            max_concurrency: config.max_concurrency.max(1),
            default_timeout: config.default_timeout(),
            events: None,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Timeout for tasks that do not carry their own.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<OrchestratorEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run every task and collect one result per task, in input order.
    pub async fn run_parallel(&self, tasks: Vec<Task>) -> OrchestratorResult {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        info!(
            tasks = tasks.len(),
            max_concurrency = self.max_concurrency,
            "parallel run started"
        );

        let handles: Vec<_> = tasks
            .into_iter()
            .enumerate()
            .map(|(index, task)| {
                let task_id = task.id();
                let factory = Arc::clone(&self.factory);
                let semaphore = Arc::clone(&semaphore);
                let events = self.events.clone();
                let timeout = task.timeout().or(self.default_timeout);
                let handle = tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    emit(&events, OrchestratorEvent::UnitStarted { task_id, index });
                    let result = run_unit(factory.as_ref(), task, timeout).await;
                    emit(
                        &events,
                        OrchestratorEvent::UnitFinished {
                            task_id,
                            index,
                            success: result.is_success(),
                            duration: result.duration(),
                        },
                    );
                    result
                });
                (task_id, handle)
            })
            .collect();

        let results = join_all(handles.into_iter().map(|(task_id, handle)| async move {
            match handle.await {
                Ok(result) => result,
                Err(join_err) => {
                    let kind = if join_err.is_panic() {
                        FailureKind::Panic
                    } else {
                        FailureKind::Internal
                    };
                    TaskResult::Failure(TaskFailure::new(
                        task_id,
                        kind,
                        Error::TaskJoin(join_err.to_string()).to_string(),
                        0,
                        Duration::ZERO,
                    ))
                }
            }
        }))
        .await;

        let result = OrchestratorResult::new(results, started.elapsed());
        info!(
            succeeded = result.success_count(),
            failed = result.failure_count(),
            elapsed_ms = result.wall_time().as_millis() as u64,
            "parallel run finished"
        );
        result
    }
}

fn emit(events: &Option<mpsc::UnboundedSender<OrchestratorEvent>>, event: OrchestratorEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

async fn run_unit(factory: &dyn UnitFactory, task: Task, timeout: Option<Duration>) -> TaskResult {
    let span = info_span!(
        "unit",
        task = %task.id().short(),
        trace = %task.trace().trace_id()
    );
    execute_unit(factory, task, timeout).instrument(span).await
}

async fn execute_unit(factory: &dyn UnitFactory, task: Task, timeout: Option<Duration>) -> TaskResult {
    let started = Instant::now();
    let task_id = task.id();
    let failure = |kind: FailureKind, message: String, partial_steps: usize| {
        warn!(%kind, %message, partial_steps, "unit failed");
        TaskResult::Failure(TaskFailure::new(
            task_id,
            kind,
            message,
            partial_steps,
            started.elapsed(),
        ))
    };

    let built = std::panic::catch_unwind(AssertUnwindSafe(|| factory.build(&task)));
    let mut agent = match built {
        Ok(Ok(agent)) => agent,
        Ok(Err(e)) => return failure(e.kind(), e.to_string(), 0),
        Err(payload) => return failure(FailureKind::Panic, panic_message(payload.as_ref()), 0),
    };

    let run = AssertUnwindSafe(async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, agent.run(task.prompt()))
                .await
                .unwrap_or(Err(Error::Timeout(limit))),
            None => agent.run(task.prompt()).await,
        }
    })
    .catch_unwind()
    .await;

    match run {
        Ok(Ok(result)) => {
            debug!(steps = result.step_count(), "unit succeeded");
            TaskResult::Success(TaskSuccess::new(
                task_id,
                result.output(),
                result.is_final_answer(),
                result.step_count(),
                result.usage,
                started.elapsed(),
            ))
        }
        Ok(Err(e)) => failure(e.kind(), e.to_string(), agent.memory().len()),
        Err(payload) => failure(
            FailureKind::Panic,
            panic_message(payload.as_ref()),
            agent.memory().len(),
        ),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("unit panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("unit panicked: {}", message)
    } else {
        "unit panicked".to_string()
    }
}
