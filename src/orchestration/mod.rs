//! Isolated parallel execution of independent tasks.
//!
//! Tasks go in, results come out, both as immutable values. Units never
//! share memory with each other or with the caller.

mod orchestrator;
mod result;
mod task;

pub use orchestrator::{OrchestratorEvent, ParallelOrchestrator, UnitFactory};
pub use result::{OrchestratorResult, TaskFailure, TaskResult, TaskSuccess};
pub use task::{ConfigSnapshot, ConfigValue, Task, TaskId, TraceContext};
