pub mod agent;
pub mod config;
pub mod control;
pub mod delegation;
pub mod error;
pub mod guards;
pub mod log;
pub mod orchestration;
pub mod util;

pub use agent::{Agent, AgentIdentity, RunOutcome, RunResult};
pub use control::{Computation, ControlRequest, ControlResponse, Driven, Responder};
pub use delegation::{spawn, DelegationMode, SubAgent};
pub use error::{Error, FailureKind, Result};
pub use orchestration::{OrchestratorResult, ParallelOrchestrator, Task, TaskResult};
