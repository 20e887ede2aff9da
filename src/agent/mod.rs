//! Agents and the reason-act-observe step loop.
//!
//! - [`step`]: step history and memory
//! - [`model`] / [`executor`]: the collaborator seams
//! - [`parse`]: model response to action
//! - [`runner`]: the [`Agent`] and its step loop
//! - [`scripted`]: replay doubles for the CLI and tests

pub mod executor;
pub mod model;
pub mod parse;
pub mod runner;
pub mod scripted;
pub mod step;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use executor::{
    BlockingExecutor, ExecutionContext, ExecutionOutcome, Executor, Invocation, SyncExecutor,
};
pub use model::{ChatMessage, Model, ModelResponse, Role};
pub use runner::{
    Agent, GuardReport, RunOutcome, RunResult, ASK_USER_TOOL, CONFIRM_ACTION_TOOL,
    FINAL_ANSWER_TOOL,
};
pub use step::{Action, Memory, Step, TokenUsage, ToolCall};

/// Unique identifier for an agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who an agent is: a stable name plus a per-instance id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub id: AgentId,
    pub name: String,
}

impl AgentIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(),
            name: name.into(),
        }
    }

    /// Same name, fresh id. Each spawned sub-agent is its own instance.
    pub fn respawn(&self) -> Self {
        Self::new(self.name.clone())
    }
}

impl std::fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.name, self.id.short())
    }
}
