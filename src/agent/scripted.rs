//! Replay collaborators.
//!
//! [`ScriptedModel`] and [`ScriptedExecutor`] answer from a fixed queue, which
//! makes a run fully deterministic. The CLI builds them from a [`Script`]
//! file; tests build them directly. Clones share the same queue and the same
//! call records.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::executor::{ExecutionContext, ExecutionOutcome, Executor, Invocation};
use super::model::{ChatMessage, Model, ModelResponse};
use super::runner::Agent;
use crate::config::Config;
use crate::delegation::{DelegationMode, SubAgent};
use crate::{Error, Result};

#[derive(Default)]
struct ModelState {
    queue: VecDeque<ModelResponse>,
    calls: usize,
    last_messages: Option<Vec<ChatMessage>>,
}

/// A model that replays canned responses in order.
#[derive(Clone, Default)]
pub struct ScriptedModel {
    state: Arc<Mutex<ModelState>>,
    repeat: Option<ModelResponse>,
}

impl ScriptedModel {
    /// Replay `responses`, then fail with [`Error::Model`].
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ModelState {
                queue: responses.into(),
                ..Default::default()
            })),
            repeat: None,
        }
    }

    /// Answer every turn with `response`.
    pub fn repeating(response: ModelResponse) -> Self {
        Self {
            repeat: Some(response),
            ..Self::new(Vec::new())
        }
    }

    /// Number of `generate` calls so far.
    pub fn calls(&self) -> usize {
        self.state.lock().map(|s| s.calls).unwrap_or_default()
    }

    /// Transcript passed to the most recent `generate` call.
    pub fn last_messages(&self) -> Option<Vec<ChatMessage>> {
        self.state.lock().ok().and_then(|s| s.last_messages.clone())
    }
}

#[async_trait]
impl Model for ScriptedModel {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<ModelResponse> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::Model("scripted model state poisoned".to_string()))?;
        state.calls += 1;
        state.last_messages = Some(messages.to_vec());
        state
            .queue
            .pop_front()
            .or_else(|| self.repeat.clone())
            .ok_or_else(|| Error::Model("script exhausted".to_string()))
    }
}

#[derive(Default)]
struct ExecutorState {
    queue: VecDeque<ExecutionOutcome>,
    invocations: Vec<Invocation>,
}

/// An executor that replays canned outcomes and records what it was asked to run.
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    state: Arc<Mutex<ExecutorState>>,
    always: Option<ExecutionOutcome>,
}

impl ScriptedExecutor {
    /// Replay `outcomes`, then fail with [`Error::Executor`].
    pub fn new(outcomes: Vec<ExecutionOutcome>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ExecutorState {
                queue: outcomes.into(),
                invocations: Vec::new(),
            })),
            always: None,
        }
    }

    /// Answer every call with `outcome`.
    pub fn always(outcome: ExecutionOutcome) -> Self {
        Self {
            always: Some(outcome),
            ..Self::new(Vec::new())
        }
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.state
            .lock()
            .map(|s| s.invocations.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(
        &self,
        invocation: &Invocation,
        _context: &ExecutionContext,
    ) -> Result<ExecutionOutcome> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::Executor("scripted executor state poisoned".to_string()))?;
        state.invocations.push(invocation.clone());
        state
            .queue
            .pop_front()
            .or_else(|| self.always.clone())
            .ok_or_else(|| Error::Executor("script exhausted".to_string()))
    }
}

/// A scripted session loaded from TOML.
///
/// ```toml
/// task = "find the release date"
/// max_steps = 5
///
/// [[responses]]
/// tool_calls = [{ name = "search", arguments = { query = "release date" } }]
///
/// [[responses]]
/// text = '{"name": "final_answer", "arguments": {"answer": "May 2015"}}'
///
/// [[outcomes]]
/// output = "Rust 1.0 was released in May 2015"
///
/// [[sub_agents]]
/// name = "researcher"
/// description = "looks things up"
/// mode = "cooperative"
/// responses = [{ tool_calls = [{ name = "final_answer", arguments = { answer = "done" } }] }]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub task: String,
    #[serde(default)]
    pub max_steps: Option<usize>,
    #[serde(default)]
    pub responses: Vec<ModelResponse>,
    #[serde(default)]
    pub outcomes: Vec<ExecutionOutcome>,
    #[serde(default)]
    pub sub_agents: Vec<SubAgentScript>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubAgentScript {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mode: DelegationMode,
    #[serde(default)]
    pub max_steps: Option<usize>,
    #[serde(default)]
    pub responses: Vec<ModelResponse>,
    #[serde(default)]
    pub outcomes: Vec<ExecutionOutcome>,
}

impl Script {
    pub fn load(path: &Path) -> Result<Self> {
        let script: Self = toml::from_str(&std::fs::read_to_string(path)?)?;
        if script.task.trim().is_empty() {
            return Err(Error::Validation(format!(
                "script {} has an empty task",
                path.display()
            )));
        }
        Ok(script)
    }

    /// Build the root agent, with one scripted sub-agent per entry.
    pub fn build_agent(&self, name: &str, config: &Config) -> Agent {
        let mut agent = Agent::from_config(
            name,
            config,
            Arc::new(ScriptedModel::new(self.responses.clone())),
            Arc::new(ScriptedExecutor::new(self.outcomes.clone())),
        );
        if let Some(max_steps) = self.max_steps {
            agent = agent.with_max_steps(max_steps);
        }
        for sub in &self.sub_agents {
            let mut child = Agent::from_config(
                sub.name.as_str(),
                config,
                Arc::new(ScriptedModel::new(sub.responses.clone())),
                Arc::new(ScriptedExecutor::new(sub.outcomes.clone())),
            )
            .with_description(sub.description.as_str());
            if let Some(max_steps) = sub.max_steps {
                child = child.with_max_steps(max_steps);
            }
            agent = agent.with_sub_agent(SubAgent::new(child, sub.mode));
        }
        agent
    }
}
