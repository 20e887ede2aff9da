//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Canned model responses
//! - Model doubles with behavior (echoing, slow, panicking)
//! - Delegation chains of configurable depth
//! - Script files in temporary directories

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use delve::agent::scripted::{ScriptedExecutor, ScriptedModel};
use delve::agent::{
    ChatMessage, ExecutionOutcome, Model, ModelResponse, Role, ToolCall, ASK_USER_TOOL,
    CONFIRM_ACTION_TOOL, FINAL_ANSWER_TOOL,
};
use delve::{Agent, DelegationMode, Error, Result, SubAgent};

/// A model turn calling `name` with `arguments`.
pub fn tool(name: &str, arguments: serde_json::Value) -> ModelResponse {
    ModelResponse::tool_call(ToolCall::new(name, arguments))
}

/// A model turn giving the final answer.
pub fn answer(text: &str) -> ModelResponse {
    tool(FINAL_ANSWER_TOOL, json!({ "answer": text }))
}

/// An agent replaying `responses`, with an executor that always returns `observation`.
pub fn scripted_agent(name: &str, responses: Vec<ModelResponse>, observation: &str) -> Agent {
    Agent::new(
        name,
        Arc::new(ScriptedModel::new(responses)),
        Arc::new(ScriptedExecutor::always(ExecutionOutcome::output(observation))),
    )
}

/// Opens with a fixed tool call, then answers with the last observation.
///
/// Chaining these makes every level of a delegation tree return exactly what
/// the level below it returned.
pub struct EchoModel {
    opening: ToolCall,
}

impl EchoModel {
    pub fn new(opening: ToolCall) -> Self {
        Self { opening }
    }
}

#[async_trait]
impl Model for EchoModel {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<ModelResponse> {
        match messages.iter().rev().find(|m| m.role == Role::Tool) {
            Some(observation) => Ok(answer(&observation.content)),
            None => Ok(ModelResponse::tool_call(self.opening.clone())),
        }
    }
}

fn echo_agent(name: &str, opening: ToolCall) -> Agent {
    Agent::new(
        name,
        Arc::new(EchoModel::new(opening)),
        Arc::new(ScriptedExecutor::new(vec![])),
    )
}

/// Name of the sub-agent at `level` (1-based) in an echo chain.
pub fn level_name(level: usize) -> String {
    format!("level{}", level)
}

/// A root agent over `depth` nested sub-agents. The deepest one raises
/// `innermost`; every level above delegates to the next and echoes its answer.
pub fn echo_chain(depth: usize, innermost: ToolCall, mode: DelegationMode) -> Agent {
    let mut current = echo_agent(&level_name(depth), innermost);
    for level in (1..depth).rev() {
        let delegate = ToolCall::new(level_name(level + 1), json!({ "task": "go deeper" }));
        current = echo_agent(&level_name(level), delegate)
            .with_sub_agent(SubAgent::new(current, mode));
    }
    let delegate = ToolCall::new(level_name(1), json!({ "task": "go deeper" }));
    echo_agent("root", delegate)
        .with_sub_agent(SubAgent::new(current, mode))
        .with_max_depth(depth.max(1))
}

/// The question the innermost agent of a chain asks.
pub fn ask(question: &str, default: Option<&str>) -> ToolCall {
    let mut arguments = json!({ "question": question });
    if let Some(default) = default {
        arguments["default"] = json!(default);
    }
    ToolCall::new(ASK_USER_TOOL, arguments)
}

pub fn confirm(action: &str, reversible: bool) -> ToolCall {
    ToolCall::new(
        CONFIRM_ACTION_TOOL,
        json!({ "action": action, "description": "test action", "reversible": reversible }),
    )
}

/// Answers the first turn immediately, then sleeps before every later turn.
pub struct SlowAfterFirstModel {
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowAfterFirstModel {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Model for SlowAfterFirstModel {
    async fn generate(&self, _messages: &[ChatMessage]) -> Result<ModelResponse> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            tokio::time::sleep(self.delay).await;
        }
        Ok(tool("search", json!({ "query": "slow" })))
    }
}

/// Panics on its first turn.
pub struct PanickingModel;

#[async_trait]
impl Model for PanickingModel {
    async fn generate(&self, _messages: &[ChatMessage]) -> Result<ModelResponse> {
        panic!("model crashed");
    }
}

/// Fails every turn as an infrastructure error.
pub struct FailingModel;

#[async_trait]
impl Model for FailingModel {
    async fn generate(&self, _messages: &[ChatMessage]) -> Result<ModelResponse> {
        Err(Error::Model("upstream unavailable".to_string()))
    }
}

/// A directory holding script files for CLI-style tests.
pub struct ScriptDir {
    /// The temporary directory containing the scripts.
    pub temp_dir: TempDir,
}

impl ScriptDir {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Write a script answering `answer` after one search step.
    pub fn answering(&self, file: &str, task: &str, answer: &str) -> PathBuf {
        let body = format!(
            r#"task = "{task}"
max_steps = 4

[[responses]]
tool_calls = [{{ name = "search", arguments = {{ query = "{task}" }} }}]

[[responses]]
tool_calls = [{{ name = "final_answer", arguments = {{ answer = "{answer}" }} }}]

[[outcomes]]
output = "notes on {task}"
"#
        );
        let path = self.temp_dir.path().join(file);
        std::fs::write(&path, body).expect("Failed to write script");
        path
    }
}
