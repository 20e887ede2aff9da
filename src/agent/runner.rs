//! The step loop.
//!
//! ```text
//!  ┌──────────────► generate ──► parse ──► execute ──► append step
//!  │                                                        │
//!  └── guidance ◄── guards ◄──── final answer? ── no ◄──────┘
//!                                     │ yes
//!                                     ▼
//!                                FinalAnswer
//! ```
//!
//! The loop ends with a final answer, with `MaxStepsReached` once the step
//! ceiling is hit, or with an `Err` for infrastructure failures. Action
//! failures never leave the loop: they are recorded on the step and shown to
//! the model on the next turn.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};

use super::executor::{ExecutionContext, ExecutionOutcome, Executor, Invocation};
use super::model::{ChatMessage, Model, ModelResponse};
use super::parse::parse_response;
use super::step::{Action, Memory, Step, TokenUsage, ToolCall};
use super::AgentIdentity;
use crate::config::{Config, GuardConfig};
use crate::control::{detached, request_or_default, Computation, ControlRequest};
use crate::delegation::{spawn, DelegationFrame, SubAgent};
use crate::guards::{Detection, GuardSet};
use crate::util::truncate;
use crate::{Error, Result};

pub const FINAL_ANSWER_TOOL: &str = "final_answer";
pub const ASK_USER_TOOL: &str = "ask_user";
pub const CONFIRM_ACTION_TOOL: &str = "confirm_action";

const DEFAULT_SYSTEM_PROMPT: &str = "You solve tasks step by step. At each step, call one \
    tool or write one fenced code block. When you know the answer, call `final_answer` with \
    an `answer` argument.";

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunOutcome {
    FinalAnswer { answer: String },
    /// The step ceiling was hit. `partial` is the last observation.
    MaxStepsReached { partial: String },
}

/// A guard detection and the step that triggered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardReport {
    pub step: usize,
    pub detection: Detection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub agent: AgentIdentity,
    pub outcome: RunOutcome,
    pub steps: Vec<Step>,
    pub usage: TokenUsage,
    pub reports: Vec<GuardReport>,
}

impl RunResult {
    /// The final answer, or the partial result when the ceiling was hit.
    pub fn output(&self) -> &str {
        match &self.outcome {
            RunOutcome::FinalAnswer { answer } => answer,
            RunOutcome::MaxStepsReached { partial } => partial,
        }
    }

    pub fn is_final_answer(&self) -> bool {
        matches!(self.outcome, RunOutcome::FinalAnswer { .. })
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

/// What one tool call contributed to a step.
#[derive(Debug, Default)]
struct ToolOutcome {
    observation: Option<String>,
    error: Option<String>,
    final_answer: Option<String>,
    usage: TokenUsage,
}

impl ToolOutcome {
    fn observation(text: impl Into<String>) -> Self {
        Self {
            observation: Some(text.into()),
            ..Default::default()
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            error: Some(text.into()),
            ..Default::default()
        }
    }

    fn from_execution(outcome: ExecutionOutcome) -> Self {
        let observation = outcome.observation();
        let final_answer = outcome.is_final_answer.then(|| outcome.output.clone());
        Self {
            observation: (!observation.is_empty()).then_some(observation),
            error: outcome.error,
            final_answer,
            usage: TokenUsage::default(),
        }
    }
}

/// An LLM-directed agent with its own memory.
#[derive(Clone)]
pub struct Agent {
    identity: AgentIdentity,
    description: String,
    model: Arc<dyn Model>,
    executor: Arc<dyn Executor>,
    system_prompt: String,
    executor_timeout: Option<Duration>,
    model_timeout: Option<Duration>,
    guards: GuardSet,
    frame: DelegationFrame,
    sub_agents: Vec<SubAgent>,
    memory: Memory,
}

impl Agent {
    pub fn new(name: impl Into<String>, model: Arc<dyn Model>, executor: Arc<dyn Executor>) -> Self {
        Self::from_config(name, &Config::default(), model, executor)
    }

    pub fn from_config(
        name: impl Into<String>,
        config: &Config,
        model: Arc<dyn Model>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let identity = AgentIdentity::new(name);
        let system_prompt = config
            .agent
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        Self {
            frame: DelegationFrame::root(
                identity.clone(),
                config.delegation.max_depth,
                config.agent.max_steps,
            ),
            identity,
            description: String::new(),
            model,
            executor,
            memory: Memory::new(system_prompt.clone()),
            system_prompt,
            executor_timeout: config.agent.executor_timeout(),
            model_timeout: config.agent.model_timeout(),
            guards: GuardSet::new(config.guards.clone()),
            sub_agents: Vec::new(),
        }
    }

    /// One-line summary shown to parents that delegate to this agent.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self.memory = Memory::new(self.system_prompt.clone());
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.frame.set_step_budget(max_steps);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.frame.set_max_depth(max_depth);
        self
    }

    /// Restrict executor tools and sub-agents to `tools`. Built-in control
    /// tools stay available.
    pub fn with_allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.frame
            .set_allowed_tools(Some(tools.into_iter().map(Into::into).collect::<BTreeSet<_>>()));
        self
    }

    pub fn with_guards(mut self, config: GuardConfig) -> Self {
        self.guards = GuardSet::new(config);
        self
    }

    pub fn with_executor_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.executor_timeout = timeout;
        self
    }

    pub fn with_model_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn with_sub_agent(mut self, sub_agent: SubAgent) -> Self {
        self.sub_agents.push(sub_agent);
        self
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn frame(&self) -> &DelegationFrame {
        &self.frame
    }

    pub fn max_steps(&self) -> usize {
        self.frame.step_budget()
    }

    pub fn sub_agents(&self) -> &[SubAgent] {
        &self.sub_agents
    }

    /// Run `task` to completion. Control requests resolve to their defaults.
    pub async fn run(&mut self, task: &str) -> Result<RunResult> {
        detached(self.execute(task)).await
    }

    /// Run `task` as a suspendable computation. Control requests surface to
    /// whoever drives the returned [`Computation`].
    pub fn start(mut self, task: impl Into<String>) -> Computation<RunResult> {
        let task = task.into();
        Computation::new(async move { self.execute(&task).await })
    }

    pub(crate) async fn execute(&mut self, task: &str) -> Result<RunResult> {
        let span = info_span!(
            "agent",
            agent = %self.identity.name,
            depth = self.frame.depth()
        );
        self.step_loop(task).instrument(span).await
    }

    /// A fresh instance of this template, placed below `parent`.
    pub(crate) fn instantiate_below(
        &self,
        parent: &DelegationFrame,
        parent_remaining: usize,
    ) -> Result<Agent> {
        let identity = self.identity.respawn();
        let frame = parent.spawn_child(
            identity.clone(),
            self.frame.step_budget(),
            parent_remaining,
            self.frame.allowed_tools(),
        )?;
        let mut child = self.clone();
        child.identity = identity;
        child.frame = frame;
        child.memory = Memory::new(self.system_prompt.clone());
        Ok(child)
    }

    async fn step_loop(&mut self, task: &str) -> Result<RunResult> {
        self.memory = Memory::new(self.render_system_prompt());
        self.memory.begin(task);

        let mut ceiling = self.frame.step_budget();
        let mut reports = Vec::new();
        let mut pending_guidance: Option<String> = None;
        info!(task = %truncate(task, 80), max_steps = ceiling, "run started");

        let mut number = 0;
        while number < ceiling {
            number += 1;
            let context = ExecutionContext {
                timeout: self.executor_timeout,
                remaining_steps: ceiling - number + 1,
                step_number: number,
            };

            let messages = self.memory.to_messages(pending_guidance.as_deref());
            let response = self.generate(&messages).await?;
            let step = self
                .act(response, &context)
                .await?
                .with_guidance(pending_guidance.take());
            debug!(
                step = number,
                observation = %truncate(step.observation.as_deref().unwrap_or_default(), 120),
                error = ?step.error,
                "step completed"
            );

            let answer = step.final_answer.clone();
            self.memory.push(step)?;
            if let Some(answer) = answer {
                info!(steps = number, "final answer");
                return Ok(self.finish(RunOutcome::FinalAnswer { answer }, reports));
            }

            let mut severe = false;
            let mut guidance = Vec::new();
            for detection in self.guards.check(task, self.memory.steps()) {
                warn!(
                    step = number,
                    pattern = %detection.pattern,
                    count = detection.count,
                    severity = ?detection.severity,
                    "guard triggered"
                );
                severe |= detection.is_severe_drift();
                guidance.push(detection.guidance.clone());
                reports.push(GuardReport {
                    step: number,
                    detection,
                });
            }
            if !guidance.is_empty() {
                pending_guidance = Some(guidance.join("\n\n"));
            }
            if severe && self.guards.config().final_step_on_severe_drift && ceiling > number + 1 {
                info!(step = number, "severe drift, granting one final step");
                ceiling = number + 1;
            }
        }

        let partial = self
            .memory
            .last()
            .and_then(|step| step.observation.clone())
            .unwrap_or_default();
        warn!(steps = number, "step limit reached without a final answer");
        Ok(self.finish(RunOutcome::MaxStepsReached { partial }, reports))
    }

    fn finish(&self, outcome: RunOutcome, reports: Vec<GuardReport>) -> RunResult {
        RunResult {
            agent: self.identity.clone(),
            outcome,
            steps: self.memory.steps().to_vec(),
            usage: self.memory.total_usage(),
            reports,
        }
    }

    fn render_system_prompt(&self) -> String {
        let mut prompt = self.system_prompt.clone();
        prompt.push_str("\n\nBuilt-in tools:\n");
        prompt.push_str(&format!("- {}(answer): finish with your answer\n", FINAL_ANSWER_TOOL));
        prompt.push_str(&format!(
            "- {}(question, choices?, default?, timeout_secs?): ask the user\n",
            ASK_USER_TOOL
        ));
        prompt.push_str(&format!(
            "- {}(action, description, reversible, timeout_secs?): ask before acting\n",
            CONFIRM_ACTION_TOOL
        ));
        let delegates: Vec<&SubAgent> = self
            .sub_agents
            .iter()
            .filter(|sub| self.frame.allows_tool(sub.name()))
            .collect();
        if !delegates.is_empty() {
            prompt.push_str("\nAgents you can delegate to (call by name with a `task` argument):\n");
            for sub in delegates {
                prompt.push_str(&format!("- {}: {}\n", sub.name(), sub.description()));
            }
        }
        prompt
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<ModelResponse> {
        match self.model_timeout {
            Some(limit) => tokio::time::timeout(limit, self.model.generate(messages))
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => self.model.generate(messages).await,
        }
    }

    async fn act(&self, response: ModelResponse, context: &ExecutionContext) -> Result<Step> {
        let number = context.step_number;
        let mut usage = response.usage;
        let action = match parse_response(&response) {
            Ok(action) => action,
            Err(message) => {
                debug!(step = number, "model response had no action");
                return Ok(Step::new(
                    number,
                    Action::Text {
                        content: response.text,
                    },
                    usage,
                )
                .with_error(message));
            }
        };

        let mut observations = Vec::new();
        let mut errors = Vec::new();
        let mut final_answer = None;
        match &action {
            Action::ToolCalls { calls } => {
                for call in calls {
                    let outcome = self.dispatch(call, context).await?;
                    usage += outcome.usage;
                    observations.extend(outcome.observation);
                    errors.extend(outcome.error);
                    if outcome.final_answer.is_some() {
                        final_answer = outcome.final_answer;
                        break;
                    }
                }
            }
            Action::Code { source } => {
                let outcome =
                    ToolOutcome::from_execution(self.invoke(Invocation::Code(source.clone()), context).await?);
                observations.extend(outcome.observation);
                errors.extend(outcome.error);
                final_answer = outcome.final_answer;
            }
            Action::Text { .. } => errors.push("No executable action.".to_string()),
        }

        let mut step = Step::new(number, action, usage);
        if !observations.is_empty() {
            step = step.with_observation(observations.join("\n"));
        }
        if !errors.is_empty() {
            step = step.with_error(errors.join("\n"));
        }
        if let Some(answer) = final_answer {
            step = step.with_final_answer(answer);
        }
        Ok(step)
    }

    async fn dispatch(&self, call: &ToolCall, context: &ExecutionContext) -> Result<ToolOutcome> {
        match call.name.as_str() {
            FINAL_ANSWER_TOOL => {
                let answer = call
                    .arguments
                    .get("answer")
                    .map(value_text)
                    .unwrap_or_else(|| value_text(&call.arguments));
                Ok(ToolOutcome {
                    final_answer: Some(answer),
                    ..Default::default()
                })
            }
            ASK_USER_TOOL => {
                let Some(question) = call.str_arg("question").or_else(|| call.str_arg("prompt"))
                else {
                    return Ok(ToolOutcome::error(format!(
                        "`{}` requires a `question` argument",
                        ASK_USER_TOOL
                    )));
                };
                let choices = call
                    .arguments
                    .get("choices")
                    .and_then(|v| v.as_array())
                    .map(|items| items.iter().map(value_text).collect())
                    .unwrap_or_default();
                let default = call.str_arg("default").map(str::to_string);
                let request =
                    with_answer_timeout(ControlRequest::ask_user(question, choices, default), call);
                let response = request_or_default(request).await?;
                Ok(ToolOutcome::observation(response.render()))
            }
            CONFIRM_ACTION_TOOL => {
                let action = call.str_arg("action").unwrap_or("unnamed action");
                let description = call.str_arg("description").unwrap_or_default();
                let reversible = call
                    .arguments
                    .get("reversible")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let request = with_answer_timeout(
                    ControlRequest::confirm_action(action, description, reversible),
                    call,
                );
                let response = request_or_default(request).await?;
                let observation = match response.approved() {
                    Some(true) => format!("Action `{}` approved.", action),
                    Some(false) => format!("Action `{}` denied. Do not perform it.", action),
                    None => response.render(),
                };
                Ok(ToolOutcome::observation(observation))
            }
            name if !self.frame.allows_tool(name) => Ok(ToolOutcome::error(format!(
                "Tool `{}` is not allowed for agent `{}`",
                name, self.identity.name
            ))),
            name => match self.sub_agents.iter().find(|sub| sub.name() == name) {
                Some(sub) => self.delegate(sub, call, context).await,
                None => Ok(ToolOutcome::from_execution(
                    self.invoke(Invocation::Tool(call.clone()), context).await?,
                )),
            },
        }
    }

    async fn delegate(
        &self,
        sub: &SubAgent,
        call: &ToolCall,
        context: &ExecutionContext,
    ) -> Result<ToolOutcome> {
        let Some(task) = call.str_arg("task") else {
            return Ok(ToolOutcome::error(format!(
                "Sub-agent `{}` requires a `task` argument",
                sub.name()
            )));
        };
        let result = spawn(&self.frame, context.remaining_steps, sub, task).await?;
        let observation = match &result.outcome {
            RunOutcome::FinalAnswer { answer } => answer.clone(),
            RunOutcome::MaxStepsReached { partial } => format!(
                "Sub-agent `{}` stopped after {} steps without a final answer. Last observation: {}",
                sub.name(),
                result.step_count(),
                partial
            ),
        };
        Ok(ToolOutcome {
            observation: Some(observation),
            usage: result.usage,
            ..Default::default()
        })
    }

    async fn invoke(
        &self,
        invocation: Invocation,
        context: &ExecutionContext,
    ) -> Result<ExecutionOutcome> {
        let execution = self.executor.execute(&invocation, context);
        let result = match context.timeout {
            Some(limit) => tokio::time::timeout(limit, execution)
                .await
                .unwrap_or(Err(Error::Timeout(limit))),
            None => execution.await,
        };
        match result {
            Err(Error::Timeout(limit)) => {
                warn!(step = context.step_number, ?limit, "action timed out");
                Ok(ExecutionOutcome::failed(format!(
                    "Action timed out after {:?}",
                    limit
                )))
            }
            other => other,
        }
    }
}

/// Attach the call's optional `timeout_secs` argument to `request`.
fn with_answer_timeout(request: ControlRequest, call: &ToolCall) -> ControlRequest {
    let secs = call
        .arguments
        .get("timeout_secs")
        .and_then(|v| v.as_f64())
        .filter(|secs| secs.is_finite() && *secs > 0.0);
    match secs {
        Some(secs) => request.with_timeout(Duration::from_secs_f64(secs)),
        None => request,
    }
}

/// Strings as-is, everything else as JSON.
fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("identity", &self.identity)
            .field("frame", &self.frame)
            .field("sub_agents", &self.sub_agents.len())
            .field("steps", &self.memory.len())
            .finish_non_exhaustive()
    }
}
