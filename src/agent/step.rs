//! Step history: the append-only record of one agent run.

use std::iter::Sum;
use std::ops::{Add, AddAssign};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::ChatMessage;
use crate::{Error, Result};

/// Token accounting reported by the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: TokenUsage) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: TokenUsage) {
        *self = *self + rhs;
    }
}

impl Sum for TokenUsage {
    fn sum<I: Iterator<Item = TokenUsage>>(iter: I) -> Self {
        iter.fold(TokenUsage::default(), Add::add)
    }
}

impl<'a> Sum<&'a TokenUsage> for TokenUsage {
    fn sum<I: Iterator<Item = &'a TokenUsage>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// A single tool invocation proposed by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Name plus canonical arguments. Object keys serialize sorted, so two
    /// calls with the same arguments in a different order share a signature.
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.arguments)
    }

    /// String argument by key.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(|v| v.as_str())
    }
}

/// What the agent did in a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Action {
    /// One or more tool calls, executed in order.
    ToolCalls { calls: Vec<ToolCall> },
    /// A generated code snippet.
    Code { source: String },
    /// Model output that could not be turned into an action.
    Text { content: String },
}

impl Action {
    /// Joined signatures of every call, `None` for non-tool actions.
    pub fn tool_signature(&self) -> Option<String> {
        match self {
            Action::ToolCalls { calls } if !calls.is_empty() => Some(
                calls
                    .iter()
                    .map(ToolCall::signature)
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            Action::ToolCalls { .. } | Action::Code { .. } | Action::Text { .. } => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Action::Code { source } => Some(source),
            Action::ToolCalls { .. } | Action::Text { .. } => None,
        }
    }

    /// Text form used in model transcripts and relevance scoring.
    pub fn render(&self) -> String {
        match self {
            Action::ToolCalls { calls } => calls
                .iter()
                .map(|call| format!("Calling tool `{}` with {}", call.name, call.arguments))
                .collect::<Vec<_>>()
                .join("\n"),
            Action::Code { source } => format!("```\n{}\n```", source),
            Action::Text { content } => content.clone(),
        }
    }
}

/// One completed iteration of the step loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub number: usize,
    pub action: Action,
    pub observation: Option<String>,
    pub usage: TokenUsage,
    pub error: Option<String>,
    pub final_answer: Option<String>,
    /// Guard guidance that was shown to the model before this step.
    pub guidance: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Step {
    pub fn new(number: usize, action: Action, usage: TokenUsage) -> Self {
        Self {
            number,
            action,
            observation: None,
            usage,
            error: None,
            final_answer: None,
            guidance: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_observation(mut self, observation: impl Into<String>) -> Self {
        self.observation = Some(observation.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_final_answer(mut self, answer: impl Into<String>) -> Self {
        self.final_answer = Some(answer.into());
        self
    }

    pub fn with_guidance(mut self, guidance: Option<String>) -> Self {
        self.guidance = guidance;
        self
    }

    pub fn is_final(&self) -> bool {
        self.final_answer.is_some()
    }
}

/// Ordered step history plus the fixed system prompt of one agent.
///
/// Steps only ever get appended; [`Memory::steps`] hands out a shared slice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    system_prompt: String,
    task: Option<String>,
    steps: Vec<Step>,
}

impl Memory {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            task: None,
            steps: Vec::new(),
        }
    }

    /// Start a new run: record the task and drop previous steps.
    pub fn begin(&mut self, task: impl Into<String>) {
        self.steps.clear();
        self.task = Some(task.into());
    }

    /// Append the next step. Numbers start at 1 and must be contiguous.
    pub fn push(&mut self, step: Step) -> Result<()> {
        let expected = self.steps.len() + 1;
        if step.number != expected {
            return Err(Error::Validation(format!(
                "step {} appended where step {} was expected",
                step.number, expected
            )));
        }
        self.steps.push(step);
        Ok(())
    }

    /// Clear steps, keep the system prompt.
    pub fn reset(&mut self) {
        self.steps.clear();
        self.task = None;
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn task(&self) -> Option<&str> {
        self.task.as_deref()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn last(&self) -> Option<&Step> {
        self.steps.last()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn total_usage(&self) -> TokenUsage {
        self.steps.iter().map(|step| &step.usage).sum()
    }

    /// Render the transcript for the model.
    ///
    /// `pending_guidance` is appended last, for the step about to be generated.
    pub fn to_messages(&self, pending_guidance: Option<&str>) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2 + self.steps.len() * 3);
        messages.push(ChatMessage::system(&self.system_prompt));
        if let Some(task) = &self.task {
            messages.push(ChatMessage::user(format!("Task: {}", task)));
        }
        for step in &self.steps {
            if let Some(guidance) = &step.guidance {
                messages.push(ChatMessage::user(guidance));
            }
            messages.push(ChatMessage::assistant(step.action.render()));
            if let Some(observation) = &step.observation {
                messages.push(ChatMessage::tool(observation));
            }
            if let Some(error) = &step.error {
                messages.push(ChatMessage::user(format!("Error: {}", error)));
            }
        }
        if let Some(guidance) = pending_guidance {
            messages.push(ChatMessage::user(guidance));
        }
        messages
    }
}
