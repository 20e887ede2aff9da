//! Control-message taxonomy.
//!
//! A [`ControlRequest`] pauses a computation to ask for external input; the
//! matching [`ControlResponse`] resumes it. The set of request kinds is
//! closed: every consumer matches [`RequestKind`] exhaustively.
//!
//! Both types are immutable once built. Fields are private and only shared
//! accessors are exposed, so a request can be handed across task boundaries
//! and rendered by whoever drives the computation without anyone being able
//! to alter it on the way.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentIdentity;

/// Unique identifier pairing a request with its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Create a new unique request identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The closed set of reasons a computation can pause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RequestKind {
    /// Free-form question for a human.
    AskUser {
        /// Question text.
        prompt: String,
        /// Suggested answers, possibly empty.
        choices: Vec<String>,
        /// Answer used when nobody is there to respond.
        default: Option<String>,
    },
    /// Approve/deny gate in front of an action.
    ConfirmAction {
        /// Short name of the action awaiting approval.
        action: String,
        /// What the action will do.
        description: String,
        /// Whether the action can be undone. Drives the default decision.
        reversible: bool,
    },
    /// A request raised by a delegated sub-agent, wrapped once per
    /// delegation frame it crossed.
    SubAgentQuery {
        /// The child that raised (or relayed) the request.
        agent: AgentIdentity,
        /// Nesting depth of that child.
        depth: usize,
        /// Id of the wrapped request.
        original_id: RequestId,
        /// The wrapped request itself.
        original: Box<ControlRequest>,
    },
}

/// A request for external input, paired to exactly one [`ControlResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequest {
    id: RequestId,
    kind: RequestKind,
    timeout: Option<Duration>,
}

impl ControlRequest {
    fn with_kind(kind: RequestKind) -> Self {
        Self {
            id: RequestId::new(),
            kind,
            timeout: None,
        }
    }

    /// Ask a human a question.
    ///
    /// # Example
    ///
    /// ```
    /// use delve::control::ControlRequest;
    ///
    /// let request = ControlRequest::ask_user("Which region?", vec!["eu".into(), "us".into()], None);
    /// assert_eq!(request.default_response().as_value(), Some("eu"));
    /// ```
    pub fn ask_user(prompt: impl Into<String>, choices: Vec<String>, default: Option<String>) -> Self {
        Self::with_kind(RequestKind::AskUser {
            prompt: prompt.into(),
            choices,
            default,
        })
    }

    /// Ask for approval before running an action.
    pub fn confirm_action(
        action: impl Into<String>,
        description: impl Into<String>,
        reversible: bool,
    ) -> Self {
        Self::with_kind(RequestKind::ConfirmAction {
            action: action.into(),
            description: description.into(),
            reversible,
        })
    }

    /// Wrap `original` as raised by the sub-agent `agent` at `depth`.
    ///
    /// The wrapper gets a fresh id and inherits the original's timeout.
    pub fn sub_agent_query(agent: AgentIdentity, depth: usize, original: ControlRequest) -> Self {
        let timeout = original.timeout;
        Self {
            id: RequestId::new(),
            kind: RequestKind::SubAgentQuery {
                agent,
                depth,
                original_id: original.id,
                original: Box::new(original),
            },
            timeout,
        }
    }

    /// Attach an advisory answer timeout for whoever renders the request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Number of sub-agent wrapper layers around the innermost request.
    pub fn wrapper_depth(&self) -> usize {
        match &self.kind {
            RequestKind::SubAgentQuery { original, .. } => 1 + original.wrapper_depth(),
            RequestKind::AskUser { .. } | RequestKind::ConfirmAction { .. } => 0,
        }
    }

    /// The request as originally raised, with every wrapper peeled off.
    pub fn innermost(&self) -> &ControlRequest {
        match &self.kind {
            RequestKind::SubAgentQuery { original, .. } => original.innermost(),
            RequestKind::AskUser { .. } | RequestKind::ConfirmAction { .. } => self,
        }
    }

    /// Agents the request passed through, outermost first.
    pub fn agent_chain(&self) -> Vec<&AgentIdentity> {
        let mut chain = Vec::new();
        let mut current = self;
        while let RequestKind::SubAgentQuery {
            agent, original, ..
        } = &current.kind
        {
            chain.push(agent);
            current = original;
        }
        chain
    }

    /// The answer used when no driver is available to respond.
    ///
    /// - ask-user: the declared default, else the first choice, else empty.
    /// - confirm-action: approve when reversible, deny otherwise.
    /// - sub-agent-query: the wrapped request's default, addressed to the wrapper.
    pub fn default_response(&self) -> ControlResponse {
        match &self.kind {
            RequestKind::AskUser {
                choices, default, ..
            } => {
                let value = default
                    .clone()
                    .or_else(|| choices.first().cloned())
                    .unwrap_or_default();
                ControlResponse::value(self.id, value)
            }
            RequestKind::ConfirmAction { reversible, .. } => {
                let decision = if *reversible {
                    Decision::Approve
                } else {
                    Decision::Deny
                };
                ControlResponse::decision(self.id, decision)
            }
            RequestKind::SubAgentQuery { original, .. } => {
                original.default_response().readdressed(self.id)
            }
        }
    }

    /// Answer this request with a value.
    pub fn answer(&self, value: impl Into<String>) -> ControlResponse {
        ControlResponse::value(self.id, value)
    }

    /// Approve this request.
    pub fn approve(&self) -> ControlResponse {
        ControlResponse::decision(self.id, Decision::Approve)
    }

    /// Deny this request.
    pub fn deny(&self) -> ControlResponse {
        ControlResponse::decision(self.id, Decision::Deny)
    }

    /// Human-readable rendering, one line per wrapper layer.
    pub fn render(&self) -> String {
        match &self.kind {
            RequestKind::AskUser {
                prompt,
                choices,
                default,
            } => {
                let mut out = prompt.clone();
                if !choices.is_empty() {
                    out.push_str(&format!(" [{}]", choices.join("/")));
                }
                if let Some(default) = default {
                    out.push_str(&format!(" (default: {})", default));
                }
                out
            }
            RequestKind::ConfirmAction {
                action,
                description,
                reversible,
            } => {
                let tag = if *reversible { "" } else { " [irreversible]" };
                format!("Allow `{}`{}? {}", action, tag, description)
            }
            RequestKind::SubAgentQuery {
                agent,
                depth,
                original,
                ..
            } => format!(
                "[{} @ depth {}]\n{}",
                agent.name,
                depth,
                original.render()
            ),
        }
    }
}

/// Approve/deny outcome for a confirm-action request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Deny,
}

/// Payload carried by a [`ControlResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "data")]
pub enum ResponsePayload {
    Value(String),
    Decision(Decision),
}

/// The answer to exactly one [`ControlRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    request_id: RequestId,
    payload: ResponsePayload,
}

impl ControlResponse {
    pub fn value(request_id: RequestId, value: impl Into<String>) -> Self {
        Self {
            request_id,
            payload: ResponsePayload::Value(value.into()),
        }
    }

    pub fn decision(request_id: RequestId, decision: Decision) -> Self {
        Self {
            request_id,
            payload: ResponsePayload::Decision(decision),
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn payload(&self) -> &ResponsePayload {
        &self.payload
    }

    pub fn as_value(&self) -> Option<&str> {
        match &self.payload {
            ResponsePayload::Value(value) => Some(value),
            ResponsePayload::Decision(_) => None,
        }
    }

    /// Whether the response approves, accepting typed yes/no answers too.
    ///
    /// Returns `None` for a free-text value that is neither.
    pub fn approved(&self) -> Option<bool> {
        match &self.payload {
            ResponsePayload::Decision(decision) => Some(*decision == Decision::Approve),
            ResponsePayload::Value(value) => match value.trim().to_lowercase().as_str() {
                "y" | "yes" | "approve" | "approved" | "true" => Some(true),
                "n" | "no" | "deny" | "denied" | "false" => Some(false),
                _ => None,
            },
        }
    }

    /// Same payload, addressed to a different request.
    pub(crate) fn readdressed(&self, request_id: RequestId) -> Self {
        Self {
            request_id,
            payload: self.payload.clone(),
        }
    }

    /// Text form of the payload, used when the answer becomes an observation.
    pub fn render(&self) -> String {
        match &self.payload {
            ResponsePayload::Value(value) => value.clone(),
            ResponsePayload::Decision(Decision::Approve) => "approved".to_string(),
            ResponsePayload::Decision(Decision::Deny) => "denied".to_string(),
        }
    }
}
