//! Delegation frames: one per spawned sub-agent.

use std::collections::BTreeSet;

use crate::agent::AgentIdentity;
use crate::control::{ControlRequest, ControlResponse};
use crate::{Error, Result};

/// The position of an agent in the delegation tree.
///
/// A root frame has depth 0. Every spawned child sits one level deeper, gets
/// a step budget no larger than what its parent has left, and may only use
/// tools its ancestors allow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationFrame {
    identity: AgentIdentity,
    parent: Option<AgentIdentity>,
    depth: usize,
    max_depth: usize,
    step_budget: usize,
    allowed_tools: Option<BTreeSet<String>>,
}

impl DelegationFrame {
    pub fn root(identity: AgentIdentity, max_depth: usize, step_budget: usize) -> Self {
        Self {
            identity,
            parent: None,
            depth: 0,
            max_depth,
            step_budget,
            allowed_tools: None,
        }
    }

    pub(crate) fn set_step_budget(&mut self, step_budget: usize) {
        self.step_budget = step_budget;
    }

    pub(crate) fn set_max_depth(&mut self, max_depth: usize) {
        self.max_depth = max_depth;
    }

    pub(crate) fn set_allowed_tools(&mut self, tools: Option<BTreeSet<String>>) {
        self.allowed_tools = tools;
    }

    /// Frame for `child`, one level below this one.
    ///
    /// The budget is the smaller of `requested_budget` and
    /// `parent_remaining`. Tool restrictions intersect. Exceeding the depth
    /// cap is a fatal spawn error.
    pub fn spawn_child(
        &self,
        child: AgentIdentity,
        requested_budget: usize,
        parent_remaining: usize,
        requested_tools: Option<&BTreeSet<String>>,
    ) -> Result<Self> {
        let depth = self.depth + 1;
        if depth > self.max_depth {
            return Err(Error::DelegationDepthExceeded {
                depth,
                max: self.max_depth,
            });
        }
        let allowed_tools = match (&self.allowed_tools, requested_tools) {
            (Some(ours), Some(theirs)) => Some(ours.intersection(theirs).cloned().collect()),
            (Some(ours), None) => Some(ours.clone()),
            (None, Some(theirs)) => Some(theirs.clone()),
            (None, None) => None,
        };
        Ok(Self {
            identity: child,
            parent: Some(self.identity.clone()),
            depth,
            max_depth: self.max_depth,
            step_budget: requested_budget.min(parent_remaining),
            allowed_tools,
        })
    }

    /// Wrap a request raised inside this frame for the next frame up.
    pub fn wrap(&self, request: ControlRequest) -> ControlRequest {
        ControlRequest::sub_agent_query(self.identity.clone(), self.depth, request)
    }

    /// Turn the answer to `wrapper` back into an answer to `original`.
    pub fn unwrap_response(
        &self,
        wrapper: &ControlRequest,
        original: &ControlRequest,
        response: ControlResponse,
    ) -> Result<ControlResponse> {
        if response.request_id() != wrapper.id() {
            return Err(Error::MismatchedResponse {
                expected: wrapper.id(),
                got: response.request_id(),
            });
        }
        Ok(response.readdressed(original.id()))
    }

    pub fn allows_tool(&self, name: &str) -> bool {
        self.allowed_tools
            .as_ref()
            .map_or(true, |tools| tools.contains(name))
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn parent(&self) -> Option<&AgentIdentity> {
        self.parent.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn step_budget(&self) -> usize {
        self.step_budget
    }

    pub fn allowed_tools(&self) -> Option<&BTreeSet<String>> {
        self.allowed_tools.as_ref()
    }
}
