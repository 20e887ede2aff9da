use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::DelegationFrame;
use crate::agent::{Agent, RunResult};
use crate::control::{detached, request_or_default, Driven};
use crate::Result;

/// How a parent runs a sub-agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationMode {
    /// Run to completion; control requests inside resolve to defaults.
    #[default]
    Sync,
    /// Drive as a nested computation, bubbling control requests upward.
    Cooperative,
}

/// A named agent a parent can delegate to.
///
/// The wrapped agent is a template: every delegation runs a fresh copy with
/// empty memory, so calls never see each other's steps.
#[derive(Clone)]
pub struct SubAgent {
    agent: Agent,
    mode: DelegationMode,
}

impl SubAgent {
    pub fn new(agent: Agent, mode: DelegationMode) -> Self {
        Self { agent, mode }
    }

    pub fn sync(agent: Agent) -> Self {
        Self::new(agent, DelegationMode::Sync)
    }

    pub fn cooperative(agent: Agent) -> Self {
        Self::new(agent, DelegationMode::Cooperative)
    }

    pub fn name(&self) -> &str {
        &self.agent.identity().name
    }

    pub fn description(&self) -> &str {
        self.agent.description()
    }

    pub fn mode(&self) -> DelegationMode {
        self.mode
    }

    pub fn template(&self) -> &Agent {
        &self.agent
    }
}

/// Spawn a fresh instance of `sub` below `parent` and run it on `task`.
///
/// The child gets its own [`DelegationFrame`] one level below `parent`, with
/// a step budget capped by `parent_remaining`. Spawning past the parent's
/// depth cap fails with [`Error::DelegationDepthExceeded`](crate::Error)
/// before anything runs. Returns a boxed future because the step loop
/// reaches this recursively.
pub fn spawn(
    parent: &DelegationFrame,
    parent_remaining: usize,
    sub: &SubAgent,
    task: impl Into<String>,
) -> BoxFuture<'static, Result<RunResult>> {
    let child = sub.template().instantiate_below(parent, parent_remaining);
    let mode = sub.mode();
    let task = task.into();
    async move {
        let mut child = child?;
        info!(
            child = %child.identity(),
            depth = child.frame().depth(),
            budget = child.max_steps(),
            ?mode,
            "spawning sub-agent"
        );
        match mode {
            DelegationMode::Sync => detached(child.execute(&task)).await,
            DelegationMode::Cooperative => run_cooperative(child, task).await,
        }
    }
    .boxed()
}

async fn run_cooperative(child: Agent, task: String) -> Result<RunResult> {
    let frame = child.frame().clone();
    let mut computation = child.start(task);
    let mut state = computation.start().await?;
    loop {
        match state {
            Driven::Completed(result) => return Ok(result),
            Driven::Suspended(request) => {
                let wrapper = frame.wrap(request.clone());
                info!(
                    child = %frame.identity(),
                    depth = frame.depth(),
                    request_id = %request.id(),
                    wrapper_id = %wrapper.id(),
                    "bubbling control request"
                );
                let answer = request_or_default(wrapper.clone()).await?;
                let answer = frame.unwrap_response(&wrapper, &request, answer)?;
                state = computation.resume(answer).await?;
            }
        }
    }
}
