//! Delegation tests.
//!
//! These tests verify that:
//! - Requests from nested sub-agents bubble up wrapped once per level
//! - Answers travel back down to the agent that asked
//! - Depth caps and step budgets are enforced per frame
//! - Synchronous delegation resolves requests to their defaults

use std::sync::Arc;

use serde_json::json;

use delve::agent::scripted::{ScriptedExecutor, ScriptedModel};
use delve::agent::ExecutionOutcome;
use delve::control::{Computation, ControlRequest, DefaultResponder, Driven, RequestKind};
use delve::{spawn, Agent, DelegationMode, Error, RunOutcome, SubAgent};

use crate::fixtures::{answer, ask, confirm, echo_chain, level_name, scripted_agent, tool};

/// Test: Request bubbling through D levels
/// Given a chain of D cooperative sub-agents whose deepest member asks a question
/// When the root is driven
/// Then the driver sees the question wrapped D times, names each level in order,
///      and the answer comes back up unchanged as the root's final answer
#[tokio::test]
async fn test_request_bubbles_through_every_level() {
    for depth in 1..=3 {
        let root = echo_chain(depth, ask("Which region?", Some("eu")), DelegationMode::Cooperative);
        let mut computation = root.start("deploy everywhere");

        let request = match computation.start().await.unwrap() {
            Driven::Suspended(request) => request,
            Driven::Completed(_) => panic!("depth {}: question never surfaced", depth),
        };
        assert_eq!(request.wrapper_depth(), depth);

        let names: Vec<String> = request
            .agent_chain()
            .iter()
            .map(|agent| agent.name.clone())
            .collect();
        let expected: Vec<String> = (1..=depth).map(level_name).collect();
        assert_eq!(names, expected);

        match request.innermost().kind() {
            RequestKind::AskUser { prompt, default, .. } => {
                assert_eq!(prompt, "Which region?");
                assert_eq!(default.as_deref(), Some("eu"));
            }
            other => panic!("depth {}: unexpected innermost {:?}", depth, other),
        }

        let result = match computation.resume(request.answer("ap-south")).await.unwrap() {
            Driven::Completed(result) => result,
            Driven::Suspended(extra) => panic!("depth {}: unexpected request {:?}", depth, extra),
        };
        assert_eq!(result.output(), "ap-south", "depth {}", depth);
    }
}

/// Test: Wrapper depth tags
/// Given a two-level cooperative chain
/// When the question surfaces
/// Then each wrapper records the depth of the child that relayed it
#[tokio::test]
async fn test_wrappers_record_child_depth() {
    let root = echo_chain(2, ask("q?", None), DelegationMode::Cooperative);
    let mut computation = root.start("task");
    let request = match computation.start().await.unwrap() {
        Driven::Suspended(request) => request,
        Driven::Completed(_) => panic!("should suspend"),
    };

    let mut depths = Vec::new();
    let mut current = &request;
    while let RequestKind::SubAgentQuery {
        depth,
        original,
        original_id,
        ..
    } = current.kind()
    {
        assert_eq!(*original_id, original.id());
        depths.push(*depth);
        current = original;
    }
    assert_eq!(depths, vec![1, 2]);
}

/// Test: Default answers match synchronous delegation
/// Given the same chain run cooperatively and synchronously
/// When every request is answered with its default
/// Then both produce the same final answer
#[tokio::test]
async fn test_cooperative_defaults_match_sync() {
    let cooperative = echo_chain(2, ask("Region?", Some("eu")), DelegationMode::Cooperative)
        .start("deploy")
        .drive_with(&DefaultResponder)
        .await
        .unwrap();

    let mut sync = echo_chain(2, ask("Region?", Some("eu")), DelegationMode::Sync);
    let sync = sync.run("deploy").await.unwrap();

    assert_eq!(cooperative.output(), "eu");
    assert_eq!(cooperative.output(), sync.output());
}

/// Test: Undriven cooperative delegation
/// Given a cooperative chain
/// When the root is run without a driver
/// Then nested requests fall back to their defaults
#[tokio::test]
async fn test_cooperative_without_driver_uses_defaults() {
    let mut root = echo_chain(3, ask("Name?", Some("anon")), DelegationMode::Cooperative);
    let result = root.run("greet").await.unwrap();
    assert_eq!(result.output(), "anon");
}

/// Test: Synchronous delegation never surfaces requests
/// Given a synchronous sub-agent that asks for confirmation
/// When the root is driven
/// Then the computation completes without suspending, irreversible actions
///      are denied and reversible ones approved
#[tokio::test]
async fn test_sync_confirmations_default_by_reversibility() {
    for (reversible, expected) in [(false, "denied"), (true, "approved")] {
        let root = echo_chain(1, confirm("drop_table", reversible), DelegationMode::Sync);
        let mut computation = root.start("clean up");
        let result = match computation.start().await.unwrap() {
            Driven::Completed(result) => result,
            Driven::Suspended(request) => panic!("sync child surfaced {:?}", request),
        };
        assert!(
            result.output().contains(expected),
            "reversible={} gave {}",
            reversible,
            result.output()
        );
    }
}

/// Test: Depth cap
/// Given a three-level chain under a root capped at depth 2
/// When the second level tries to delegate
/// Then the whole run fails with a depth error
#[tokio::test]
async fn test_depth_cap_is_fatal() {
    for mode in [DelegationMode::Sync, DelegationMode::Cooperative] {
        let mut root = echo_chain(3, ask("q?", None), mode).with_max_depth(2);
        let err = root.run("too deep").await.unwrap_err();
        assert!(
            matches!(err, Error::DelegationDepthExceeded { depth: 3, max: 2 }),
            "{:?}: {}",
            mode,
            err
        );
    }
}

/// Test: Budget inheritance
/// Given a parent with two steps and a child that never finishes
/// When the parent delegates on its first step
/// Then the child is capped at the parent's two remaining steps
#[tokio::test]
async fn test_child_budget_is_capped_by_parent() {
    let worker = Agent::new(
        "worker",
        Arc::new(ScriptedModel::repeating(tool("dig", json!({ "spot": "garden" })))),
        Arc::new(ScriptedExecutor::always(ExecutionOutcome::output("dirt"))),
    )
    .with_description("digs holes")
    .with_max_steps(20);

    let mut parent = scripted_agent(
        "gardener",
        vec![tool("worker", json!({ "task": "dig in the garden" })), answer("gave up")],
        "unused",
    )
    .with_max_steps(2)
    .with_sub_agent(SubAgent::sync(worker));

    let result = parent.run("dig in the garden").await.unwrap();
    let observation = result.steps[0].observation.as_deref().unwrap_or_default();
    assert!(
        observation.contains("stopped after 2 steps"),
        "observation was {}",
        observation
    );
    assert!(result.is_final_answer());
}

/// Test: Sub-agent calls need a task
/// Given a sub-agent call without a `task` argument
/// When the parent dispatches it
/// Then the step records an error and the run continues
#[tokio::test]
async fn test_sub_agent_call_without_task_is_step_error() {
    let helper = scripted_agent("helper", vec![answer("never")], "unused");
    let mut parent = scripted_agent(
        "lead",
        vec![tool("helper", json!({ "topic": "x" })), answer("done")],
        "unused",
    )
    .with_sub_agent(SubAgent::cooperative(helper));

    let result = parent.run("lead the work").await.unwrap();
    assert!(result.steps[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("`task`")));
    assert_eq!(
        result.outcome,
        RunOutcome::FinalAnswer {
            answer: "done".into()
        }
    );
}

/// Test: Sub-agents start fresh
/// Given a sub-agent delegated to twice
/// When each call completes
/// Then the second call does not see the first call's steps
#[tokio::test]
async fn test_each_delegation_gets_fresh_memory() {
    let helper_model = ScriptedModel::new(vec![answer("first"), answer("second")]);
    let recorder = helper_model.clone();
    let helper = Agent::new(
        "helper",
        Arc::new(helper_model),
        Arc::new(ScriptedExecutor::new(vec![])),
    );
    let mut parent = scripted_agent(
        "lead",
        vec![
            tool("helper", json!({ "task": "one" })),
            tool("helper", json!({ "task": "two" })),
            answer("both done"),
        ],
        "unused",
    )
    .with_sub_agent(SubAgent::sync(helper));

    let result = parent.run("delegate twice").await.unwrap();
    assert_eq!(result.steps[0].observation.as_deref(), Some("first"));
    assert_eq!(result.steps[1].observation.as_deref(), Some("second"));

    let messages = recorder.last_messages().unwrap();
    assert_eq!(messages.len(), 2, "system prompt and task only");
    assert!(messages[1].content.contains("two"));
}

/// Test: Spawning directly
/// Given a parent agent and a sub-agent that asks a question
/// When the sub-agent is spawned cooperatively below the parent's frame
/// Then the driver sees a single wrapper tagged with the child's depth
#[tokio::test]
async fn test_direct_spawn_wraps_once() {
    let parent = scripted_agent("lead", vec![], "unused");
    let sub = SubAgent::cooperative(scripted_agent(
        "solo",
        vec![tool("ask_user", json!({ "question": "ok?" })), answer("fine")],
        "unused",
    ));
    let mut computation = Computation::new(spawn(parent.frame(), 10, &sub, "check in"));

    let request: ControlRequest = match computation.start().await.unwrap() {
        Driven::Suspended(request) => request,
        Driven::Completed(_) => panic!("should suspend"),
    };
    assert_eq!(request.wrapper_depth(), 1);
    assert!(matches!(
        request.kind(),
        RequestKind::SubAgentQuery { depth: 1, .. }
    ));

    let result = match computation.resume(request.answer("yes")).await.unwrap() {
        Driven::Completed(result) => result,
        Driven::Suspended(_) => panic!("should complete"),
    };
    assert_eq!(result.steps[0].observation.as_deref(), Some("yes"));
    assert_eq!(result.output(), "fine");
}

/// Test: Spawning directly past the depth cap
/// Given a parent whose frame allows no delegation
/// When a sub-agent is spawned below it
/// Then the spawn fails with a depth error and the sub-agent never runs
#[tokio::test]
async fn test_direct_spawn_respects_depth_cap() {
    let parent = scripted_agent("lead", vec![], "unused").with_max_depth(0);
    let model = ScriptedModel::new(vec![answer("should not run")]);
    let recorder = model.clone();
    let sub = SubAgent::sync(Agent::new(
        "worker",
        Arc::new(model),
        Arc::new(ScriptedExecutor::new(vec![])),
    ));

    for mode in [DelegationMode::Sync, DelegationMode::Cooperative] {
        let sub = SubAgent::new(sub.template().clone(), mode);
        let err = spawn(parent.frame(), 10, &sub, "t").await.unwrap_err();
        assert!(
            matches!(err, Error::DelegationDepthExceeded { depth: 1, max: 0 }),
            "{:?}: {}",
            mode,
            err
        );
    }
    assert_eq!(recorder.calls(), 0);
}
