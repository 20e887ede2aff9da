//! Suspension and resumption tests.
//!
//! These tests verify the request/response protocol between a driven agent
//! and its driver.

use serde_json::json;

use delve::control::{
    ensure_context, suspend, ControlRequest, ControlResponse, Driven, RequestId, RequestKind,
};
use delve::{Error, FailureKind, RunOutcome};

use crate::fixtures::{answer, scripted_agent, tool};

/// Test: Matching resume
/// Given an agent that asks the user a question
/// When the driver resumes with a response carrying the request's id
/// Then the agent observes exactly the supplied value and proceeds
#[tokio::test]
async fn test_matching_resume_yields_supplied_value() {
    let agent = scripted_agent(
        "asker",
        vec![
            tool("ask_user", json!({ "question": "Which color?", "choices": ["red", "blue"] })),
            answer("painted"),
        ],
        "unused",
    );
    let mut computation = agent.start("paint the fence");

    let request = match computation.start().await.unwrap() {
        Driven::Suspended(request) => request,
        Driven::Completed(_) => panic!("agent should ask before finishing"),
    };
    match request.kind() {
        RequestKind::AskUser { prompt, choices, .. } => {
            assert_eq!(prompt, "Which color?");
            assert_eq!(choices, &vec!["red".to_string(), "blue".to_string()]);
        }
        other => panic!("unexpected request {:?}", other),
    }
    assert_eq!(computation.pending().map(ControlRequest::id), Some(request.id()));

    let result = match computation.resume(request.answer("blue")).await.unwrap() {
        Driven::Completed(result) => result,
        Driven::Suspended(_) => panic!("agent should finish after one question"),
    };
    assert_eq!(result.steps[0].observation.as_deref(), Some("blue"));
    assert_eq!(
        result.outcome,
        RunOutcome::FinalAnswer {
            answer: "painted".into()
        }
    );
}

/// Test: Mismatched resume
/// Given a suspended agent
/// When the driver resumes with a response for some other request
/// Then the protocol is violated fatally and the computation is dead
#[tokio::test]
async fn test_mismatched_resume_is_fatal() {
    let agent = scripted_agent(
        "asker",
        vec![tool("ask_user", json!({ "question": "?" })), answer("x")],
        "unused",
    );
    let mut computation = agent.start("task");
    let request = match computation.start().await.unwrap() {
        Driven::Suspended(request) => request,
        Driven::Completed(_) => panic!("should suspend"),
    };

    let stray = ControlResponse::value(RequestId::new(), "blue");
    let err = computation.resume(stray).await.unwrap_err();
    assert!(err.is_protocol_violation());
    assert!(matches!(err, Error::MismatchedResponse { expected, .. } if expected == request.id()));

    let late = computation.resume(request.answer("blue")).await.unwrap_err();
    assert!(matches!(late, Error::ComputationFinished));
}

/// Test: Confirmation decisions
/// Given an agent that asks to confirm an irreversible action
/// When the driver denies it
/// Then the agent observes the denial
#[tokio::test]
async fn test_denied_confirmation_is_observed() {
    let agent = scripted_agent(
        "deployer",
        vec![
            tool(
                "confirm_action",
                json!({ "action": "drop_table", "description": "drop users", "reversible": false }),
            ),
            answer("skipped"),
        ],
        "unused",
    );
    let result = agent
        .start("clean the database")
        .drive_with(&|request: &ControlRequest| request.deny())
        .await
        .unwrap();
    assert!(result.steps[0]
        .observation
        .as_deref()
        .is_some_and(|o| o.contains("denied")));
}

/// Test: Usage outside a driven context
/// Given no driver
/// When code suspends directly
/// Then it fails with a usage error instead of hanging
#[tokio::test]
async fn test_suspend_outside_driven_context() {
    assert!(matches!(ensure_context(), Err(Error::OutsideDrivenContext)));
    let err = suspend(ControlRequest::ask_user("anyone?", vec![], None))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::OutsideDrivenContext));
    assert_eq!(err.kind(), FailureKind::Protocol);
}

/// Test: Blocking run
/// Given an agent that asks the user
/// When it is run without a driver
/// Then the question resolves to its default
#[tokio::test]
async fn test_run_uses_defaults() {
    let mut agent = scripted_agent(
        "asker",
        vec![
            tool("ask_user", json!({ "question": "Region?", "default": "eu-west" })),
            answer("deployed"),
        ],
        "unused",
    );
    let result = agent.run("deploy").await.unwrap();
    assert_eq!(result.steps[0].observation.as_deref(), Some("eu-west"));
    assert!(result.is_final_answer());
}
