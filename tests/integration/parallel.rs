//! Parallel orchestrator tests.
//!
//! These tests verify that:
//! - Every task produces exactly one result, in input order
//! - Failures, timeouts and panics stay inside their unit
//! - Each unit sees only its own configuration snapshot
//! - Script files run end to end through the orchestrator

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use delve::agent::scripted::{Script, ScriptedExecutor, ScriptedModel};
use delve::agent::ExecutionOutcome;
use delve::config::Config;
use delve::orchestration::{ConfigSnapshot, ConfigValue, Task};
use delve::{Agent, Error, FailureKind, ParallelOrchestrator, Result, TaskResult};

use crate::fixtures::{
    answer, scripted_agent, tool, FailingModel, PanickingModel, ScriptDir, SlowAfterFirstModel,
};

fn snapshot(pairs: serde_json::Value) -> ConfigSnapshot {
    ConfigSnapshot::from_json(&pairs)
}

/// Builds a unit from its task's `behavior` key.
fn build_unit(task: &Task) -> Result<Agent> {
    let behavior = task
        .config()
        .get("behavior")
        .and_then(ConfigValue::as_str)
        .unwrap_or("answer");
    let agent = match behavior {
        "fail" => Agent::new(
            "failing",
            Arc::new(FailingModel),
            Arc::new(ScriptedExecutor::new(vec![])),
        ),
        "panic" => Agent::new(
            "panicking",
            Arc::new(PanickingModel),
            Arc::new(ScriptedExecutor::new(vec![])),
        ),
        "slow" => Agent::new(
            "slow",
            Arc::new(SlowAfterFirstModel::new(Duration::from_secs(5))),
            Arc::new(ScriptedExecutor::always(ExecutionOutcome::output("slow progress"))),
        ),
        _ => scripted_agent(
            "worker",
            vec![
                tool("search", json!({ "query": task.prompt() })),
                answer(&format!("done: {}", task.prompt())),
            ],
            "search results",
        ),
    };
    Ok(agent)
}

/// Test: Success and failure counts
/// Given K tasks of which F fail
/// When they run in parallel
/// Then K-F succeed, F fail, and the successes are unaffected
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_counts_with_failures() {
    for (k, f) in [(4, 0), (5, 2), (3, 3)] {
        let tasks: Vec<Task> = (0..k)
            .map(|i| {
                let behavior = if i < f { "fail" } else { "answer" };
                Task::new(format!("task {}", i), snapshot(json!({ "behavior": behavior })))
            })
            .collect();

        let result = ParallelOrchestrator::new(build_unit)
            .with_max_concurrency(2)
            .run_parallel(tasks)
            .await;

        assert_eq!(result.results().len(), k);
        assert_eq!(result.success_count(), k - f);
        assert_eq!(result.failure_count(), f);
        let expected: Vec<String> = (f..k).map(|i| format!("done: task {}", i)).collect();
        assert_eq!(result.outputs(), expected);
        for failure in result.failures() {
            assert_eq!(failure.kind(), FailureKind::Model);
            assert!(failure.message().contains("upstream unavailable"));
            assert_eq!(failure.partial_steps(), 0);
        }
    }
}

/// Test: Unit timeout
/// Given a task whose model stalls after one step
/// When the task's timeout elapses
/// Then the unit fails with a timeout and reports the step it finished
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timeout_reports_partial_steps() {
    let tasks = vec![
        Task::new("stall", snapshot(json!({ "behavior": "slow" })))
            .with_timeout(Duration::from_millis(200)),
        Task::new("quick", snapshot(json!({}))),
    ];
    let result = ParallelOrchestrator::new(build_unit).run_parallel(tasks).await;

    match &result.results()[0] {
        TaskResult::Failure(failure) => {
            assert_eq!(failure.kind(), FailureKind::Timeout);
            assert_eq!(failure.partial_steps(), 1);
        }
        other => panic!("expected a timeout, got {:?}", other),
    }
    assert!(result.results()[1].is_success());
}

/// Test: Default timeout
/// Given an orchestrator with a default timeout and a task without one
/// When the task stalls
/// Then the default applies
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_default_timeout_applies() {
    let result = ParallelOrchestrator::new(build_unit)
        .with_default_timeout(Some(Duration::from_millis(200)))
        .run_parallel(vec![Task::new("stall", snapshot(json!({ "behavior": "slow" })))])
        .await;
    assert_eq!(result.failures()[0].kind(), FailureKind::Timeout);
}

/// Test: Panic isolation
/// Given one unit whose model panics
/// When it runs beside healthy units
/// Then only that unit fails, as a panic
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panic_is_isolated() {
    let tasks = vec![
        Task::new("first", snapshot(json!({}))),
        Task::new("boom", snapshot(json!({ "behavior": "panic" }))),
        Task::new("third", snapshot(json!({}))),
    ];
    let result = ParallelOrchestrator::new(build_unit).run_parallel(tasks).await;

    assert_eq!(result.success_count(), 2);
    assert_eq!(result.outputs(), vec!["done: first", "done: third"]);
    let failure = result.failures()[0];
    assert_eq!(failure.kind(), FailureKind::Panic);
    assert!(failure.message().contains("model crashed"));
    assert!(!result.results()[1].is_success());
}

/// Test: Per-unit configuration
/// Given tasks carrying different snapshots
/// When each unit builds its agent from its own snapshot
/// Then every output reflects only that unit's values
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_units_see_only_their_snapshot() {
    let factory = |task: &Task| -> Result<Agent> {
        let reply = task
            .config()
            .get_path("persona.reply")
            .and_then(ConfigValue::as_str)
            .ok_or_else(|| Error::Validation("missing persona.reply".to_string()))?;
        Ok(scripted_agent("persona", vec![answer(reply)], "unused"))
    };
    let tasks: Vec<Task> = ["alpha", "beta", "gamma"]
        .iter()
        .map(|name| Task::new("introduce yourself", snapshot(json!({ "persona": { "reply": name } }))))
        .collect();

    let result = ParallelOrchestrator::new(factory)
        .with_max_concurrency(3)
        .run_parallel(tasks)
        .await;
    assert_eq!(result.outputs(), vec!["alpha", "beta", "gamma"]);
    assert_eq!(result.total_steps(), 3);
}

/// Test: Script files through the orchestrator
/// Given several script files on disk
/// When each is loaded by the unit factory
/// Then each unit replays its own script and the aggregate totals add up
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scripts_run_as_units() {
    let dir = ScriptDir::new();
    let scripts = [
        dir.answering("a.toml", "search rust", "rust found"),
        dir.answering("b.toml", "search tokio", "tokio found"),
    ];

    let tasks = scripts
        .iter()
        .map(|path| -> Result<Task> {
            let script = Script::load(path)?;
            Ok(Task::new(
                script.task,
                ConfigSnapshot::from_pairs([("script", ConfigValue::Text(path.display().to_string()))]),
            ))
        })
        .collect::<Result<Vec<_>>>()
        .unwrap();

    let factory = |task: &Task| -> Result<Agent> {
        let path = task
            .config()
            .get("script")
            .and_then(ConfigValue::as_str)
            .ok_or_else(|| Error::Validation("no script".to_string()))?;
        let script = Script::load(std::path::Path::new(path))?;
        Ok(script.build_agent("unit", &Config::default()))
    };
    let result = ParallelOrchestrator::new(factory).run_parallel(tasks).await;

    assert_eq!(result.outputs(), vec!["rust found", "tokio found"]);
    assert_eq!(result.total_steps(), 4);
    assert!(result.successes().iter().all(|s| s.reached_final_answer()));
}

/// Test: Step ceiling inside a unit
/// Given a unit that never answers
/// When it hits its step ceiling
/// Then the unit still succeeds, flagged as not reaching a final answer
#[tokio::test]
async fn test_ceiling_is_not_a_failure() {
    let factory = |_: &Task| -> Result<Agent> {
        Ok(Agent::new(
            "looper",
            Arc::new(ScriptedModel::repeating(tool("poll", json!({ "queue": "jobs" })))),
            Arc::new(ScriptedExecutor::always(ExecutionOutcome::output("jobs pending"))),
        )
        .with_max_steps(2))
    };
    let result = ParallelOrchestrator::new(factory)
        .run_parallel(vec![Task::new("poll the jobs queue", ConfigSnapshot::default())])
        .await;

    let success = result.successes()[0];
    assert!(!success.reached_final_answer());
    assert_eq!(success.output(), "jobs pending");
    assert_eq!(success.steps(), 2);
}
