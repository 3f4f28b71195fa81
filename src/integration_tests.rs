//! Integration tests that exercise the real executor loop with mocks.
//!
//! These cover the end-to-end paths: generation → execution → history,
//! budget-bounded pausing and resumption, recovery verdicts, and the
//! trigger monitor sharing the effector with a running plan.

use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;

use crate::error::EngineError;
use crate::plans::{
    ExecutionHistory, Plan, PlanGenerator, PlanStatus, SqliteHistorySink, Step, StepAction,
    StepStatus,
};
use crate::testing::{executor_with, harness};
use crate::traits::HistorySink;
use crate::triggers::{
    ConditionKind, Trigger, TriggerAction, TriggerCondition, TriggerMonitor,
};

fn plan_json() -> String {
    r#"[
        {"action": "click", "description": "Open the inbox", "target": "Inbox tab"},
        {"action": "type", "description": "Type the search query", "value": "quarterly report"},
        {"action": "verify", "description": "Results appeared", "target": "search results list"}
    ]"#
    .to_string()
}

// -- Scenario A: happy path under a loose budget ----------------------------

#[tokio::test]
async fn test_generate_then_execute_to_completion() {
    let h = harness(vec![
        plan_json(),
        r#"{"confidence": 0.95, "reason": "results visible"}"#.to_string(),
    ])
    .await;

    let generator = PlanGenerator::new(h.provider.clone(), h.shared.clone(), h.registry.clone());
    let plan = generator.create("find the quarterly report", 10).await.unwrap();

    // The planning call carried the goal and the screen capture.
    let planning_call = h.provider.call_log.lock().unwrap()[0].clone();
    assert!(planning_call.with_image);
    assert!(planning_call.prompt.contains("find the quarterly report"));

    assert_eq!(plan.status, PlanStatus::Planning);
    assert_eq!(plan.steps.len(), 3);
    assert_eq!(plan.api_calls_used, 1);
    assert!(plan.steps.iter().all(|s| s.status == StepStatus::Pending));

    let executor = executor_with(&h, plan);
    let done = executor.run().await;

    assert_eq!(done.status, PlanStatus::Completed);
    assert_eq!(done.current_step, 3);
    // Planning (1) + click (1) + verify (1); type is free.
    assert_eq!(done.api_calls_used, 3);
    assert!(done.api_calls_used <= done.api_calls_max);
    assert!(done.ended_at.is_some());
    assert!(done.errors.is_empty());
    assert_eq!(h.history.len(), 1);
    assert_eq!(h.history.recent(1)[0].id, done.id);
}

// -- Scenario B: unrecoverable failure aborts without a diagnosis call ------

#[tokio::test]
async fn test_step_out_of_attempts_fails_plan_without_diagnosis() {
    let h = harness(vec![]).await;

    let steps = vec![
        Step::new("Type a note", StepAction::Type { value: "hi".to_string() }, 1),
        Step::new(
            "Click save",
            StepAction::Click {
                target: "Save button".to_string(),
            },
            1,
        ),
        Step::new("Type another note", StepAction::Type { value: "bye".to_string() }, 1),
    ];
    let mut plan = Plan::new("save a note", steps, 10);
    plan.api_calls_used = 1;

    h.effector.fail_next("click");
    let executor = executor_with(&h, plan);
    let done = executor.run().await;

    assert_eq!(done.status, PlanStatus::Failed);
    assert_eq!(done.errors.len(), 1);
    assert_eq!(done.errors[0].step_description, "Click save");
    assert!(!done.errors[0].recovered);
    assert_eq!(done.steps[1].status, StepStatus::Failed);
    assert_eq!(done.steps[2].status, StepStatus::Pending);
    // Type and click never consult the capability, and the advisor must not
    // either once attempts are exhausted.
    assert_eq!(h.provider.calls(), 0);
    assert!(done.ended_at.is_some());
}

// -- Scenario C: budget exhaustion pauses before the next step --------------

#[tokio::test]
async fn test_budget_exhaustion_pauses_before_next_step() {
    let h = harness(vec![]).await;

    let steps = vec![
        Step::new(
            "Click one",
            StepAction::Click {
                target: "one".to_string(),
            },
            3,
        ),
        Step::new(
            "Click two",
            StepAction::Click {
                target: "two".to_string(),
            },
            3,
        ),
    ];
    // Budget of one call, nothing spent yet: the first click consumes it all.
    let plan = Plan::new("two clicks, one call", steps, 1);

    let executor = executor_with(&h, plan);
    let paused = executor.run().await;

    assert_eq!(paused.status, PlanStatus::Paused);
    assert_eq!(paused.current_step, 1);
    assert_eq!(paused.api_calls_used, 1);
    assert_eq!(paused.steps[0].status, StepStatus::Completed);
    assert_eq!(paused.steps[1].status, StepStatus::Pending);
    // Paused is not terminal; nothing archived yet.
    assert_eq!(h.history.len(), 0);
}

// -- Budget ceiling overruns are bounded by a single call -------------------

#[tokio::test]
async fn test_budget_never_exceeded_by_more_than_one_call() {
    let h = harness(vec![]).await;

    let steps: Vec<Step> = (0..5)
        .map(|i| {
            Step::new(
                format!("Click {}", i),
                StepAction::Click {
                    target: format!("button {}", i),
                },
                3,
            )
        })
        .collect();
    let mut plan = Plan::new("many clicks", steps, 3);
    plan.api_calls_used = 1;

    let executor = executor_with(&h, plan);
    let paused = executor.run().await;

    assert_eq!(paused.status, PlanStatus::Paused);
    assert!(paused.api_calls_used <= paused.api_calls_max + 1);
    assert_eq!(paused.api_calls_used, 3);
    assert_eq!(paused.current_step, 2);
}

// -- Recovery: retry that succeeds, skip that moves on ----------------------

#[tokio::test]
async fn test_retry_verdict_recovers_step() {
    let h = harness(vec![
        r#"{"action": "retry", "reason": "transient"}"#.to_string(),
    ])
    .await;

    let steps = vec![Step::new(
        "Click flaky",
        StepAction::Click {
            target: "flaky button".to_string(),
        },
        3,
    )];
    let mut plan = Plan::new("flaky click", steps, 10);
    plan.api_calls_used = 1;

    h.effector.fail_next("click");
    let executor = executor_with(&h, plan);
    let done = executor.run().await;

    assert_eq!(done.status, PlanStatus::Completed);
    assert_eq!(done.steps[0].status, StepStatus::Completed);
    assert_eq!(done.steps[0].attempts, 2);
    assert_eq!(done.errors.len(), 1);
    assert!(done.errors[0].recovered);
    // One diagnosis call.
    assert_eq!(h.provider.calls(), 1);
}

#[tokio::test]
async fn test_skip_verdict_advances_past_failed_step() {
    let h = harness(vec![
        r#"{"action": "skip", "reason": "optional dialog"}"#.to_string(),
    ])
    .await;

    let steps = vec![
        Step::new(
            "Dismiss optional dialog",
            StepAction::Click {
                target: "dialog close".to_string(),
            },
            3,
        ),
        Step::new("Type the note", StepAction::Type { value: "done".to_string() }, 3),
    ];
    let mut plan = Plan::new("skip the dialog", steps, 10);
    plan.api_calls_used = 1;

    h.effector.fail_next("click");
    let executor = executor_with(&h, plan);
    let done = executor.run().await;

    assert_eq!(done.status, PlanStatus::Completed);
    assert_eq!(done.steps[0].status, StepStatus::Skipped);
    assert_eq!(done.steps[1].status, StepStatus::Completed);
    assert!(done.errors[0].recovered);
}

// -- Terminal immutability and resume idempotence ---------------------------

#[tokio::test]
async fn test_terminal_plan_rejects_further_transitions() {
    let h = harness(vec![]).await;
    let steps = vec![Step::new(
        "Click once",
        StepAction::Click {
            target: "button".to_string(),
        },
        3,
    )];
    let mut plan = Plan::new("one click", steps, 10);
    plan.api_calls_used = 1;

    let executor = executor_with(&h, plan);
    let done = executor.run().await;
    assert_eq!(done.status, PlanStatus::Completed);

    // resume() must not touch a completed plan.
    let after_resume = executor.resume().await;
    assert_eq!(after_resume.status, PlanStatus::Completed);
    assert_eq!(after_resume.current_step, done.current_step);
    assert_eq!(after_resume.ended_at, done.ended_at);

    // pause() has nothing to take effect on either.
    executor.pause();
    let after_pause = executor.snapshot().await;
    assert_eq!(after_pause.status, PlanStatus::Completed);

    // And only one archive entry exists.
    assert_eq!(h.history.len(), 1);
}

// -- Generator failure modes ------------------------------------------------

#[tokio::test]
async fn test_generator_without_source_is_capture_error() {
    let h = harness(vec![plan_json()]).await;
    h.registry.clear_selection();

    let generator = PlanGenerator::new(h.provider.clone(), h.shared.clone(), h.registry.clone());
    let err = generator.create("anything", 5).await.unwrap_err();

    assert!(matches!(err, EngineError::Capture(_)));
    // Failed before the capability was ever consulted.
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn test_generator_with_malformed_response_is_parse_error() {
    let h = harness(vec!["I'd rather chat about the weather.".to_string()]).await;

    let generator = PlanGenerator::new(h.provider.clone(), h.shared.clone(), h.registry.clone());
    let err = generator.create("anything", 5).await.unwrap_err();

    assert!(matches!(err, EngineError::PlanParse(_)));
}

// -- History persistence through the sqlite sink ----------------------------

#[tokio::test]
async fn test_finished_plan_lands_in_sqlite_sink() {
    let h = harness(vec![]).await;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let sink = Arc::new(SqliteHistorySink::new(pool).await.unwrap());
    let history = Arc::new(ExecutionHistory::with_sink(5, sink.clone()));

    let steps = vec![Step::new(
        "Click once",
        StepAction::Click {
            target: "button".to_string(),
        },
        3,
    )];
    let mut plan = Plan::new("persist me", steps, 10);
    plan.api_calls_used = 1;

    let executor = crate::plans::PlanExecutor::new(
        plan,
        h.provider.clone(),
        h.shared.clone(),
        h.registry.clone(),
        history.clone(),
    );
    let done = executor.run().await;

    assert_eq!(done.status, PlanStatus::Completed);
    let persisted = sink.recent(10).await.unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].id, done.id);
    assert_eq!(persisted[0].status, PlanStatus::Completed);
}

// -- Monitor and executor share one effector --------------------------------

#[tokio::test]
async fn test_monitor_and_executor_serialize_on_the_effector() {
    let h = harness(vec![
        // Monitor condition check, then nothing else scripted.
        r#"{"confidence": 0.9}"#.to_string(),
    ])
    .await;

    let monitor = TriggerMonitor::new(
        h.provider.clone(),
        h.shared.clone(),
        h.registry.clone(),
        1000,
    );
    monitor
        .add_trigger(Trigger::new(
            "notify on banner",
            vec![TriggerCondition {
                kind: ConditionKind::Object,
                target: "banner".to_string(),
                threshold: 0.5,
            }],
            vec![TriggerAction::Notify {
                title: "seen".to_string(),
                message: "banner present".to_string(),
            }],
            60_000,
        ))
        .await;

    let steps = vec![Step::new(
        "Type while monitored",
        StepAction::Type {
            value: "hello".to_string(),
        },
        3,
    )];
    let mut plan = Plan::new("concurrent goal", steps, 10);
    plan.api_calls_used = 1;
    let executor = executor_with(&h, plan);

    // Drive both concurrently; the shared-effector lock arbitrates access.
    let (done, ()) = tokio::join!(executor.run(), monitor.tick());

    assert_eq!(done.status, PlanStatus::Completed);
    let actions = h.effector.actions();
    assert!(actions.iter().any(|a| a == "type:hello"));
    assert!(actions.iter().any(|a| a == "notify:seen"));
}
