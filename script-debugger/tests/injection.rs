// Evaluating code inside a paused script

mod common;

use common::{harness, harness_with, FILE};
use script_debugger::{
    DebuggerConfig, DebuggerError, DebuggerEvent, EngineValue, EvaluationRequest, InterruptReason, LifecycleState,
};
use std::time::Duration;

const FUNCTION: &str = "function f() {
  var x = 5;
  return x * 10;
}
var r = f();
r
";

#[tokio::test(flavor = "multi_thread")]
async fn test_side_effects_visible_and_position_kept() {
    let h = harness();
    h.debugger.add_breakpoint(FILE, 3);
    let run = h.start(FUNCTION, false);
    assert_eq!(h.next_interrupt().await, (InterruptReason::Breakpoint, 3));

    let outcome = h
        .debugger
        .evaluate_in_context(EvaluationRequest::new("x = x + 1; x", "console"))
        .await
        .unwrap();
    assert_eq!(outcome.value, Some(EngineValue::Number(6.0)));
    assert_eq!(h.debugger.current_line(), 3);
    assert_eq!(h.debugger.lifecycle(), LifecycleState::Interrupted);

    // the pause republishes its variables once the evaluation is done
    h.events_until(|e| match e {
        DebuggerEvent::VariablesChanged { variables, .. } => {
            variables.iter().any(|v| v.name == "x" && v.full_value == "6")
        }
        _ => false,
    })
    .await;
    let x = h.debugger.variables().into_iter().find(|v| v.name == "x").unwrap();
    assert!(x.just_changed);

    h.debugger.continue_running();
    match h.run_to_end().await {
        DebuggerEvent::Stopped { stats } => assert_eq!(stats.result.as_deref(), Some("60")),
        other => panic!("unexpected event {:?}", other),
    }
    run.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_declarations_are_kept() {
    let h = harness();
    h.debugger.add_breakpoint(FILE, 3);
    let run = h.start(FUNCTION, false);
    h.next_interrupt().await;

    let request = EvaluationRequest::new("var y = x + 100;", "console");
    h.debugger.evaluate_in_context(request).await.unwrap();
    let outcome = h
        .debugger
        .evaluate_in_context(EvaluationRequest::new("y", "console"))
        .await
        .unwrap();
    assert_eq!(outcome.value, Some(EngineValue::Number(105.0)));

    h.debugger.continue_running();
    h.run_to_end().await;
    run.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_watchdog_aborts_runaway_evaluation() {
    let h = harness();
    h.debugger.add_breakpoint(FILE, 3);
    let run = h.start(FUNCTION, false);
    h.next_interrupt().await;

    let request = EvaluationRequest::new("while (true) { }", "console").with_timeout(Duration::from_millis(200));
    let outcome = h.debugger.evaluate_in_context(request).await.unwrap();
    assert!(outcome.aborted);
    assert!(outcome.timed_out);
    assert!(outcome.message.unwrap().contains("infinite loop"));
    assert_eq!(h.debugger.lifecycle(), LifecycleState::Interrupted);
    assert!(!h.debugger.status().injected_evaluation_active);

    // the outer script is still controllable
    assert!(h.debugger.step_over());
    assert_eq!(h.next_interrupt().await, (InterruptReason::Step, 6));
    h.debugger.continue_running();
    h.run_to_end().await;
    run.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_configured_watchdog_timeout() {
    let config = DebuggerConfig {
        injected_timeout_ms: 150,
        ..DebuggerConfig::default()
    };
    let h = harness_with(config);
    h.debugger.add_breakpoint(FILE, 3);
    let run = h.start(FUNCTION, false);
    h.next_interrupt().await;

    let outcome = h
        .debugger
        .evaluate_in_context(EvaluationRequest::new("var k = 0; while (k >= 0) { k = k + 1; }", "console"))
        .await
        .unwrap();
    assert!(outcome.timed_out);

    h.debugger.abort();
    assert!(run.await.unwrap().unwrap().completion.is_aborted());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exception_in_evaluation_is_reported() {
    let h = harness();
    h.debugger.add_breakpoint(FILE, 3);
    let run = h.start(FUNCTION, false);
    h.next_interrupt().await;

    let outcome = h
        .debugger
        .evaluate_in_context(EvaluationRequest::new("nothing + 1", "console"))
        .await
        .unwrap();
    assert!(outcome.uncaught_exception.unwrap().contains("nothing"));
    assert_eq!(h.debugger.lifecycle(), LifecycleState::Interrupted);

    h.debugger.continue_running();
    h.run_to_end().await;
    run.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stepping_into_injected_code() {
    let h = harness();
    h.debugger.add_breakpoint(FILE, 3);
    let run = h.start(FUNCTION, false);
    h.next_interrupt().await;

    let debugger = h.debugger.clone();
    let injected = tokio::spawn(async move {
        debugger
            .evaluate_in_context(EvaluationRequest::new("var z = 1;\nz = z + x;\nz", "console").stepping())
            .await
    });
    assert_eq!(h.next_interrupt().await, (InterruptReason::InjectedProgramStart, 1));
    assert!(h.debugger.step_over());
    assert_eq!(h.next_interrupt().await, (InterruptReason::Step, 2));
    assert!(h.debugger.continue_running());

    let outcome = injected.await.unwrap().unwrap();
    assert_eq!(outcome.value, Some(EngineValue::Number(6.0)));
    assert_eq!(h.debugger.lifecycle(), LifecycleState::Interrupted);
    assert_eq!(h.debugger.current_line(), 3);

    h.debugger.continue_running();
    h.run_to_end().await;
    run.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_abort_main_unwinds_injected_evaluation() {
    let h = harness();
    h.debugger.add_breakpoint(FILE, 3);
    let run = h.start(FUNCTION, false);
    h.next_interrupt().await;

    let debugger = h.debugger.clone();
    let injected = tokio::spawn(async move {
        debugger
            .evaluate_in_context(EvaluationRequest::new("while (true) { }", "console").with_timeout(Duration::from_secs(30)))
            .await
    });
    assert!(h.debugger.wait_for_state(LifecycleState::Interrupted, Duration::from_secs(1)).await);
    while !h.debugger.status().injected_evaluation_active {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(h.debugger.abort());

    let outcome = injected.await.unwrap().unwrap();
    assert!(outcome.aborted);
    assert!(!outcome.timed_out);
    assert!(run.await.unwrap().unwrap().completion.is_aborted());
    assert_eq!(h.debugger.lifecycle(), LifecycleState::NotRunning);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_evaluation_while_running_is_unavailable() {
    let h = harness();
    let run = h.start("while (true) { }", false);
    assert!(h.debugger.wait_for_state(LifecycleState::Running, Duration::from_secs(5)).await);

    let result = h
        .debugger
        .evaluate_in_context(EvaluationRequest::new("1", "console"))
        .await;
    assert!(matches!(result, Err(DebuggerError::EngineUnavailable)));

    h.debugger.abort();
    run.await.unwrap().unwrap();
}
