// Stepping behaviour against real scripts

mod common;

use common::{harness, FILE};
use script_debugger::{DebuggerEvent, InterruptReason, RunModeRequest};

const CALLS: &str = "function g() {
  return 1;
}
function f() {
  g();
  return 2;
}
f();
print('done');
";

#[tokio::test(flavor = "multi_thread")]
async fn test_step_over_does_not_descend() {
    let h = harness();
    h.debugger.add_breakpoint(FILE, 5);
    let run = h.start(CALLS, false);

    assert_eq!(h.next_interrupt().await, (InterruptReason::Breakpoint, 5));
    assert!(h.debugger.step_over());
    assert_eq!(h.next_interrupt().await, (InterruptReason::Step, 6));

    h.debugger.continue_running();
    h.run_to_end().await;
    run.await.unwrap().unwrap();
    assert_eq!(h.printed(), vec!["done"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_step_out_returns_one_level() {
    let h = harness();
    h.debugger.add_breakpoint(FILE, 2);
    let run = h.start(CALLS, false);

    assert_eq!(h.next_interrupt().await, (InterruptReason::Breakpoint, 2));
    let names: Vec<String> = h.debugger.backtrace().iter().map(|f| f.name.clone()).collect();
    assert_eq!(names, vec!["<global>", "f", "g"]);

    assert!(h.debugger.step_out());
    assert_eq!(h.next_interrupt().await, (InterruptReason::Step, 6));
    assert_eq!(h.debugger.backtrace().len(), 2);

    h.debugger.continue_running();
    h.run_to_end().await;
    run.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_step_into_enters_call() {
    let h = harness();
    h.debugger.add_breakpoint(FILE, 5);
    let run = h.start(CALLS, false);

    assert_eq!(h.next_interrupt().await, (InterruptReason::Breakpoint, 5));
    assert!(h.debugger.step_into());
    assert_eq!(h.next_interrupt().await, (InterruptReason::Step, 2));
    assert_eq!(h.debugger.backtrace().last().unwrap().name, "g");

    h.debugger.continue_running();
    h.run_to_end().await;
    run.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_step_repeat_count() {
    let h = harness();
    let run = h.start("var a = 1;\nvar b = 2;\nvar c = 3;\nvar d = 4;\n", true);

    assert_eq!(h.next_interrupt().await, (InterruptReason::Step, 1));
    assert!(h.debugger.request_run_mode(RunModeRequest::StepOver(2)));
    assert_eq!(h.next_interrupt().await, (InterruptReason::Step, 4));

    h.debugger.continue_running();
    h.run_to_end().await;
    run.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_until_line_is_one_shot() {
    let h = harness();
    let code = "var n = 0;\nwhile (n < 3) {\n  n = n + 1;\n}\nn";
    let run = h.start(code, true);

    assert_eq!(h.next_interrupt().await, (InterruptReason::Step, 1));
    assert!(h.debugger.run_until_line(3));
    assert_eq!(h.next_interrupt().await, (InterruptReason::RunUntilLine, 3));

    h.debugger.continue_running();
    match h.run_to_end().await {
        DebuggerEvent::Stopped { stats } => {
            assert_eq!(stats.result.as_deref(), Some("3"));
            assert_eq!(stats.pauses, 2);
        }
        other => panic!("unexpected event {:?}", other),
    }
    run.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_user_interrupt_pauses_running_loop() {
    let h = harness();
    let run = h.start("var i = 0;\nwhile (true) {\n  i = i + 1;\n}\n", false);

    assert!(
        h.debugger
            .wait_for_state(script_debugger::LifecycleState::Running, std::time::Duration::from_secs(5))
            .await
    );
    assert!(h.debugger.interrupt());
    let (reason, line) = h.next_interrupt().await;
    assert_eq!(reason, InterruptReason::UserInterrupt);
    assert!(line == 2 || line == 3);

    assert!(h.debugger.abort());
    let outcome = run.await.unwrap().unwrap();
    assert!(outcome.completion.is_aborted());
}
