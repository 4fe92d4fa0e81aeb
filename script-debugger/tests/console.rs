// Console commands driving a live script

mod common;

use common::{harness, FILE};
use script_debugger::{DebuggerError, InterruptReason, LifecycleState};

async fn run(h: &common::Harness, line: &str) -> Result<String, DebuggerError> {
    h.debugger.execute_console_command(line).await?.text().await
}

const SCRIPT: &str = "var count = 0;
function bump() {
  count = count + 1;
  return count;
}
bump();
bump();
count
";

#[tokio::test(flavor = "multi_thread")]
async fn test_line_when_idle() {
    let h = harness();
    assert_eq!(run(&h, ".line").await.unwrap(), "-1");
    assert_eq!(run(&h, ".currentline").await.unwrap(), "-1");
    assert!(run(&h, ".help").await.unwrap().contains(".debugger"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_break_needs_a_file_before_loading() {
    let h = harness();
    assert!(matches!(
        run(&h, ".break 3").await,
        Err(DebuggerError::InvalidCommand(_))
    ));
    assert!(h.debugger.breakpoints().is_empty());
    assert_eq!(run(&h, ".break main.js:3").await.unwrap(), "Breakpoint added at main.js:3");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_arguments_do_not_mutate() {
    let h = harness();
    h.debugger.set_default_file(FILE);
    assert!(run(&h, ".break 3 maxhits=x").await.is_err());
    assert!(run(&h, ".break 3 enable").await.is_err());
    assert!(h.debugger.breakpoints().is_empty());
    assert!(run(&h, ".debugger stepOver -1").await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_console_session() {
    let h = harness();
    h.debugger.set_default_file(FILE);
    run(&h, ".break 3").await.unwrap();
    run(&h, ".break 3 maxhits=1").await.unwrap();
    let program = h.start(SCRIPT, false);

    assert_eq!(h.next_interrupt().await, (InterruptReason::Breakpoint, 3));
    assert_eq!(run(&h, ".line").await.unwrap(), "3");
    assert_eq!(run(&h, "count").await.unwrap(), "0");

    let status: serde_json::Value = serde_json::from_str(&run(&h, ".debugger status").await.unwrap()).unwrap();
    assert_eq!(status["lifecycle"], "Interrupted");
    assert_eq!(status["line"], 3);

    assert_eq!(run(&h, ".debugger stepOver").await.unwrap(), "OK");
    assert_eq!(h.next_interrupt().await, (InterruptReason::Step, 4));
    assert_eq!(run(&h, ".debugger continue").await.unwrap(), "OK");

    let outcome = program.await.unwrap().unwrap();
    assert_eq!(outcome.stats.result.as_deref(), Some("2"));
    assert_eq!(h.debugger.breakpoint(FILE, 3).map(|b| b.enabled), Some(false));
    assert!(run(&h, ".debugger continue").await.unwrap().starts_with("Ignored"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_code_runs_as_program_when_idle() {
    let h = harness();
    assert_eq!(run(&h, "print('x'); 1 + 2").await.unwrap(), "3");
    assert_eq!(h.printed(), vec!["x"]);
    assert_eq!(run(&h, "throw 'bad'").await.unwrap(), "Uncaught bad");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_debug_starts_paused() {
    let h = harness();
    let reply = h.debugger.execute_console_command(".debug var a = 1;\na = a + 1;\na").await.unwrap();
    assert_eq!(h.next_interrupt().await, (InterruptReason::Step, 1));
    assert_eq!(h.debugger.lifecycle(), LifecycleState::Interrupted);

    run(&h, ".debugger stepInto 2").await.unwrap();
    assert_eq!(h.next_interrupt().await, (InterruptReason::Step, 3));
    run(&h, ".debugger continue").await.unwrap();
    assert_eq!(reply.text().await.unwrap(), "2");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_debug_while_interrupted_steps_injected_code() {
    let h = harness();
    h.debugger.set_default_file(FILE);
    run(&h, ".break 3").await.unwrap();
    let program = h.start(SCRIPT, false);
    h.next_interrupt().await;

    let reply = h
        .debugger
        .execute_console_command(".debug count = count + 10; count")
        .await
        .unwrap();
    assert_eq!(h.next_interrupt().await, (InterruptReason::InjectedProgramStart, 1));
    run(&h, ".debugger continue").await.unwrap();
    assert_eq!(reply.text().await.unwrap(), "10");
    assert_eq!(h.debugger.lifecycle(), LifecycleState::Interrupted);

    run(&h, ".break 3 remove").await.unwrap();
    run(&h, ".debugger continue").await.unwrap();
    let outcome = program.await.unwrap().unwrap();
    assert_eq!(outcome.stats.result.as_deref(), Some("12"));
}
