// Host-side use of the interpreter: definitions persisting across evaluations,
// hook-driven aborts and syntax checking without running.

use tinyscript::{HookAction, Hooks, Interpreter, NoHooks, Pos, ScriptError, ScriptId, Value};

struct AbortAtLine(u32);

impl Hooks for AbortAtLine {
    fn on_statement(&mut self, _interp: &mut Interpreter, _id: ScriptId, pos: Pos) -> HookAction {
        if pos.line == self.0 {
            HookAction::Abort
        } else {
            HookAction::Continue
        }
    }
}

#[test]
fn test_functions_survive_between_evaluations() {
    let mut interp = Interpreter::new();
    interp
        .eval("function add(a, b) { return a + b; }", "lib.js", &mut NoHooks)
        .unwrap();
    let value = interp
        .call_function("add", vec![Value::Number(2.0), Value::Number(5.0)], &mut NoHooks)
        .unwrap();
    assert!(matches!(value, Value::Number(n) if n == 7.0));
}

#[test]
fn test_unknown_function_is_a_reference_error() {
    let mut interp = Interpreter::new();
    let err = interp.call_function("nope", vec![], &mut NoHooks).unwrap_err();
    assert!(err.to_string().contains("nope is not defined"));
}

#[test]
fn test_hook_abort_unwinds_through_calls() {
    let code = "var reached = 0;\nfunction f() {\n  reached = 1;\n  while (true) {}\n}\nf();";
    let mut interp = Interpreter::new();
    let err = interp.eval(code, "main.js", &mut AbortAtLine(4)).unwrap_err();
    assert!(matches!(err, ScriptError::Aborted));
    assert!(!interp.is_running());
    assert!(interp.backtrace().is_empty());
}

#[test]
fn test_check_syntax_reports_position() {
    let interp = Interpreter::new();
    assert!(interp.check_syntax("var a = [1, 2];").is_ok());
    let err = interp.check_syntax("var a = ;\n").unwrap_err();
    assert_eq!(err.line, 1);
    assert!(!err.message.is_empty());
}
