// Console line handling
//
// Routes each stdin line either to a console-local command or to the
// debugger's console command executor, and renders notifications.

use crate::session::ConsoleSession;
use script_debugger::{ConsoleReply, DebuggerEvent, InterruptReason, LifecycleState};
use std::time::Duration;
use tracing::{debug, warn};

const SHUTDOWN_WAIT: Duration = Duration::from_secs(2);

pub struct LineHandler {
    session: ConsoleSession,
}

impl LineHandler {
    pub fn new(session: ConsoleSession) -> Self {
        Self { session }
    }

    /// Handle one line; returns false when the console should exit
    pub async fn handle_line(&self, line: &str) -> bool {
        match line {
            ".quit" | ".exit" => return false,
            ".backtrace" | ".bt" => {
                let model = self.session.model();
                let text = model.lock().await.render_backtrace();
                println!("{}", if text.is_empty() { "No frames" } else { text.as_str() });
                return true;
            }
            ".vars" => {
                let model = self.session.model();
                let model = model.lock().await;
                if model.variables.is_empty() {
                    println!("No variables");
                }
                for record in &model.variables {
                    println!("{} = {}", record.path, record.short_value);
                }
                return true;
            }
            ".errors" => {
                let model = self.session.model();
                let errors = model.lock().await.take_condition_errors();
                if errors.is_empty() {
                    println!("No condition errors");
                }
                for error in errors {
                    println!("{}", error);
                }
                return true;
            }
            _ => {}
        }

        match self.session.debugger().execute_console_command(line).await {
            Ok(ConsoleReply::Text(text)) => println!("{}", text),
            Ok(pending @ ConsoleReply::Pending(_)) => {
                debug!("Console line runs in the background: {}", line);
                tokio::spawn(async move {
                    match pending.text().await {
                        Ok(text) => println!("{}", text),
                        Err(e) => println!("Error: {}", e),
                    }
                });
            }
            Err(e) => println!("Error: {}", e),
        }
        true
    }

    /// Abort whatever still runs and give the worker a moment to unwind
    pub async fn shutdown(&self) {
        let debugger = self.session.debugger();
        if debugger.lifecycle() == LifecycleState::NotRunning {
            return;
        }
        debugger.abort();
        if !debugger.wait_for_state(LifecycleState::NotRunning, SHUTDOWN_WAIT).await {
            warn!("Script did not stop within {:?}", SHUTDOWN_WAIT);
        }
    }
}

fn reason_text(reason: InterruptReason) -> &'static str {
    match reason {
        InterruptReason::Step => "step",
        InterruptReason::Breakpoint => "breakpoint",
        InterruptReason::Exception => "exception",
        InterruptReason::RunUntilLine => "run to line",
        InterruptReason::UserInterrupt => "interrupt",
        InterruptReason::InjectedProgramStart => "debug start",
    }
}

/// One console line per notification worth showing, None for the chatty ones
pub fn format_event(event: &DebuggerEvent) -> Option<String> {
    match event {
        DebuggerEvent::Started { file } => Some(format!("[started] {}", file)),
        DebuggerEvent::Stopped { stats } => {
            let outcome = match (&stats.exception, &stats.result) {
                _ if stats.aborted => "aborted".to_string(),
                (Some(exception), _) => format!("uncaught {}", exception),
                (None, Some(result)) => format!("result {}", result),
                (None, None) => "done".to_string(),
            };
            Some(format!(
                "[stopped] {} ({} statements, {} ms)",
                outcome, stats.statements_executed, stats.duration_ms
            ))
        }
        DebuggerEvent::Interrupted { reason, file, line, .. } => {
            Some(format!("[paused] {} at {}:{}", reason_text(*reason), file, line))
        }
        DebuggerEvent::Aborted => Some("[aborted]".to_string()),
        DebuggerEvent::BreakpointAdded { breakpoint } => {
            Some(format!("[breakpoint] added {}:{}", breakpoint.file, breakpoint.line))
        }
        DebuggerEvent::BreakpointRemoved { breakpoint } => {
            Some(format!("[breakpoint] removed {}:{}", breakpoint.file, breakpoint.line))
        }
        DebuggerEvent::BreakpointConditionError { breakpoint, message } => Some(format!(
            "[breakpoint] condition error at {}:{}: {}",
            breakpoint.file, breakpoint.line, message
        )),
        DebuggerEvent::Exception { line, message } => Some(match line {
            Some(line) => format!("[exception] {} (line {})", message, line),
            None => format!("[exception] {}", message),
        }),
        DebuggerEvent::Continued { .. }
        | DebuggerEvent::PositionChanged { .. }
        | DebuggerEvent::StateChanged { .. }
        | DebuggerEvent::BreakpointModified { .. }
        | DebuggerEvent::BreakpointReached { .. }
        | DebuggerEvent::VariablesChanged { .. }
        | DebuggerEvent::BacktraceChanged { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use script_debugger::Breakpoint;

    #[test]
    fn test_pause_line() {
        let event = DebuggerEvent::Interrupted {
            reason: InterruptReason::Breakpoint,
            file: "main.js".into(),
            line: 4,
            column: 1,
        };
        assert_eq!(format_event(&event).as_deref(), Some("[paused] breakpoint at main.js:4"));
    }

    #[test]
    fn test_chatty_events_hidden() {
        let event = DebuggerEvent::StateChanged {
            old: LifecycleState::NotRunning,
            new: LifecycleState::Running,
        };
        assert!(format_event(&event).is_none());
        let event = DebuggerEvent::BreakpointReached {
            breakpoint: Breakpoint::new("main.js", 2),
        };
        assert!(format_event(&event).is_none());
    }

    #[test]
    fn test_exception_with_line() {
        let event = DebuggerEvent::Exception {
            line: Some(7),
            message: "boom".into(),
        };
        assert_eq!(format_event(&event).as_deref(), Some("[exception] boom (line 7)"));
    }
}
