// Console commands
//
// Parses dot-commands typed at the debugger console and runs them against a
// Debugger. Lines without a leading dot are script code.

use crate::breakpoints::BreakpointState;
use crate::debugger::Debugger;
use crate::error::{DebugResult, DebuggerError};
use crate::injected::EvaluationRequest;
use crate::types::{LifecycleState, RunModeRequest};
use tokio::task::JoinHandle;
use tracing::debug;

/// Label for code typed at the console
pub const CONSOLE_LABEL: &str = "console";

struct HelpEntry {
    name: &'static str,
    usage: &'static str,
    summary: &'static str,
}

const HELP: &[HelpEntry] = &[
    HelpEntry {
        name: "help",
        usage: ".help [command]",
        summary: "Show all commands, or details for one",
    },
    HelpEntry {
        name: "line",
        usage: ".line | .currentline",
        summary: "Print the current line, -1 when no script runs",
    },
    HelpEntry {
        name: "break",
        usage: ".break [file:]<line> [add|remove|toggle|enable|disable|reset|condition <expr>|maxhits=<n>]",
        summary: "Edit the breakpoint on a line (default action: add). Conditions may use %HITS",
    },
    HelpEntry {
        name: "debugger",
        usage: ".debugger continue|interrupt|abort|stepInto [n]|stepOver [n]|stepOut [n]|runUntil <line>|status",
        summary: "Control the running script or print its status",
    },
    HelpEntry {
        name: "debug",
        usage: ".debug <code>",
        summary: "Run code paused at its first statement",
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakAction {
    Add,
    Remove,
    Toggle,
    Enable,
    Disable,
    Reset,
    /// Empty text clears the condition
    Condition(String),
    /// Zero removes the limit
    MaxHits(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggerCommand {
    Continue,
    Interrupt,
    Abort,
    StepInto(u32),
    StepOver(u32),
    StepOut(u32),
    RunUntil(u32),
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Help(Option<String>),
    CurrentLine,
    Break {
        file: Option<String>,
        line: u32,
        action: BreakAction,
    },
    Debugger(DebuggerCommand),
    Debug(String),
    /// Plain script code
    Evaluate(String),
}

/// What a console line produced
#[derive(Debug)]
pub enum ConsoleReply {
    Text(String),
    /// A program that may pause; resolves once it finishes
    Pending(JoinHandle<DebugResult<String>>),
}

impl ConsoleReply {
    /// Wait for the final text
    pub async fn text(self) -> DebugResult<String> {
        match self {
            ConsoleReply::Text(text) => Ok(text),
            ConsoleReply::Pending(handle) => handle.await.map_err(|_| DebuggerError::JobCancelled)?,
        }
    }
}

fn invalid(message: impl Into<String>) -> DebuggerError {
    DebuggerError::InvalidCommand(message.into())
}

/// Parse one console line
pub fn parse(line: &str) -> DebugResult<ConsoleCommand> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('.') else {
        return Ok(ConsoleCommand::Evaluate(line.to_string()));
    };
    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    match name {
        "help" => Ok(ConsoleCommand::Help(
            (!args.is_empty()).then(|| args.trim_start_matches('.').to_string()),
        )),
        "line" | "currentline" => Ok(ConsoleCommand::CurrentLine),
        "break" => parse_break(args),
        "debugger" => parse_debugger(args).map(ConsoleCommand::Debugger),
        "debug" if args.is_empty() => Err(invalid(".debug needs code to run")),
        "debug" => Ok(ConsoleCommand::Debug(args.to_string())),
        _ => Err(invalid(format!("Unknown command .{}, try .help", name))),
    }
}

fn parse_line_number(text: &str) -> DebugResult<u32> {
    match text.parse::<u32>() {
        Ok(line) if line > 0 => Ok(line),
        _ => Err(invalid(format!("'{}' is not a line number", text))),
    }
}

fn parse_break(args: &str) -> DebugResult<ConsoleCommand> {
    let (target, rest) = match args.split_once(char::is_whitespace) {
        Some((target, rest)) => (target, rest.trim()),
        None => (args, ""),
    };
    if target.is_empty() {
        return Err(invalid(".break needs a line number"));
    }
    let (file, line) = match target.rsplit_once(':') {
        Some((file, line)) if !file.is_empty() => (Some(file.to_string()), parse_line_number(line)?),
        _ => (None, parse_line_number(target)?),
    };

    let (word, operand) = match rest.split_once(char::is_whitespace) {
        Some((word, operand)) => (word, operand.trim()),
        None => (rest, ""),
    };
    let action = match word {
        "" | "add" => BreakAction::Add,
        "remove" => BreakAction::Remove,
        "toggle" => BreakAction::Toggle,
        "enable" => BreakAction::Enable,
        "disable" => BreakAction::Disable,
        "reset" => BreakAction::Reset,
        "condition" => BreakAction::Condition(operand.to_string()),
        _ => match word.strip_prefix("maxhits=") {
            Some(count) => BreakAction::MaxHits(
                count
                    .parse()
                    .map_err(|_| invalid(format!("'{}' is not a hit count", count)))?,
            ),
            None => return Err(invalid(format!("Unknown breakpoint action '{}'", word))),
        },
    };
    if !matches!(action, BreakAction::Condition(_)) && !operand.is_empty() {
        return Err(invalid(format!("Unexpected argument '{}'", operand)));
    }
    Ok(ConsoleCommand::Break { file, line, action })
}

fn parse_count(text: Option<&str>) -> DebugResult<u32> {
    match text {
        None => Ok(1),
        Some(text) => match text.parse::<u32>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(invalid(format!("'{}' is not a step count", text))),
        },
    }
}

fn parse_debugger(args: &str) -> DebugResult<DebuggerCommand> {
    let mut words = args.split_whitespace();
    let command = words.next().ok_or_else(|| invalid(".debugger needs a subcommand"))?;
    let operand = words.next();
    if let Some(extra) = words.next() {
        return Err(invalid(format!("Unexpected argument '{}'", extra)));
    }
    let takes_operand = matches!(command, "stepInto" | "stepOver" | "stepOut" | "runUntil");
    if !takes_operand {
        if let Some(operand) = operand {
            return Err(invalid(format!("Unexpected argument '{}'", operand)));
        }
    }

    match command {
        "continue" => Ok(DebuggerCommand::Continue),
        "interrupt" => Ok(DebuggerCommand::Interrupt),
        "abort" => Ok(DebuggerCommand::Abort),
        "status" => Ok(DebuggerCommand::Status),
        "stepInto" => Ok(DebuggerCommand::StepInto(parse_count(operand)?)),
        "stepOver" => Ok(DebuggerCommand::StepOver(parse_count(operand)?)),
        "stepOut" => Ok(DebuggerCommand::StepOut(parse_count(operand)?)),
        "runUntil" => {
            let line = operand.ok_or_else(|| invalid("runUntil needs a line number"))?;
            Ok(DebuggerCommand::RunUntil(parse_line_number(line)?))
        }
        _ => Err(invalid(format!("Unknown debugger command '{}'", command))),
    }
}

/// Help for every command, or for one
pub fn help(topic: Option<&str>) -> DebugResult<String> {
    match topic {
        None => {
            let mut text = String::from("Commands:\n");
            for entry in HELP {
                text.push_str(&format!("  {:<12} {}\n", format!(".{}", entry.name), entry.summary));
            }
            text.push_str("Anything else is evaluated as script code.");
            Ok(text)
        }
        Some(topic) => {
            let name = if topic == "currentline" { "line" } else { topic };
            HELP.iter()
                .find(|entry| entry.name == name)
                .map(|entry| format!("{}\n  {}", entry.usage, entry.summary))
                .ok_or_else(|| invalid(format!("No help for '{}'", topic)))
        }
    }
}

/// Run one console line against `debugger`
pub async fn execute(debugger: &Debugger, line: &str) -> DebugResult<ConsoleReply> {
    let command = parse(line)?;
    debug!("Console command {:?}", command);
    match command {
        ConsoleCommand::Help(topic) => help(topic.as_deref()).map(ConsoleReply::Text),
        ConsoleCommand::CurrentLine => Ok(ConsoleReply::Text(debugger.current_line().to_string())),
        ConsoleCommand::Break { file, line, action } => {
            let file = file
                .or_else(|| debugger.default_file())
                .ok_or_else(|| invalid("No script loaded, use .break <file>:<line>"))?;
            apply_break(debugger, &file, line, action).map(ConsoleReply::Text)
        }
        ConsoleCommand::Debugger(command) => run_debugger_command(debugger, command).map(ConsoleReply::Text),
        ConsoleCommand::Debug(code) => start_code(debugger, code, true).await,
        ConsoleCommand::Evaluate(code) if code.is_empty() => Ok(ConsoleReply::Text(String::new())),
        ConsoleCommand::Evaluate(code) => start_code(debugger, code, false).await,
    }
}

fn apply_break(debugger: &Debugger, file: &str, line: u32, action: BreakAction) -> DebugResult<String> {
    let at = format!("{}:{}", file, line);
    let text = match action {
        BreakAction::Add => {
            debugger.add_breakpoint(file, line);
            format!("Breakpoint added at {}", at)
        }
        BreakAction::Remove => {
            debugger.remove_breakpoint(file, line)?;
            format!("Breakpoint removed at {}", at)
        }
        BreakAction::Toggle => match debugger.toggle_breakpoint(file, line) {
            BreakpointState::NoBreakpoint => format!("Breakpoint removed at {}", at),
            _ => format!("Breakpoint added at {}", at),
        },
        BreakAction::Enable => {
            debugger.set_breakpoint_enabled(file, line, true)?;
            format!("Breakpoint enabled at {}", at)
        }
        BreakAction::Disable => {
            debugger.set_breakpoint_enabled(file, line, false)?;
            format!("Breakpoint disabled at {}", at)
        }
        BreakAction::Reset => {
            debugger.reset_breakpoint(file, line)?;
            format!("Breakpoint hit count reset at {}", at)
        }
        BreakAction::Condition(expr) if expr.is_empty() => {
            debugger.set_breakpoint_condition(file, line, None)?;
            format!("Condition cleared at {}", at)
        }
        BreakAction::Condition(expr) => {
            debugger.set_breakpoint_condition(file, line, Some(expr.clone()))?;
            format!("Condition at {} set to {}", at, expr)
        }
        BreakAction::MaxHits(0) => {
            debugger.set_breakpoint_max_hits(file, line, None)?;
            format!("Hit limit removed at {}", at)
        }
        BreakAction::MaxHits(n) => {
            debugger.set_breakpoint_max_hits(file, line, Some(n))?;
            format!("Breakpoint at {} disables after {} hits", at, n)
        }
    };
    Ok(text)
}

fn run_debugger_command(debugger: &Debugger, command: DebuggerCommand) -> DebugResult<String> {
    let request = match command {
        DebuggerCommand::Status => return Ok(serde_json::to_string_pretty(&debugger.status())?),
        DebuggerCommand::Continue => RunModeRequest::Run,
        DebuggerCommand::Interrupt => RunModeRequest::Interrupt,
        DebuggerCommand::Abort => RunModeRequest::Abort,
        // console counts are "n steps", the request counts skipped boundaries
        DebuggerCommand::StepInto(n) => RunModeRequest::StepInto(n - 1),
        DebuggerCommand::StepOver(n) => RunModeRequest::StepOver(n - 1),
        DebuggerCommand::StepOut(n) => RunModeRequest::StepOut(n - 1),
        DebuggerCommand::RunUntil(line) => RunModeRequest::RunUntilLine(line),
    };
    if debugger.request_run_mode(request) {
        Ok("OK".to_string())
    } else {
        Ok(format!("Ignored, script is {}", debugger.lifecycle()))
    }
}

/// Evaluate in the paused context, or start a new program when idle
async fn start_code(debugger: &Debugger, code: String, interrupt_at_start: bool) -> DebugResult<ConsoleReply> {
    match debugger.lifecycle() {
        LifecycleState::Interrupted if interrupt_at_start => {
            let debugger = debugger.clone();
            let request = EvaluationRequest::new(&code, CONSOLE_LABEL).stepping();
            Ok(ConsoleReply::Pending(tokio::spawn(async move {
                Ok(debugger.evaluate_in_context(request).await?.render())
            })))
        }
        LifecycleState::Interrupted => {
            let outcome = debugger
                .evaluate_in_context(EvaluationRequest::new(&code, CONSOLE_LABEL))
                .await?;
            Ok(ConsoleReply::Text(outcome.render()))
        }
        LifecycleState::NotRunning => {
            let debugger = debugger.clone();
            Ok(ConsoleReply::Pending(tokio::spawn(async move {
                let outcome = debugger.load_script(CONSOLE_LABEL, &code, interrupt_at_start).await?;
                Ok(match outcome.stats.exception {
                    Some(message) => format!("Uncaught {}", message),
                    None if outcome.stats.aborted => "Aborted".to_string(),
                    None => outcome.stats.result.unwrap_or_else(|| "undefined".to_string()),
                })
            })))
        }
        _ => Err(DebuggerError::EngineUnavailable),
    }
}
