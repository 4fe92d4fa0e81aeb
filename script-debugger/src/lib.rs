// Script debugger core
//
// Statement-level debugging for an embedded script engine:
// - Breakpoints with conditions and hit limits
// - Stepping (into, over, out, run-until-line) and user interrupts
// - Call stack and variable snapshots published at every pause
// - Evaluation of code inside the paused context, with a watchdog
// - Console commands and a task queue for controller front-ends

pub mod agent;
pub mod backtrace;
pub mod breakpoints;
pub mod config;
pub mod console;
pub mod control;
pub mod debugger;
pub mod engine;
pub mod error;
pub mod events;
pub mod injected;
pub mod jobs;
pub mod model;
pub mod tiny;
pub mod types;
pub mod variables;

pub use agent::ScriptOutcome;
pub use breakpoints::{Breakpoint, BreakpointState};
pub use config::DebuggerConfig;
pub use console::ConsoleReply;
pub use debugger::Debugger;
pub use engine::{Completion, EngineValue, ScriptEngine, SyntaxCheck};
pub use error::{DebugResult, DebuggerError};
pub use events::DebuggerEvent;
pub use injected::{EvaluationOutcome, EvaluationRequest};
pub use jobs::{DebuggerJob, JobResult, TaskQueue};
pub use model::DebuggerModel;
pub use tiny::TinyScriptEngine;
pub use types::{InterruptReason, LifecycleState, RunMode, RunModeRequest};
