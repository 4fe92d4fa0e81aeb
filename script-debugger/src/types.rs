// Debugger type definitions
//
// Common types shared by the state machine, notifications and the console

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one evaluation inside the engine (outer, injected or condition)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScriptId(pub u64);

/// Statement position within a source file, 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    NotRunning,
    Running,
    Interrupted,
    Aborting,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::NotRunning => "not running",
            LifecycleState::Running => "running",
            LifecycleState::Interrupted => "interrupted",
            LifecycleState::Aborting => "aborting",
        };
        f.write_str(name)
    }
}

/// Strategy applied at each statement boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "line")]
pub enum RunMode {
    Run,
    Interrupt,
    StepInto,
    StepOver,
    StepOut,
    RunUntilLine(u32),
    RunInjectedProgram,
    StepIntoInjectedProgram,
    AbortMain,
    AbortInjected,
}

impl RunMode {
    pub fn is_stepping(&self) -> bool {
        matches!(
            self,
            RunMode::StepInto | RunMode::StepOver | RunMode::StepOut | RunMode::RunUntilLine(_)
        )
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, RunMode::AbortMain | RunMode::AbortInjected)
    }
}

/// Run-mode changes a controller may ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunModeRequest {
    Run,
    Interrupt,
    /// Skip `n` triggering boundaries, then pause
    StepInto(u32),
    StepOver(u32),
    StepOut(u32),
    RunUntilLine(u32),
    Abort,
    AbortInjected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterruptReason {
    Step,
    Breakpoint,
    Exception,
    RunUntilLine,
    UserInterrupt,
    InjectedProgramStart,
}

/// Summary carried by the `stopped` notification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub statements_executed: u64,
    pub function_calls: u64,
    pub breakpoints_hit: u64,
    pub pauses: u64,
    pub duration_ms: u64,
    pub aborted: bool,
    pub result: Option<String>,
    pub exception: Option<String>,
}

/// Point-in-time view of the debugger for status queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebuggerStatus {
    pub lifecycle: LifecycleState,
    pub run_mode: RunMode,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub breakpoints: usize,
    pub function_depth: i32,
    pub injected_evaluation_active: bool,
}
