// Run-mode resolution
//
// Pure bookkeeping for the execution control state machine: which run-mode is
// active, how many triggering boundaries a step still skips, and the counters
// that let step-over and step-out ignore nested calls.

use crate::types::{InterruptReason, RunMode, RunModeRequest};
use serde::{Deserialize, Serialize};

/// What a statement boundary should do according to the run-mode alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementDecision {
    Continue,
    Pause(InterruptReason),
    AbortMain,
    AbortInjected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlState {
    pub run_mode: RunMode,
    /// Triggering boundaries to skip before a step pauses
    pub repeat: u32,
    /// Nesting depth of the running evaluation, 0 at top level
    pub function_depth: i32,
    /// Depth relative to where step-over/step-out was requested
    pub interrupt_function_level: i32,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            run_mode: RunMode::Run,
            repeat: 0,
            function_depth: 0,
            interrupt_function_level: 0,
        }
    }
}

impl ControlState {
    /// Fresh state for a new top-level evaluation
    pub fn start(interrupt_at_start: bool) -> Self {
        Self {
            run_mode: if interrupt_at_start {
                RunMode::StepInto
            } else {
                RunMode::Run
            },
            ..Self::default()
        }
    }

    /// Install a controller request; lifecycle checks are the caller's job
    pub fn arm(&mut self, request: RunModeRequest) {
        self.repeat = 0;
        self.interrupt_function_level = 0;
        self.run_mode = match request {
            RunModeRequest::Run => RunMode::Run,
            RunModeRequest::Interrupt => RunMode::Interrupt,
            RunModeRequest::StepInto(n) => {
                self.repeat = n;
                RunMode::StepInto
            }
            RunModeRequest::StepOver(n) => {
                self.repeat = n;
                RunMode::StepOver
            }
            RunModeRequest::StepOut(n) => {
                self.repeat = n;
                RunMode::StepOut
            }
            RunModeRequest::RunUntilLine(line) => RunMode::RunUntilLine(line),
            RunModeRequest::Abort => RunMode::AbortMain,
            RunModeRequest::AbortInjected => RunMode::AbortInjected,
        };
    }

    /// Decide what the boundary at `line` does, updating counters
    pub fn on_statement(&mut self, line: u32) -> StatementDecision {
        match self.run_mode {
            RunMode::Run | RunMode::RunInjectedProgram => StatementDecision::Continue,
            RunMode::Interrupt => StatementDecision::Pause(InterruptReason::UserInterrupt),
            RunMode::StepInto => self.step_trigger(),
            RunMode::StepOver => {
                if self.interrupt_function_level <= 0 {
                    self.interrupt_function_level = 0;
                    self.step_trigger()
                } else {
                    StatementDecision::Continue
                }
            }
            RunMode::StepOut => {
                if self.interrupt_function_level < 0 {
                    self.interrupt_function_level = 0;
                    self.step_trigger()
                } else {
                    StatementDecision::Continue
                }
            }
            RunMode::RunUntilLine(target) => {
                if line == target {
                    self.run_mode = RunMode::Interrupt;
                    StatementDecision::Pause(InterruptReason::RunUntilLine)
                } else {
                    StatementDecision::Continue
                }
            }
            RunMode::StepIntoInjectedProgram => {
                self.run_mode = RunMode::Interrupt;
                StatementDecision::Pause(InterruptReason::InjectedProgramStart)
            }
            RunMode::AbortMain => StatementDecision::AbortMain,
            RunMode::AbortInjected => StatementDecision::AbortInjected,
        }
    }

    fn step_trigger(&mut self) -> StatementDecision {
        if self.repeat > 0 {
            self.repeat -= 1;
            StatementDecision::Continue
        } else {
            self.run_mode = RunMode::Interrupt;
            StatementDecision::Pause(InterruptReason::Step)
        }
    }

    pub fn on_function_entry(&mut self) {
        self.function_depth += 1;
        if matches!(self.run_mode, RunMode::StepOver | RunMode::StepOut) {
            self.interrupt_function_level += 1;
        }
    }

    /// Returns true when the outermost evaluation just exited
    pub fn on_function_exit(&mut self) -> bool {
        self.function_depth -= 1;
        if matches!(self.run_mode, RunMode::StepOver | RunMode::StepOut) {
            self.interrupt_function_level -= 1;
        }
        self.function_depth <= 0
    }

    /// Force a pause at the next opportunity, as a breakpoint does
    ///
    /// A pending abort wins; returns false when it was kept.
    pub fn force_interrupt(&mut self) -> bool {
        if self.run_mode.is_abort() {
            return false;
        }
        self.run_mode = RunMode::Interrupt;
        self.repeat = 0;
        self.interrupt_function_level = 0;
        true
    }
}
