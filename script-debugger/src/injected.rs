// Injected evaluation channel
//
// Code typed by a user while the script is paused runs inside the paused
// context. The controller posts a request into the shared state and waits;
// the worker thread, parked in its pause loop, picks it up and evaluates it.
// A watchdog aborts runaway evaluations that were not started in step mode.

use crate::agent::Shared;
use crate::engine::{Completion, EngineValue};
use crate::error::{DebugResult, DebuggerError};
use crate::types::{LifecycleState, Position, RunMode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const TIMEOUT_MESSAGE: &str = "Evaluation did not finish in time, possible infinite loop";

/// How often a waiting caller re-checks that the worker is still alive
const WORKER_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InjectionPhase {
    Initializing,
    Evaluating,
    UpdatingParentContext,
    Aborting,
    NotRunning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub code: String,
    /// Name the evaluation shows up under in backtraces
    pub label: String,
    /// Pause at the first statement and honor breakpoints inside the code
    pub interrupt_at_start: bool,
    /// Watchdog override; ignored when `interrupt_at_start` is set
    pub timeout: Option<Duration>,
}

impl EvaluationRequest {
    pub fn new(code: &str, label: &str) -> Self {
        Self {
            code: code.to_string(),
            label: label.to_string(),
            interrupt_at_start: false,
            timeout: None,
        }
    }

    pub fn stepping(mut self) -> Self {
        self.interrupt_at_start = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of an injected evaluation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub value: Option<EngineValue>,
    pub uncaught_exception: Option<String>,
    pub error_line: Option<u32>,
    pub backtrace: Vec<String>,
    pub aborted: bool,
    pub timed_out: bool,
    pub message: Option<String>,
}

impl EvaluationOutcome {
    pub fn from_completion(completion: Completion) -> Self {
        match completion {
            Completion::Value(value) => Self {
                value: Some(value),
                ..Self::default()
            },
            Completion::Exception(exception) => Self {
                uncaught_exception: Some(exception.message),
                error_line: exception.line,
                backtrace: exception.backtrace,
                ..Self::default()
            },
            Completion::Aborted => Self {
                aborted: true,
                message: Some("Evaluation aborted".to_string()),
                ..Self::default()
            },
        }
    }

    /// One-line text for the console
    pub fn render(&self) -> String {
        if self.aborted {
            return self
                .message
                .clone()
                .unwrap_or_else(|| "Evaluation aborted".to_string());
        }
        if let Some(exception) = &self.uncaught_exception {
            return match self.error_line {
                Some(line) => format!("Uncaught {} (line {})", exception, line),
                None => format!("Uncaught {}", exception),
            };
        }
        self.value
            .as_ref()
            .map(|v| v.render())
            .unwrap_or_else(|| "undefined".to_string())
    }
}

/// Request slot living in the shared state while an injection is in flight
#[derive(Debug)]
pub(crate) struct InjectionSlot {
    pub id: u64,
    pub request: EvaluationRequest,
    pub phase: InjectionPhase,
    /// Run-mode to restore once the evaluation ends
    pub saved_mode: RunMode,
    pub saved_position: Option<Position>,
    pub saved_file: Option<String>,
    pub saved_depth: usize,
    pub outcome: Option<EvaluationOutcome>,
}

/// Run `request` inside the paused context, blocking the calling thread
///
/// Must not be called from the worker thread.
pub(crate) fn evaluate_in_context(shared: &Shared, request: EvaluationRequest) -> DebugResult<EvaluationOutcome> {
    let _engine = shared
        .engine_lock
        .try_lock_for(shared.config.engine_lock_timeout())
        .ok_or(DebuggerError::EngineUnavailable)?;

    let mut state = shared.state.lock();
    match state.lifecycle {
        LifecycleState::Interrupted => {}
        LifecycleState::NotRunning => return Err(DebuggerError::NotRunning),
        // engine is free but the script is between pauses, e.g. aborting
        _ => return Err(DebuggerError::NotInterrupted),
    }
    if state.injection.is_some() {
        return Err(DebuggerError::EngineUnavailable);
    }

    let id = state.next_injection_id();
    let deadline = if request.interrupt_at_start {
        None
    } else {
        let timeout = request.timeout.unwrap_or_else(|| shared.config.injected_timeout());
        Some(Instant::now() + timeout)
    };
    info!(
        "Injected evaluation #{} ({}), {} bytes",
        id,
        request.label,
        request.code.len()
    );

    let saved_mode = state.control.run_mode;
    state.control.run_mode = if request.interrupt_at_start {
        RunMode::StepIntoInjectedProgram
    } else {
        RunMode::RunInjectedProgram
    };
    state.injection = Some(InjectionSlot {
        id,
        saved_mode,
        saved_position: state.position,
        saved_file: state.file.clone(),
        saved_depth: state.call_stack.depth(),
        request,
        phase: InjectionPhase::Initializing,
        outcome: None,
    });
    shared.resume.notify_all();

    let mut timed_out = false;
    let mut outcome = loop {
        if let Some(outcome) = state.injection.as_mut().and_then(|slot| slot.outcome.take()) {
            state.injection = None;
            break outcome;
        }
        if state.injection.is_none() || !shared.worker_alive() {
            warn!("Injected evaluation #{} lost its worker", id);
            state.injection = None;
            return Err(DebuggerError::WorkerGone);
        }

        let wait_until = match deadline {
            Some(deadline) if !timed_out => deadline.min(Instant::now() + WORKER_POLL),
            _ => Instant::now() + WORKER_POLL,
        };
        shared.resume.wait_until(&mut state, wait_until);

        if let Some(deadline) = deadline {
            let still_running = state.injection.as_ref().is_some_and(|slot| slot.outcome.is_none());
            if !timed_out && still_running && Instant::now() >= deadline {
                timed_out = true;
                warn!("Injected evaluation #{} timed out, aborting it", id);
                if state.control.run_mode != RunMode::AbortMain {
                    state.control.run_mode = RunMode::AbortInjected;
                }
                if let Some(slot) = state.injection.as_mut() {
                    slot.phase = InjectionPhase::Aborting;
                }
                shared.resume.notify_all();
            }
        }
    };

    if timed_out {
        outcome.aborted = true;
        outcome.timed_out = true;
        outcome.message = Some(TIMEOUT_MESSAGE.to_string());
    }
    debug!("Injected evaluation #{} finished: {}", id, outcome.render());
    Ok(outcome)
}
