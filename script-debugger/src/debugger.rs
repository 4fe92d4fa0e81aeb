// Debugger command facade
//
// The handle controllers hold. Every method either mutates the shared state
// under its lock and returns, or hands work to the script worker and returns
// a future for the result. Nothing here blocks on a paused script.

use crate::agent::{spawn_worker, ScriptOutcome, Shared, WorkerJob};
use crate::backtrace::Frame;
use crate::breakpoints::{Breakpoint, BreakpointChange, BreakpointState};
use crate::config::DebuggerConfig;
use crate::console::{self, ConsoleReply};
use crate::engine::{EngineFactory, EngineValue, SyntaxCheck};
use crate::error::{DebugResult, DebuggerError};
use crate::events::{event_channel, DebuggerEvent, EventStream};
use crate::injected::{self, EvaluationOutcome, EvaluationRequest};
use crate::types::{DebuggerStatus, LifecycleState, RunModeRequest};
use crate::variables::VariableRecord;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, info, warn};

const STATE_POLL: Duration = Duration::from_millis(5);

/// Cloneable handle to one debugger instance and its script worker
#[derive(Clone)]
pub struct Debugger {
    inner: Arc<Inner>,
}

struct Inner {
    shared: Arc<Shared>,
    jobs: mpsc::UnboundedSender<WorkerJob>,
    events: EventStream,
    liveness_stop: Arc<Notify>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        if matches!(state.lifecycle, LifecycleState::Running | LifecycleState::Interrupted) {
            info!("Debugger dropped with a script still running, aborting it");
            state.set_lifecycle(LifecycleState::Aborting);
            state.control.arm(RunModeRequest::Abort);
        }
        self.shared.resume.notify_all();
        self.liveness_stop.notify_one();
    }
}

impl Debugger {
    /// Start the script worker; the engine is built on it by `factory`
    ///
    /// The liveness checker runs on the current tokio runtime when there is one.
    pub fn new(factory: EngineFactory, config: DebuggerConfig) -> DebugResult<Self> {
        config.validate()?;
        let (events_tx, events) = event_channel();
        let shared = Arc::new(Shared::new(config, events_tx));
        let (jobs, _worker) = spawn_worker(shared.clone(), factory)?;
        let liveness_stop = Arc::new(Notify::new());
        spawn_liveness_checker(&shared, liveness_stop.clone());

        Ok(Self {
            inner: Arc::new(Inner {
                shared,
                jobs,
                events,
                liveness_stop,
            }),
        })
    }

    fn shared(&self) -> &Shared {
        &self.inner.shared
    }

    fn submit(&self, job: WorkerJob) -> DebugResult<()> {
        self.inner.jobs.send(job).map_err(|_| DebuggerError::WorkerGone)
    }

    // ---- notifications ----

    pub fn events(&self) -> EventStream {
        self.inner.events.clone()
    }

    /// Wait for the next notification
    pub async fn recv_event(&self) -> Option<DebuggerEvent> {
        self.inner.events.recv().await
    }

    /// Try to receive a notification (non-blocking)
    pub async fn try_recv_event(&self) -> Option<DebuggerEvent> {
        self.inner.events.try_recv().await
    }

    // ---- running code ----

    /// Run `code` as a new outermost program and wait for it to finish
    ///
    /// Queued behind any evaluation already running on the worker.
    pub async fn load_script(&self, file: &str, code: &str, interrupt_at_start: bool) -> DebugResult<ScriptOutcome> {
        let (reply, rx) = oneshot::channel();
        self.submit(WorkerJob::Run {
            file: file.to_string(),
            code: code.to_string(),
            interrupt_at_start,
            reply,
        })?;
        rx.await.map_err(|_| DebuggerError::WorkerGone)
    }

    /// Call a global function defined by a previously loaded script
    pub async fn call_function(&self, name: &str, args: Vec<EngineValue>) -> DebugResult<ScriptOutcome> {
        let (reply, rx) = oneshot::channel();
        self.submit(WorkerJob::Call {
            name: name.to_string(),
            args,
            reply,
        })?;
        rx.await.map_err(|_| DebuggerError::WorkerGone)
    }

    pub async fn check_syntax(&self, code: &str) -> DebugResult<SyntaxCheck> {
        let (reply, rx) = oneshot::channel();
        self.submit(WorkerJob::CheckSyntax {
            code: code.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| DebuggerError::WorkerGone)
    }

    /// Evaluate code inside the paused context
    pub async fn evaluate_in_context(&self, request: EvaluationRequest) -> DebugResult<EvaluationOutcome> {
        let shared = self.inner.shared.clone();
        tokio::task::spawn_blocking(move || injected::evaluate_in_context(&shared, request))
            .await
            .map_err(|_| DebuggerError::JobCancelled)?
    }

    /// Parse and run one console line
    pub async fn execute_console_command(&self, line: &str) -> DebugResult<ConsoleReply> {
        console::execute(self, line).await
    }

    // ---- run-mode ----

    /// Ask the worker to change how it proceeds
    ///
    /// Returns false when the request does not apply in the current state.
    pub fn request_run_mode(&self, request: RunModeRequest) -> bool {
        let mut state = self.shared().state.lock();
        match state.lifecycle {
            LifecycleState::NotRunning => {
                warn!("Run-mode request {:?} ignored, no script is running", request);
                return false;
            }
            LifecycleState::Aborting => {
                debug!("Run-mode request {:?} ignored, already aborting", request);
                return false;
            }
            _ => {}
        }
        match (&request, state.injection.as_ref()) {
            (RunModeRequest::AbortInjected, None) => {
                warn!("Abort-injected requested with no injected evaluation in flight");
                return false;
            }
            (RunModeRequest::Abort | RunModeRequest::AbortInjected, _) => {}
            (_, Some(slot)) if !slot.request.interrupt_at_start => {
                warn!("Run-mode request {:?} ignored while an injected evaluation runs", request);
                return false;
            }
            _ => {}
        }

        debug!("Run-mode request {:?}", request);
        if request == RunModeRequest::Abort {
            info!("Aborting script");
            state.set_lifecycle(LifecycleState::Aborting);
        }
        state.control.arm(request);
        self.shared().resume.notify_all();
        true
    }

    pub fn continue_running(&self) -> bool {
        self.request_run_mode(RunModeRequest::Run)
    }

    pub fn interrupt(&self) -> bool {
        self.request_run_mode(RunModeRequest::Interrupt)
    }

    pub fn step_into(&self) -> bool {
        self.request_run_mode(RunModeRequest::StepInto(0))
    }

    pub fn step_over(&self) -> bool {
        self.request_run_mode(RunModeRequest::StepOver(0))
    }

    pub fn step_out(&self) -> bool {
        self.request_run_mode(RunModeRequest::StepOut(0))
    }

    pub fn run_until_line(&self, line: u32) -> bool {
        self.request_run_mode(RunModeRequest::RunUntilLine(line))
    }

    pub fn abort(&self) -> bool {
        self.request_run_mode(RunModeRequest::Abort)
    }

    pub fn set_interrupt_on_breakpoints(&self, enabled: bool) {
        self.shared().state.lock().interrupt_on_breakpoints = enabled;
    }

    pub fn set_interrupt_on_exceptions(&self, enabled: bool) {
        self.shared().state.lock().interrupt_on_exceptions = enabled;
    }

    // ---- breakpoints ----

    fn edit_breakpoints<T>(
        &self,
        edit: impl FnOnce(&mut crate::breakpoints::BreakpointRegistry) -> DebugResult<(BreakpointChange, T)>,
    ) -> DebugResult<T> {
        let mut state = self.shared().state.lock();
        let (change, result) = edit(&mut state.breakpoints)?;
        state.emit(change.into());
        Ok(result)
    }

    pub fn add_breakpoint(&self, file: &str, line: u32) -> Breakpoint {
        self.add_breakpoint_with(file, line, true, None)
    }

    pub fn add_breakpoint_with(&self, file: &str, line: u32, enabled: bool, max_hits: Option<u32>) -> Breakpoint {
        let mut state = self.shared().state.lock();
        let change = state.breakpoints.add(file, line, enabled, max_hits);
        let breakpoint = change_breakpoint(&change);
        state.emit(change.into());
        breakpoint
    }

    pub fn remove_breakpoint(&self, file: &str, line: u32) -> DebugResult<()> {
        self.edit_breakpoints(|registry| Ok((registry.remove(file, line)?, ())))
    }

    /// Flip presence of a breakpoint, returning the state afterwards
    pub fn toggle_breakpoint(&self, file: &str, line: u32) -> BreakpointState {
        let mut state = self.shared().state.lock();
        let change = state.breakpoints.toggle(file, line);
        state.emit(change.into());
        state.breakpoints.state(file, line)
    }

    pub fn set_breakpoint_enabled(&self, file: &str, line: u32, enabled: bool) -> DebugResult<Breakpoint> {
        self.edit_breakpoints(|registry| {
            let change = registry.set_enabled(file, line, enabled)?;
            let bp = change_breakpoint(&change);
            Ok((change, bp))
        })
    }

    pub fn set_breakpoint_condition(&self, file: &str, line: u32, condition: Option<String>) -> DebugResult<Breakpoint> {
        self.edit_breakpoints(|registry| {
            let change = registry.set_condition(file, line, condition)?;
            let bp = change_breakpoint(&change);
            Ok((change, bp))
        })
    }

    pub fn set_breakpoint_max_hits(&self, file: &str, line: u32, max_hits: Option<u32>) -> DebugResult<Breakpoint> {
        self.edit_breakpoints(|registry| {
            let change = registry.set_max_hits(file, line, max_hits)?;
            let bp = change_breakpoint(&change);
            Ok((change, bp))
        })
    }

    pub fn reset_breakpoint(&self, file: &str, line: u32) -> DebugResult<Breakpoint> {
        self.edit_breakpoints(|registry| {
            let change = registry.reset(file, line)?;
            let bp = change_breakpoint(&change);
            Ok((change, bp))
        })
    }

    pub fn clear_breakpoints(&self) {
        let mut state = self.shared().state.lock();
        for change in state.breakpoints.clear() {
            state.emit(change.into());
        }
    }

    pub fn breakpoint(&self, file: &str, line: u32) -> Option<Breakpoint> {
        self.shared().state.lock().breakpoints.get(file, line).cloned()
    }

    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.shared().state.lock().breakpoints.list()
    }

    // ---- queries ----

    pub fn lifecycle(&self) -> LifecycleState {
        self.shared().state.lock().lifecycle
    }

    pub fn status(&self) -> DebuggerStatus {
        let state = self.shared().state.lock();
        DebuggerStatus {
            lifecycle: state.lifecycle,
            run_mode: state.control.run_mode,
            file: state.file.clone(),
            line: state.position.map(|p| p.line),
            column: state.position.map(|p| p.column),
            breakpoints: state.breakpoints.len(),
            function_depth: state.control.function_depth,
            injected_evaluation_active: state.injection_active(),
        }
    }

    /// Line of the current statement, -1 when nothing runs
    pub fn current_line(&self) -> i64 {
        let state = self.shared().state.lock();
        match (state.lifecycle, state.position) {
            (LifecycleState::NotRunning, _) | (_, None) => -1,
            (_, Some(position)) => i64::from(position.line),
        }
    }

    /// Frames from the outermost to the innermost
    pub fn backtrace(&self) -> Vec<Frame> {
        self.shared().state.lock().call_stack.frames().to_vec()
    }

    /// Variables published at the latest pause
    pub fn variables(&self) -> Vec<VariableRecord> {
        self.shared().state.lock().variables.current().to_vec()
    }

    /// File breakpoints default to when a command names only a line
    pub fn default_file(&self) -> Option<String> {
        let state = self.shared().state.lock();
        state.default_file.clone().or_else(|| state.file.clone())
    }

    pub fn set_default_file(&self, file: &str) {
        self.shared().state.lock().default_file = Some(file.to_string());
    }

    /// Poll until the lifecycle reaches `target` or `timeout` passes
    pub async fn wait_for_state(&self, target: LifecycleState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.lifecycle() == target {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(STATE_POLL).await;
        }
    }
}

fn change_breakpoint(change: &BreakpointChange) -> Breakpoint {
    match change {
        BreakpointChange::Added(bp) | BreakpointChange::Removed(bp) | BreakpointChange::Modified(bp) => bp.clone(),
    }
}

/// Periodically repair a lifecycle the worker failed to reset
fn spawn_liveness_checker(shared: &Arc<Shared>, stop: Arc<Notify>) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!("No tokio runtime, liveness checker disabled");
        return;
    };
    let weak = Arc::downgrade(shared);
    runtime.spawn(async move {
        loop {
            let Some(shared) = weak.upgrade() else {
                break;
            };
            let interrupted = shared.state.lock().lifecycle == LifecycleState::Interrupted;
            let interval = shared.config.liveness_interval(interrupted);
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shared.finished.notified() => {}
                _ = stop.notified() => break,
            }
            shared.check_liveness();
        }
        debug!("Liveness checker stopped");
    });
}
