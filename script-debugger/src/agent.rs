// Script worker and interrupt/resume synchronizer
//
// All engine work happens on one dedicated thread. While a script runs the
// worker holds the engine lock; at every statement boundary its hooks consult
// the shared state and, when a pause is due, release the engine lock and park
// on a condition variable until the controller picks a new run-mode. While
// parked the worker also serves injected evaluations and snapshot refreshes.

use crate::backtrace::{CallStack, Frame};
use crate::breakpoints::{BreakpointRegistry, ConditionVerdict, HitOutcome};
use crate::config::DebuggerConfig;
use crate::control::{ControlState, StatementDecision};
use crate::engine::{
    Completion, EngineFactory, EngineHooks, EngineValue, HookAction, ScriptContext, ScriptEngine, ScriptException,
    SyntaxCheck, ValueLimits,
};
use crate::events::{DebuggerEvent, EventSender};
use crate::injected::{EvaluationOutcome, InjectionPhase, InjectionSlot};
use crate::types::{ExecutionStats, InterruptReason, LifecycleState, Position, RunMode, ScriptId};
use crate::variables::{build_records, ScopeKey, SnapshotOptions, VariableRecord, VariableTracker};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, error, info, warn};

/// Scripts recurse on the worker's native stack
const WORKER_STACK_SIZE: usize = 16 * 1024 * 1024;

/// Result of a top-level evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptOutcome {
    pub completion: Completion,
    pub stats: ExecutionStats,
}

/// Everything the worker and the controller share, guarded by one lock
pub(crate) struct AgentState {
    pub lifecycle: LifecycleState,
    pub control: ControlState,
    pub breakpoints: BreakpointRegistry,
    pub call_stack: CallStack,
    pub variables: VariableTracker,
    pub position: Option<Position>,
    pub file: Option<String>,
    pub default_file: Option<String>,
    pub interrupt_on_breakpoints: bool,
    pub interrupt_on_exceptions: bool,
    pub injection: Option<InjectionSlot>,
    /// Set after an injection so the pause loop republishes its snapshot
    pub needs_refresh: bool,
    pub stats: ExecutionStats,
    started_at: Option<Instant>,
    uncaught_reported: bool,
    injection_counter: u64,
    events: EventSender,
}

impl AgentState {
    fn new(config: &DebuggerConfig, events: EventSender) -> Self {
        Self {
            lifecycle: LifecycleState::NotRunning,
            control: ControlState::default(),
            breakpoints: BreakpointRegistry::new(),
            call_stack: CallStack::new(),
            variables: VariableTracker::new(),
            position: None,
            file: None,
            default_file: None,
            interrupt_on_breakpoints: config.interrupt_on_breakpoints,
            interrupt_on_exceptions: config.interrupt_on_exceptions,
            injection: None,
            needs_refresh: false,
            stats: ExecutionStats::default(),
            started_at: None,
            uncaught_reported: false,
            injection_counter: 0,
            events,
        }
    }

    pub fn emit(&self, event: DebuggerEvent) {
        self.events.send(event);
    }

    pub fn set_lifecycle(&mut self, new: LifecycleState) {
        let old = self.lifecycle;
        if old != new {
            debug!("Lifecycle {} -> {}", old, new);
            self.lifecycle = new;
            self.emit(DebuggerEvent::StateChanged { old, new });
        }
    }

    pub fn next_injection_id(&mut self) -> u64 {
        self.injection_counter += 1;
        self.injection_counter
    }

    pub fn injection_active(&self) -> bool {
        self.injection.is_some()
    }

    /// An accepted abort that the worker has not finished yet
    pub fn abort_pending(&self) -> bool {
        self.lifecycle == LifecycleState::Aborting || self.control.run_mode.is_abort()
    }

    fn move_to(&mut self, position: Position) {
        let old = self.position.replace(position);
        self.call_stack.update_top(position.line, position.column);
        if old != Some(position) {
            self.emit(DebuggerEvent::PositionChanged {
                line: position.line,
                column: position.column,
                old_line: old.map(|p| p.line),
                old_column: old.map(|p| p.column),
            });
        }
    }

    fn publish_snapshot(&mut self, records: Vec<VariableRecord>, key: ScopeKey) {
        for change in self.call_stack.take_updates() {
            self.emit(change.into());
        }
        let diff = self.variables.update(records, key);
        self.emit(DebuggerEvent::VariablesChanged {
            variables: self.variables.current().to_vec(),
            diff,
        });
    }

    fn clear_call_stack(&mut self) {
        for change in self.call_stack.clear() {
            self.emit(change.into());
        }
        self.variables.clear();
    }

    /// Drop back to NotRunning and publish the final statistics
    pub fn finish(&mut self, aborted: bool) {
        if aborted {
            self.set_lifecycle(LifecycleState::Aborting);
            self.emit(DebuggerEvent::Aborted);
        }
        if let Some(started) = self.started_at.take() {
            self.stats.duration_ms = started.elapsed().as_millis() as u64;
        }
        self.stats.aborted = aborted;
        self.clear_call_stack();
        self.control = ControlState::default();
        self.position = None;
        self.set_lifecycle(LifecycleState::NotRunning);
        self.emit(DebuggerEvent::Stopped {
            stats: self.stats.clone(),
        });
    }
}

/// State shared between the worker thread and the controller
pub(crate) struct Shared {
    pub state: Mutex<AgentState>,
    /// Signalled whenever the run-mode, an injection or the lifecycle changes
    pub resume: Condvar,
    /// Held by whoever may touch the engine: the running worker or an injecting caller
    pub engine_lock: Mutex<()>,
    pub config: DebuggerConfig,
    evaluating: AtomicBool,
    alive: AtomicBool,
    /// Wakes the liveness checker when the outermost evaluation exits
    pub finished: Notify,
}

impl Shared {
    pub fn new(config: DebuggerConfig, events: EventSender) -> Self {
        Self {
            state: Mutex::new(AgentState::new(&config, events)),
            resume: Condvar::new(),
            engine_lock: Mutex::new(()),
            config,
            evaluating: AtomicBool::new(false),
            alive: AtomicBool::new(false),
            finished: Notify::new(),
        }
    }

    pub fn is_evaluating(&self) -> bool {
        self.evaluating.load(Ordering::SeqCst)
    }

    pub fn worker_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn value_limits(&self) -> ValueLimits {
        ValueLimits {
            max_depth: self.config.max_variable_depth,
            max_children: self.config.max_child_variables,
        }
    }

    fn snapshot_options(&self) -> SnapshotOptions {
        SnapshotOptions {
            short_value_length: self.config.short_value_length,
            helper_object_names: self.config.helper_object_names.clone(),
            max_children: self.config.max_child_variables,
        }
    }

    /// Force NotRunning when the worker is no longer evaluating anything
    ///
    /// Returns true if the state had to be repaired.
    pub fn check_liveness(&self) -> bool {
        let mut state = self.state.lock();
        if state.lifecycle == LifecycleState::NotRunning || self.is_evaluating() {
            return false;
        }
        warn!("Script finished without the worker reporting it, forcing shutdown");
        let aborted = state.lifecycle == LifecycleState::Aborting;
        state.injection = None;
        state.finish(aborted);
        self.resume.notify_all();
        true
    }
}

/// Work items executed on the worker thread
pub(crate) enum WorkerJob {
    Run {
        file: String,
        code: String,
        interrupt_at_start: bool,
        reply: oneshot::Sender<ScriptOutcome>,
    },
    Call {
        name: String,
        args: Vec<EngineValue>,
        reply: oneshot::Sender<ScriptOutcome>,
    },
    CheckSyntax {
        code: String,
        reply: oneshot::Sender<SyntaxCheck>,
    },
}

/// Clears the alive flag however the worker exits
struct AliveGuard<'a>(&'a Shared);

impl Drop for AliveGuard<'_> {
    fn drop(&mut self) {
        self.0.alive.store(false, Ordering::SeqCst);
        self.0.evaluating.store(false, Ordering::SeqCst);
        self.0.resume.notify_all();
    }
}

pub(crate) fn spawn_worker(
    shared: Arc<Shared>,
    factory: EngineFactory,
) -> std::io::Result<(mpsc::UnboundedSender<WorkerJob>, JoinHandle<()>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    shared.alive.store(true, Ordering::SeqCst);
    let thread_shared = shared.clone();
    let spawned = std::thread::Builder::new()
        .name("script-worker".to_string())
        .stack_size(WORKER_STACK_SIZE)
        .spawn(move || worker_main(thread_shared, factory, rx));
    match spawned {
        Ok(handle) => Ok((tx, handle)),
        Err(e) => {
            shared.alive.store(false, Ordering::SeqCst);
            Err(e)
        }
    }
}

fn worker_main(shared: Arc<Shared>, factory: EngineFactory, mut jobs: mpsc::UnboundedReceiver<WorkerJob>) {
    let _alive = AliveGuard(&shared);
    let mut engine = factory();
    info!("Script worker started");

    while let Some(job) = jobs.blocking_recv() {
        match job {
            WorkerJob::Run {
                file,
                code,
                interrupt_at_start,
                reply,
            } => {
                let outcome = run_top_level(&shared, &file, interrupt_at_start, |hooks| {
                    engine.evaluate(&code, &file, hooks)
                });
                let _ = reply.send(outcome);
            }
            WorkerJob::Call { name, args, reply } => {
                let file = shared
                    .state
                    .lock()
                    .default_file
                    .clone()
                    .unwrap_or_else(|| name.clone());
                let outcome = run_top_level(&shared, &file, false, |hooks| engine.call_function(&name, args, hooks));
                let _ = reply.send(outcome);
            }
            WorkerJob::CheckSyntax { code, reply } => {
                let result = {
                    let _engine = shared.engine_lock.lock();
                    check_syntax(engine.as_ref(), &code)
                };
                let _ = reply.send(result);
            }
        }
    }
    info!("Script worker stopped");
}

fn check_syntax(engine: &dyn ScriptEngine, code: &str) -> SyntaxCheck {
    let result = engine.check_syntax(code);
    if let SyntaxCheck::Invalid { line, message, .. } = &result {
        debug!("Syntax check failed at line {}: {}", line, message);
    }
    result
}

/// Run one outermost evaluation with the debugger hooks installed
fn run_top_level<F>(shared: &Shared, file: &str, interrupt_at_start: bool, run: F) -> ScriptOutcome
where
    F: FnOnce(&mut dyn EngineHooks) -> Completion,
{
    let guard = shared.engine_lock.lock();
    shared.evaluating.store(true, Ordering::SeqCst);
    {
        let mut state = shared.state.lock();
        state.clear_call_stack();
        state.control = ControlState::start(interrupt_at_start);
        state.stats = ExecutionStats::default();
        state.started_at = Some(Instant::now());
        state.uncaught_reported = false;
        state.position = None;
        state.file = Some(file.to_string());
        if state.default_file.is_none() {
            state.default_file = Some(file.to_string());
        }
        info!("Starting {} (interrupt at start: {})", file, interrupt_at_start);
        state.set_lifecycle(LifecycleState::Running);
        state.emit(DebuggerEvent::Started { file: file.to_string() });
    }

    let mut hooks = WorkerHooks::main(shared, guard);
    let completion = run(&mut hooks);
    drop(hooks);

    let stats = {
        let mut state = shared.state.lock();
        match &completion {
            Completion::Value(value) => state.stats.result = Some(value.render()),
            Completion::Exception(exception) => {
                state.stats.exception = Some(exception.message.clone());
                if !state.uncaught_reported {
                    state.emit(DebuggerEvent::Exception {
                        line: exception.line,
                        message: exception.message.clone(),
                    });
                }
            }
            Completion::Aborted => {}
        }
        state.finish(completion.is_aborted());
        info!("Finished {} ({} statements)", file, state.stats.statements_executed);
        shared.evaluating.store(false, Ordering::SeqCst);
        shared.resume.notify_all();
        state.stats.clone()
    };
    shared.finished.notify_one();
    ScriptOutcome { completion, stats }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookScope {
    /// The outermost program or function call
    Main,
    /// Code injected while paused; `stepping` when started with a pause
    Injected { stepping: bool },
}

/// What the pause loop does next
enum PauseAction {
    Inject,
    Refresh,
    Resume,
    Abort,
}

/// Debugger hooks installed while the worker evaluates code
struct WorkerHooks<'g> {
    shared: &'g Shared,
    scope: HookScope,
    /// Engine ownership while running; released while parked
    engine_guard: Option<MutexGuard<'g, ()>>,
}

impl<'g> WorkerHooks<'g> {
    fn main(shared: &'g Shared, guard: MutexGuard<'g, ()>) -> Self {
        Self {
            shared,
            scope: HookScope::Main,
            engine_guard: Some(guard),
        }
    }

    fn injected(shared: &'g Shared, stepping: bool) -> Self {
        Self {
            shared,
            scope: HookScope::Injected { stepping },
            engine_guard: None,
        }
    }

    fn tracks_position(&self) -> bool {
        match self.scope {
            HookScope::Main => true,
            HookScope::Injected { stepping } => stepping,
        }
    }

    /// Count a breakpoint hit at the current boundary and decide whether it fires
    fn check_breakpoint(&mut self, ctx: &mut dyn ScriptContext, file: &str, line: u32) -> bool {
        let outcome = {
            let mut state = self.shared.state.lock();
            if !state.interrupt_on_breakpoints || state.abort_pending() {
                return false;
            }
            match state.breakpoints.register_hit(file, line) {
                Some((change, outcome)) => {
                    state.emit(change.into());
                    outcome
                }
                None => return false,
            }
        };

        let verdict = match outcome {
            HitOutcome::Fire(breakpoint) => ConditionVerdict::Fire(breakpoint),
            HitOutcome::EvaluateCondition { expression, .. } => {
                // evaluated without the state lock, the condition runs script code
                let result = self.evaluate_condition(ctx, &expression);
                let mut state = self.shared.state.lock();
                match result {
                    Some(result) => state.breakpoints.apply_condition_result(file, line, result),
                    None => {
                        debug!("Condition at {}:{} abandoned by an abort", file, line);
                        ConditionVerdict::Skip
                    }
                }
            }
        };

        let mut state = self.shared.state.lock();
        match verdict {
            ConditionVerdict::Fire(breakpoint) => {
                if state.abort_pending() || !state.control.force_interrupt() {
                    debug!("Breakpoint at {}:{} ignored, abort pending", breakpoint.file, breakpoint.line);
                    return false;
                }
                info!("Breakpoint reached at {}:{}", breakpoint.file, breakpoint.line);
                state.stats.breakpoints_hit += 1;
                state.emit(DebuggerEvent::BreakpointReached { breakpoint });
                true
            }
            ConditionVerdict::Skip => false,
            ConditionVerdict::Error { breakpoint, message } => {
                warn!(
                    "Breakpoint condition at {}:{} failed: {}",
                    breakpoint.file, breakpoint.line, message
                );
                state.emit(DebuggerEvent::BreakpointModified {
                    breakpoint: breakpoint.clone(),
                });
                state.emit(DebuggerEvent::BreakpointConditionError { breakpoint, message });
                false
            }
        }
    }

    /// None when the condition was cut short by a script abort
    fn evaluate_condition(&self, ctx: &mut dyn ScriptContext, expression: &str) -> Option<Result<bool, String>> {
        let mut hooks = ConditionHooks {
            shared: self.shared,
            deadline: Instant::now() + self.shared.config.condition_timeout(),
            timed_out: false,
        };
        let completion = ctx.evaluate_nested(expression, "<condition>", false, &mut hooks);
        match completion {
            Completion::Value(value) => Some(
                value
                    .as_bool()
                    .ok_or_else(|| format!("Condition evaluated to {}, not a boolean", value.render())),
            ),
            Completion::Exception(exception) => Some(Err(exception.message)),
            Completion::Aborted if hooks.timed_out => Some(Err(format!(
                "Condition did not finish within {} ms",
                self.shared.config.condition_timeout_ms
            ))),
            Completion::Aborted => None,
        }
    }

    fn snapshot(&self, ctx: &dyn ScriptContext) -> (Vec<VariableRecord>, String) {
        let chain = ctx.scope_chain(self.shared.value_limits());
        let scope_name = chain.first().map(|s| s.name.clone()).unwrap_or_default();
        (build_records(&chain, &self.shared.snapshot_options()), scope_name)
    }

    fn publish(&self, ctx: &dyn ScriptContext) {
        let (records, scope_name) = self.snapshot(ctx);
        let mut state = self.shared.state.lock();
        let key = ScopeKey {
            stack_depth: state.call_stack.depth(),
            scope_name,
        };
        state.publish_snapshot(records, key);
    }

    /// Park the worker until the controller resumes or aborts
    fn block_until_resumed(&mut self, ctx: &mut dyn ScriptContext, reason: InterruptReason) -> HookAction {
        let injected = self.scope != HookScope::Main;
        {
            let mut state = self.shared.state.lock();
            // an accepted abort must not be turned back into a pause
            let abort = state.lifecycle == LifecycleState::Aborting
                || state.control.run_mode == RunMode::AbortMain
                || (injected && state.control.run_mode == RunMode::AbortInjected);
            if abort {
                info!("Not pausing ({:?}), abort pending", reason);
                return HookAction::Abort;
            }
            self.engine_guard = None;
            state.set_lifecycle(LifecycleState::Interrupted);
            state.stats.pauses += 1;
        }
        self.publish(ctx);
        {
            let state = self.shared.state.lock();
            let position = state.position.unwrap_or(Position { line: 0, column: 0 });
            info!("Interrupted ({:?}) at line {}", reason, position.line);
            state.emit(DebuggerEvent::Interrupted {
                reason,
                file: state.file.clone().unwrap_or_default(),
                line: position.line,
                column: position.column,
            });
        }

        loop {
            let action = {
                let mut state = self.shared.state.lock();
                loop {
                    let pending = state
                        .injection
                        .as_ref()
                        .is_some_and(|slot| slot.phase == InjectionPhase::Initializing);
                    if !injected && pending {
                        break PauseAction::Inject;
                    }
                    if state.needs_refresh {
                        state.needs_refresh = false;
                        break PauseAction::Refresh;
                    }
                    match state.control.run_mode {
                        RunMode::AbortMain => break PauseAction::Abort,
                        RunMode::AbortInjected if injected => break PauseAction::Abort,
                        RunMode::AbortInjected => {
                            debug!("Ignoring abort-injected with no injection in flight");
                            state.control.run_mode = RunMode::Interrupt;
                        }
                        RunMode::Interrupt | RunMode::RunInjectedProgram | RunMode::StepIntoInjectedProgram => {
                            self.shared.resume.wait(&mut state);
                        }
                        _ => break PauseAction::Resume,
                    }
                }
            };

            match action {
                PauseAction::Inject => self.run_injection(ctx),
                PauseAction::Refresh => self.publish(ctx),
                PauseAction::Abort => {
                    info!("Abort requested while interrupted");
                    return HookAction::Abort;
                }
                PauseAction::Resume => {
                    if !injected {
                        match self
                            .shared
                            .engine_lock
                            .try_lock_for(self.shared.config.engine_lock_timeout())
                        {
                            Some(guard) => self.engine_guard = Some(guard),
                            None => {
                                warn!("Engine still in use by the controller, staying interrupted");
                                continue;
                            }
                        }
                    }
                    let mut state = self.shared.state.lock();
                    if matches!(state.control.run_mode, RunMode::Interrupt) || state.control.run_mode.is_abort() {
                        // mode changed again while waiting for the engine
                        self.engine_guard = None;
                        continue;
                    }
                    let will_pause_again = state.control.run_mode.is_stepping();
                    if !injected {
                        state.set_lifecycle(LifecycleState::Running);
                    }
                    debug!("Resuming with {:?}", state.control.run_mode);
                    state.emit(DebuggerEvent::Continued { will_pause_again });
                    return HookAction::Continue;
                }
            }
        }
    }

    /// Evaluate the posted injection inside the paused context
    fn run_injection(&mut self, ctx: &mut dyn ScriptContext) {
        let (id, request) = {
            let mut state = self.shared.state.lock();
            let started = match state.injection.as_mut() {
                Some(slot) if slot.phase == InjectionPhase::Initializing => {
                    slot.phase = InjectionPhase::Evaluating;
                    (slot.id, slot.request.clone())
                }
                _ => return,
            };
            state.variables.enter_injection();
            started
        };
        debug!("Running injected evaluation #{}", id);

        let mut hooks = WorkerHooks::injected(self.shared, request.interrupt_at_start);
        let completion = ctx.evaluate_nested(&request.code, &request.label, true, &mut hooks);

        let mut state = self.shared.state.lock();
        state.variables.leave_injection();
        let Some(slot) = state.injection.as_mut() else {
            warn!("Injected evaluation #{} finished after its caller left", id);
            return;
        };
        slot.phase = InjectionPhase::UpdatingParentContext;
        let saved_mode = slot.saved_mode;
        let saved_position = slot.saved_position;
        let saved_file = slot.saved_file.take();
        let saved_depth = slot.saved_depth;

        if state.control.run_mode != RunMode::AbortMain {
            state.control.run_mode = saved_mode;
        }
        for change in state.call_stack.truncate(saved_depth) {
            state.emit(change.into());
        }
        if let Some(position) = saved_position {
            state.move_to(position);
        }
        state.file = saved_file;

        if let Some(slot) = state.injection.as_mut() {
            slot.phase = InjectionPhase::NotRunning;
            slot.outcome = Some(EvaluationOutcome::from_completion(completion));
        }
        state.needs_refresh = true;
        self.shared.resume.notify_all();
    }
}

impl EngineHooks for WorkerHooks<'_> {
    fn on_statement(
        &mut self,
        ctx: &mut dyn ScriptContext,
        _script_id: ScriptId,
        file: &str,
        position: Position,
    ) -> HookAction {
        let decision = {
            let mut state = self.shared.state.lock();
            let decision = state.control.on_statement(position.line);
            if let HookScope::Injected { stepping } = self.scope {
                match decision {
                    StatementDecision::AbortMain | StatementDecision::AbortInjected => return HookAction::Abort,
                    _ if !stepping => return HookAction::Continue,
                    _ => {}
                }
            }
            if self.scope == HookScope::Main {
                state.stats.statements_executed += 1;
            }
            if state.file.as_deref() != Some(file) {
                state.file = Some(file.to_string());
            }
            state.move_to(position);
            decision
        };

        let mut reason = match decision {
            StatementDecision::Continue => None,
            StatementDecision::Pause(reason) => Some(reason),
            StatementDecision::AbortMain => return HookAction::Abort,
            StatementDecision::AbortInjected => {
                warn!("Abort-injected reached the main program, ignoring it");
                let mut state = self.shared.state.lock();
                state.control.run_mode = RunMode::Run;
                None
            }
        };

        if self.check_breakpoint(ctx, file, position.line) {
            reason = Some(InterruptReason::Breakpoint);
        }

        match reason {
            Some(reason) => self.block_until_resumed(ctx, reason),
            None => HookAction::Continue,
        }
    }

    fn on_function_entry(&mut self, ctx: &mut dyn ScriptContext, script_id: ScriptId, name: &str) {
        let file = ctx
            .current_context_info()
            .map(|info| info.file_name)
            .unwrap_or_default();
        let mut state = self.shared.state.lock();
        state.control.on_function_entry();
        if self.scope == HookScope::Main {
            state.stats.function_calls += 1;
        }
        if self.tracks_position() || self.scope == HookScope::Main {
            let change = state.call_stack.push(Frame::new(name, &file, script_id));
            state.emit(change.into());
        }
    }

    fn on_function_exit(&mut self, _ctx: &mut dyn ScriptContext, _script_id: ScriptId, _return_value: &EngineValue) {
        let mut state = self.shared.state.lock();
        let reached_top = state.control.on_function_exit();
        if self.tracks_position() {
            if let Some(change) = state.call_stack.pop() {
                state.emit(change.into());
            }
            let depth = state.call_stack.depth();
            state.variables.on_scope_popped(depth);
        }
        if reached_top && self.scope == HookScope::Main {
            self.shared.finished.notify_one();
        }
    }

    fn on_exception(
        &mut self,
        ctx: &mut dyn ScriptContext,
        _script_id: ScriptId,
        exception: &ScriptException,
        has_handler: bool,
    ) -> HookAction {
        let pause = {
            let mut state = self.shared.state.lock();
            let abort = match self.scope {
                HookScope::Main => state.control.run_mode == RunMode::AbortMain,
                HookScope::Injected { .. } => state.control.run_mode.is_abort(),
            };
            if abort {
                return HookAction::Abort;
            }
            if has_handler || self.scope != HookScope::Main {
                return HookAction::Continue;
            }
            warn!("Uncaught exception: {}", exception.message);
            state.uncaught_reported = true;
            state.emit(DebuggerEvent::Exception {
                line: exception.line,
                message: exception.message.clone(),
            });
            state.interrupt_on_exceptions
        };
        if pause {
            self.block_until_resumed(ctx, InterruptReason::Exception)
        } else {
            HookAction::Continue
        }
    }
}

/// Hooks for breakpoint conditions: no stepping, no notifications
struct ConditionHooks<'g> {
    shared: &'g Shared,
    deadline: Instant,
    timed_out: bool,
}

impl EngineHooks for ConditionHooks<'_> {
    fn on_statement(&mut self, _: &mut dyn ScriptContext, _: ScriptId, _: &str, _: Position) -> HookAction {
        if Instant::now() >= self.deadline {
            error!("Breakpoint condition ran past its deadline");
            self.timed_out = true;
            return HookAction::Abort;
        }
        if self.shared.state.lock().control.run_mode == RunMode::AbortMain {
            return HookAction::Abort;
        }
        HookAction::Continue
    }

    fn on_function_entry(&mut self, _: &mut dyn ScriptContext, _: ScriptId, _: &str) {}

    fn on_function_exit(&mut self, _: &mut dyn ScriptContext, _: ScriptId, _: &EngineValue) {}

    fn on_exception(&mut self, _: &mut dyn ScriptContext, _: ScriptId, _: &ScriptException, _: bool) -> HookAction {
        HookAction::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ContextInfo, ScopeSnapshot};
    use crate::events::event_channel;
    use crate::types::RunModeRequest;

    fn shared() -> Shared {
        let (tx, _rx) = event_channel();
        Shared::new(DebuggerConfig::default(), tx)
    }

    /// Context whose nested evaluations all complete with `condition`
    struct StubContext<'a> {
        condition: Completion,
        /// Aborted from the controller side while the condition runs
        abort_during: Option<&'a Shared>,
    }

    impl StubContext<'_> {
        fn returning(condition: Completion) -> Self {
            Self {
                condition,
                abort_during: None,
            }
        }
    }

    impl ScriptContext for StubContext<'_> {
        fn evaluate_nested(
            &mut self,
            _code: &str,
            _label: &str,
            _keep_declarations: bool,
            _hooks: &mut dyn EngineHooks,
        ) -> Completion {
            if let Some(shared) = self.abort_during {
                let mut state = shared.state.lock();
                state.set_lifecycle(LifecycleState::Aborting);
                state.control.arm(RunModeRequest::Abort);
            }
            self.condition.clone()
        }

        fn scope_chain(&self, _limits: ValueLimits) -> Vec<ScopeSnapshot> {
            Vec::new()
        }

        fn backtrace(&self) -> Vec<ContextInfo> {
            Vec::new()
        }

        fn current_context_info(&self) -> Option<ContextInfo> {
            None
        }
    }

    fn main_hooks(shared: &Shared) -> WorkerHooks<'_> {
        WorkerHooks {
            shared,
            scope: HookScope::Main,
            engine_guard: None,
        }
    }

    #[test]
    fn test_breakpoint_does_not_override_pending_abort() {
        let shared = shared();
        {
            let mut state = shared.state.lock();
            state.breakpoints.add("main.js", 3, true, None);
            state.set_lifecycle(LifecycleState::Aborting);
            state.control.arm(RunModeRequest::Abort);
        }
        let mut ctx = StubContext::returning(Completion::Value(EngineValue::Boolean(true)));
        assert!(!main_hooks(&shared).check_breakpoint(&mut ctx, "main.js", 3));

        let state = shared.state.lock();
        assert_eq!(state.control.run_mode, RunMode::AbortMain);
        assert_eq!(state.breakpoints.get("main.js", 3).unwrap().hit_count, 0);
        assert_eq!(state.stats.breakpoints_hit, 0);
    }

    #[test]
    fn test_abort_during_condition_wins() {
        let shared = shared();
        {
            let mut state = shared.state.lock();
            state.set_lifecycle(LifecycleState::Running);
            state.breakpoints.add("main.js", 3, true, None);
            state.breakpoints.set_condition("main.js", 3, Some("true".into())).unwrap();
        }
        let mut ctx = StubContext {
            condition: Completion::Value(EngineValue::Boolean(true)),
            abort_during: Some(&shared),
        };
        assert!(!main_hooks(&shared).check_breakpoint(&mut ctx, "main.js", 3));

        let state = shared.state.lock();
        assert_eq!(state.control.run_mode, RunMode::AbortMain);
        assert_eq!(state.stats.breakpoints_hit, 0);
    }

    #[test]
    fn test_pause_refused_while_aborting() {
        let shared = shared();
        {
            let mut state = shared.state.lock();
            state.set_lifecycle(LifecycleState::Aborting);
            state.control.arm(RunModeRequest::Abort);
        }
        let mut ctx = StubContext::returning(Completion::Aborted);
        let action = main_hooks(&shared).block_until_resumed(&mut ctx, InterruptReason::Breakpoint);
        assert_eq!(action, HookAction::Abort);

        let state = shared.state.lock();
        assert_eq!(state.lifecycle, LifecycleState::Aborting);
        assert_eq!(state.stats.pauses, 0);
    }

    #[test]
    fn test_true_condition_fires_breakpoint() {
        let (tx, rx) = event_channel();
        let shared = Shared::new(DebuggerConfig::default(), tx);
        {
            let mut state = shared.state.lock();
            state.breakpoints.add("main.js", 3, true, None);
            state.breakpoints.set_condition("main.js", 3, Some("x > 1".into())).unwrap();
        }
        let mut ctx = StubContext::returning(Completion::Value(EngineValue::Boolean(true)));
        assert!(main_hooks(&shared).check_breakpoint(&mut ctx, "main.js", 3));
        assert_eq!(shared.state.lock().control.run_mode, RunMode::Interrupt);

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let events = rt.block_on(rx.drain());
        assert!(events
            .iter()
            .any(|e| matches!(e, DebuggerEvent::BreakpointReached { breakpoint } if breakpoint.line == 3)));
    }

    #[test]
    fn test_aborted_condition_is_not_an_error() {
        let (tx, rx) = event_channel();
        let shared = Shared::new(DebuggerConfig::default(), tx);
        {
            let mut state = shared.state.lock();
            state.breakpoints.add("main.js", 3, true, None);
            state.breakpoints.set_condition("main.js", 3, Some("x > 1".into())).unwrap();
        }
        let mut ctx = StubContext::returning(Completion::Aborted);
        assert!(!main_hooks(&shared).check_breakpoint(&mut ctx, "main.js", 3));

        let bp = shared.state.lock().breakpoints.get("main.js", 3).cloned().unwrap();
        assert!(bp.enabled);
        assert_eq!(bp.last_error, None);
        assert_eq!(bp.hit_count, 1);

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let events = rt.block_on(rx.drain());
        assert!(!events
            .iter()
            .any(|e| matches!(e, DebuggerEvent::BreakpointConditionError { .. })));
    }

    #[test]
    fn test_lifecycle_change_emits_once() {
        let (tx, rx) = event_channel();
        let mut state = AgentState::new(&DebuggerConfig::default(), tx);
        state.set_lifecycle(LifecycleState::Running);
        state.set_lifecycle(LifecycleState::Running);
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let events = rt.block_on(rx.drain());
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_liveness_repairs_orphaned_state() {
        let shared = shared();
        shared.state.lock().set_lifecycle(LifecycleState::Running);
        assert!(shared.check_liveness());
        assert_eq!(shared.state.lock().lifecycle, LifecycleState::NotRunning);
        assert!(!shared.check_liveness());
    }

    #[test]
    fn test_liveness_leaves_active_worker_alone() {
        let shared = shared();
        shared.evaluating.store(true, Ordering::SeqCst);
        shared.state.lock().set_lifecycle(LifecycleState::Interrupted);
        assert!(!shared.check_liveness());
    }

    #[test]
    fn test_finish_reports_abort() {
        let (tx, rx) = event_channel();
        let mut state = AgentState::new(&DebuggerConfig::default(), tx);
        state.set_lifecycle(LifecycleState::Running);
        state.finish(true);
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let events = rt.block_on(rx.drain());
        assert!(events.contains(&DebuggerEvent::Aborted));
        assert!(matches!(
            events.last(),
            Some(DebuggerEvent::Stopped { stats }) if stats.aborted
        ));
    }
}
