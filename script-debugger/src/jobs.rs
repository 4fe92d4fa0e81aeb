// Task queue
//
// Schedules debugger work as tokio tasks. A job may name a mutual-exclusion
// group (at most one job of a group runs at a time) and another job it must
// wait for. Results come back through a per-job completion handle.

use crate::agent::ScriptOutcome;
use crate::debugger::Debugger;
use crate::engine::{EngineValue, SyntaxCheck};
use crate::error::{DebugResult, DebuggerError};
use crate::injected::{EvaluationOutcome, EvaluationRequest};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

pub type JobId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExclusionGroup {
    /// Only one job may run script code at a time
    EngineAccess,
    /// Only one injected evaluation at a time
    InContextEvaluation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DebuggerJob {
    LoadScript {
        file: String,
        code: String,
        interrupt_at_start: bool,
    },
    CallFunction {
        name: String,
        args: Vec<EngineValue>,
    },
    EvaluateInContext(EvaluationRequest),
    ExecuteConsoleCommand {
        line: String,
    },
    CheckSyntax {
        code: String,
    },
}

impl DebuggerJob {
    pub fn kind(&self) -> &'static str {
        match self {
            DebuggerJob::LoadScript { .. } => "load-script",
            DebuggerJob::CallFunction { .. } => "call-function",
            DebuggerJob::EvaluateInContext(_) => "evaluate-in-context",
            DebuggerJob::ExecuteConsoleCommand { .. } => "console-command",
            DebuggerJob::CheckSyntax { .. } => "check-syntax",
        }
    }

    pub fn default_group(&self) -> Option<ExclusionGroup> {
        match self {
            DebuggerJob::LoadScript { .. } | DebuggerJob::CallFunction { .. } | DebuggerJob::CheckSyntax { .. } => {
                Some(ExclusionGroup::EngineAccess)
            }
            DebuggerJob::EvaluateInContext(_) => Some(ExclusionGroup::InContextEvaluation),
            // console lines must stay usable while a script is paused
            DebuggerJob::ExecuteConsoleCommand { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    Script(ScriptOutcome),
    Evaluation(EvaluationOutcome),
    Console(String),
    Syntax(SyntaxCheck),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOptions {
    pub group: Option<ExclusionGroup>,
    pub depends_on: Option<JobId>,
}

impl JobOptions {
    /// Options with the job's default exclusion group
    pub fn for_job(job: &DebuggerJob) -> Self {
        Self {
            group: job.default_group(),
            depends_on: None,
        }
    }

    pub fn after(mut self, job: JobId) -> Self {
        self.depends_on = Some(job);
        self
    }
}

/// Completion handle returned by `submit`
#[derive(Debug)]
pub struct JobHandle {
    pub id: JobId,
    rx: oneshot::Receiver<DebugResult<JobResult>>,
}

impl JobHandle {
    pub async fn wait(self) -> DebugResult<JobResult> {
        self.rx.await.map_err(|_| DebuggerError::JobCancelled)?
    }
}

pub struct TaskQueue {
    debugger: Debugger,
    groups: HashMap<ExclusionGroup, Arc<tokio::sync::Mutex<()>>>,
    /// Completion flags of jobs still in flight; finished jobs are pruned
    pending: Arc<Mutex<HashMap<JobId, watch::Receiver<bool>>>>,
    next_id: AtomicU32,
}

impl TaskQueue {
    pub fn new(debugger: Debugger) -> Self {
        let groups = [ExclusionGroup::EngineAccess, ExclusionGroup::InContextEvaluation]
            .into_iter()
            .map(|group| (group, Arc::new(tokio::sync::Mutex::new(()))))
            .collect();
        Self {
            debugger,
            groups,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU32::new(1),
        }
    }

    pub fn debugger(&self) -> &Debugger {
        &self.debugger
    }

    pub fn submit(&self, job: DebuggerJob) -> DebugResult<JobHandle> {
        let options = JobOptions::for_job(&job);
        self.submit_with(job, options)
    }

    /// Schedule `job`; must be called from within a tokio runtime
    pub fn submit_with(&self, job: DebuggerJob, options: JobOptions) -> DebugResult<JobHandle> {
        let dependency = match options.depends_on {
            Some(dep) => self.dependency(dep)?,
            None => None,
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (done_tx, done_rx) = watch::channel(false);
        self.pending.lock().insert(id, done_rx);
        let pending = self.pending.clone();
        let (reply, rx) = oneshot::channel();
        let group = options.group.and_then(|g| self.groups.get(&g).cloned());
        let debugger = self.debugger.clone();
        debug!("Job {} ({}) submitted with {:?}", id, job.kind(), options);

        tokio::spawn(async move {
            if let Some(mut dependency) = dependency {
                if dependency.wait_for(|done| *done).await.is_err() {
                    warn!("Job {} dependency vanished, running anyway", id);
                }
            }
            let _permit = match group {
                Some(lock) => Some(lock.lock_owned().await),
                None => None,
            };
            let result = run_job(&debugger, job).await;
            debug!("Job {} finished (ok: {})", id, result.is_ok());
            let _ = done_tx.send(true);
            pending.lock().remove(&id);
            let _ = reply.send(result);
        });

        Ok(JobHandle { id, rx })
    }

    /// Completion flag to wait on, None when `dep` already finished
    fn dependency(&self, dep: JobId) -> DebugResult<Option<watch::Receiver<bool>>> {
        if let Some(done) = self.pending.lock().get(&dep) {
            return Ok(Some(done.clone()));
        }
        if dep == 0 || dep >= self.next_id.load(Ordering::SeqCst) {
            return Err(DebuggerError::InvalidCommand(format!("Unknown job {}", dep)));
        }
        Ok(None)
    }

    /// Jobs submitted but not finished yet
    pub fn pending_jobs(&self) -> usize {
        self.pending.lock().len()
    }
}

async fn run_job(debugger: &Debugger, job: DebuggerJob) -> DebugResult<JobResult> {
    match job {
        DebuggerJob::LoadScript {
            file,
            code,
            interrupt_at_start,
        } => Ok(JobResult::Script(
            debugger.load_script(&file, &code, interrupt_at_start).await?,
        )),
        DebuggerJob::CallFunction { name, args } => Ok(JobResult::Script(debugger.call_function(&name, args).await?)),
        DebuggerJob::EvaluateInContext(request) => {
            Ok(JobResult::Evaluation(debugger.evaluate_in_context(request).await?))
        }
        DebuggerJob::ExecuteConsoleCommand { line } => {
            let reply = debugger.execute_console_command(&line).await?;
            Ok(JobResult::Console(reply.text().await?))
        }
        DebuggerJob::CheckSyntax { code } => Ok(JobResult::Syntax(debugger.check_syntax(&code).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DebuggerConfig;
    use crate::tiny::TinyScriptEngine;

    fn queue() -> TaskQueue {
        let debugger = Debugger::new(TinyScriptEngine::factory(), DebuggerConfig::default()).unwrap();
        TaskQueue::new(debugger)
    }

    #[test]
    fn test_default_groups() {
        let load = DebuggerJob::LoadScript {
            file: "a.js".into(),
            code: String::new(),
            interrupt_at_start: false,
        };
        assert_eq!(load.default_group(), Some(ExclusionGroup::EngineAccess));
        let eval = DebuggerJob::EvaluateInContext(EvaluationRequest::new("1", "console"));
        assert_eq!(eval.default_group(), Some(ExclusionGroup::InContextEvaluation));
        let line = DebuggerJob::ExecuteConsoleCommand { line: ".help".into() };
        assert_eq!(line.default_group(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dependent_job_sees_earlier_definitions() {
        let queue = queue();
        let define = queue
            .submit(DebuggerJob::LoadScript {
                file: "lib.js".into(),
                code: "function twice(n) { return n * 2; }".into(),
                interrupt_at_start: false,
            })
            .unwrap();
        let call = queue
            .submit_with(
                DebuggerJob::CallFunction {
                    name: "twice".into(),
                    args: vec![EngineValue::Number(21.0)],
                },
                JobOptions::default().after(define.id),
            )
            .unwrap();

        match call.wait().await.unwrap() {
            JobResult::Script(outcome) => assert_eq!(outcome.stats.result.as_deref(), Some("42")),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(define.wait().await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_finished_jobs_are_pruned() {
        let queue = queue();
        let first = queue.submit(DebuggerJob::CheckSyntax { code: "1 +".into() }).unwrap();
        let first_id = first.id;
        assert!(matches!(first.wait().await.unwrap(), JobResult::Syntax(_)));
        assert_eq!(queue.pending_jobs(), 0);

        // depending on a job that already finished runs right away
        let second = queue
            .submit_with(
                DebuggerJob::CheckSyntax { code: "1".into() },
                JobOptions::default().after(first_id),
            )
            .unwrap();
        assert!(second.wait().await.is_ok());
        assert_eq!(queue.pending_jobs(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_dependency_is_rejected() {
        let queue = queue();
        let result = queue.submit_with(
            DebuggerJob::CheckSyntax { code: "1".into() },
            JobOptions::default().after(999),
        );
        assert!(matches!(result, Err(DebuggerError::InvalidCommand(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_console_job_returns_text() {
        let queue = queue();
        let handle = queue
            .submit(DebuggerJob::ExecuteConsoleCommand { line: ".line".into() })
            .unwrap();
        assert_eq!(handle.wait().await.unwrap(), JobResult::Console("-1".into()));
    }
}
