// Console session
//
// Owns the debugger, its task queue and the observer model fed by the
// notification stream.

use crate::handlers::format_event;
use script_debugger::{DebugResult, Debugger, DebuggerConfig, DebuggerJob, DebuggerModel, JobResult, TaskQueue, TinyScriptEngine};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct ConsoleSession {
    queue: TaskQueue,
    model: Arc<Mutex<DebuggerModel>>,
}

impl ConsoleSession {
    pub fn new(config: DebuggerConfig) -> DebugResult<Self> {
        let debugger = Debugger::new(TinyScriptEngine::factory(), config)?;
        Ok(Self {
            queue: TaskQueue::new(debugger),
            model: Arc::new(Mutex::new(DebuggerModel::new())),
        })
    }

    pub fn debugger(&self) -> &Debugger {
        self.queue.debugger()
    }

    pub fn model(&self) -> Arc<Mutex<DebuggerModel>> {
        self.model.clone()
    }

    /// Queue the script and report its outcome when it finishes
    pub fn start_script(&self, file: &str, code: &str, stop_on_entry: bool) -> DebugResult<()> {
        let handle = self.queue.submit(DebuggerJob::LoadScript {
            file: file.to_string(),
            code: code.to_string(),
            interrupt_at_start: stop_on_entry,
        })?;
        debug!("Script queued as job {}", handle.id);

        tokio::spawn(async move {
            match handle.wait().await {
                Ok(JobResult::Script(outcome)) => {
                    info!(
                        "Script finished after {} statements ({} ms)",
                        outcome.stats.statements_executed, outcome.stats.duration_ms
                    );
                }
                Ok(other) => warn!("Unexpected script job result: {:?}", other),
                Err(e) => warn!("Script job failed: {}", e),
            }
        });
        Ok(())
    }

    /// Print notifications and keep the model current
    pub fn spawn_event_printer(&self) {
        let events = self.debugger().events();
        let model = self.model.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                model.lock().await.apply(&event);
                if let Some(line) = format_event(&event) {
                    println!("{}", line);
                }
            }
            debug!("Notification stream closed");
        });
    }
}
