// Shared helpers for the end-to-end debugger tests

#![allow(dead_code)]

use script_debugger::{
    DebugResult, Debugger, DebuggerConfig, DebuggerEvent, InterruptReason, ScriptOutcome, TinyScriptEngine,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const FILE: &str = "main.js";
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Harness {
    pub debugger: Debugger,
    /// Everything the script printed
    pub output: Arc<Mutex<Vec<String>>>,
}

pub fn harness() -> Harness {
    harness_with(DebuggerConfig::default())
}

pub fn harness_with(config: DebuggerConfig) -> Harness {
    // RUST_LOG=script_debugger=debug shows the worker's transitions
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let output = Arc::new(Mutex::new(Vec::new()));
    let sink = output.clone();
    let factory = Box::new(move || {
        let engine = TinyScriptEngine::with_output(move |line| sink.lock().unwrap().push(line.to_string()));
        Box::new(engine) as Box<dyn script_debugger::ScriptEngine>
    });
    let debugger = Debugger::new(factory, config).unwrap();
    Harness { debugger, output }
}

impl Harness {
    /// Start `code` without waiting for it to finish
    pub fn start(&self, code: &str, interrupt_at_start: bool) -> JoinHandle<DebugResult<ScriptOutcome>> {
        let debugger = self.debugger.clone();
        let code = code.to_string();
        tokio::spawn(async move { debugger.load_script(FILE, &code, interrupt_at_start).await })
    }

    pub async fn next_event(&self) -> DebuggerEvent {
        tokio::time::timeout(EVENT_TIMEOUT, self.debugger.recv_event())
            .await
            .expect("timed out waiting for an event")
            .expect("event stream closed")
    }

    /// Skip events until the next pause
    pub async fn next_interrupt(&self) -> (InterruptReason, u32) {
        loop {
            if let DebuggerEvent::Interrupted { reason, line, .. } = self.next_event().await {
                return (reason, line);
            }
        }
    }

    /// Skip events until the script stops, failing on any pause on the way
    pub async fn run_to_end(&self) -> DebuggerEvent {
        loop {
            match self.next_event().await {
                event @ DebuggerEvent::Stopped { .. } => return event,
                DebuggerEvent::Interrupted { reason, line, .. } => {
                    panic!("unexpected pause ({:?}) at line {}", reason, line)
                }
                _ => {}
            }
        }
    }

    /// Collect events up to and including the next one matching `pred`
    pub async fn events_until(&self, pred: impl Fn(&DebuggerEvent) -> bool) -> Vec<DebuggerEvent> {
        let mut events = Vec::new();
        loop {
            let event = self.next_event().await;
            let done = pred(&event);
            events.push(event);
            if done {
                return events;
            }
        }
    }

    pub fn printed(&self) -> Vec<String> {
        self.output.lock().unwrap().clone()
    }
}
