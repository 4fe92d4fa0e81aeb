// Debugger notifications
//
// Notifications are produced on the worker thread (and by controller-side
// breakpoint edits) while the state lock is held, so their order on the
// channel matches the order in which they happened.

use crate::backtrace::BacktraceChange;
use crate::breakpoints::{Breakpoint, BreakpointChange};
use crate::types::{ExecutionStats, InterruptReason, LifecycleState};
use crate::variables::{VariableDiff, VariableRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DebuggerEvent {
    Started {
        file: String,
    },
    Stopped {
        stats: ExecutionStats,
    },
    Interrupted {
        reason: InterruptReason,
        file: String,
        line: u32,
        column: u32,
    },
    Continued {
        will_pause_again: bool,
    },
    Aborted,
    PositionChanged {
        line: u32,
        column: u32,
        old_line: Option<u32>,
        old_column: Option<u32>,
    },
    StateChanged {
        old: LifecycleState,
        new: LifecycleState,
    },
    BreakpointAdded {
        breakpoint: Breakpoint,
    },
    BreakpointRemoved {
        breakpoint: Breakpoint,
    },
    BreakpointModified {
        breakpoint: Breakpoint,
    },
    BreakpointReached {
        breakpoint: Breakpoint,
    },
    BreakpointConditionError {
        breakpoint: Breakpoint,
        message: String,
    },
    VariablesChanged {
        variables: Vec<VariableRecord>,
        diff: VariableDiff,
    },
    BacktraceChanged {
        change: BacktraceChange,
    },
    Exception {
        line: Option<u32>,
        message: String,
    },
}

impl From<BreakpointChange> for DebuggerEvent {
    fn from(change: BreakpointChange) -> Self {
        match change {
            BreakpointChange::Added(breakpoint) => DebuggerEvent::BreakpointAdded { breakpoint },
            BreakpointChange::Removed(breakpoint) => DebuggerEvent::BreakpointRemoved { breakpoint },
            BreakpointChange::Modified(breakpoint) => DebuggerEvent::BreakpointModified { breakpoint },
        }
    }
}

impl From<BacktraceChange> for DebuggerEvent {
    fn from(change: BacktraceChange) -> Self {
        DebuggerEvent::BacktraceChanged { change }
    }
}

/// Producer side, cloned into the shared debugger state
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<DebuggerEvent>,
}

impl EventSender {
    /// Queue an event; dropped silently once nobody listens
    pub fn send(&self, event: DebuggerEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event receiver dropped, discarding event");
        }
    }
}

/// Consumer side of the notification stream
#[derive(Debug, Clone)]
pub struct EventStream {
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<DebuggerEvent>>>,
}

impl EventStream {
    /// Try to receive an event (non-blocking)
    pub async fn try_recv(&self) -> Option<DebuggerEvent> {
        let mut rx = self.rx.lock().await;
        rx.try_recv().ok()
    }

    /// Wait for the next event
    pub async fn recv(&self) -> Option<DebuggerEvent> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    /// Take everything queued right now
    pub async fn drain(&self) -> Vec<DebuggerEvent> {
        let mut rx = self.rx.lock().await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn event_channel() -> (EventSender, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSender { tx },
        EventStream {
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (tx, stream) = event_channel();
        tx.send(DebuggerEvent::Aborted);
        tx.send(DebuggerEvent::Continued {
            will_pause_again: true,
        });
        assert_eq!(stream.recv().await, Some(DebuggerEvent::Aborted));
        assert_eq!(
            stream.try_recv().await,
            Some(DebuggerEvent::Continued {
                will_pause_again: true
            })
        );
        assert_eq!(stream.try_recv().await, None);
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = DebuggerEvent::StateChanged {
            old: LifecycleState::Running,
            new: LifecycleState::Interrupted,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StateChanged");
        assert_eq!(json["new"], "Interrupted");
    }

    #[test]
    fn test_breakpoint_change_conversion() {
        let bp = Breakpoint::new("a.js", 2);
        let event: DebuggerEvent = BreakpointChange::Removed(bp.clone()).into();
        assert_eq!(event, DebuggerEvent::BreakpointRemoved { breakpoint: bp });
    }

    #[test]
    fn test_send_without_receiver_is_silent() {
        let (tx, stream) = event_channel();
        drop(stream);
        tx.send(DebuggerEvent::Aborted);
    }
}
