// Call stack tracker
//
// Mirrors the engine's dynamic call nesting. Frames are addressed by their
// index from the bottom of the stack; every mutation returns the change that
// observers need to replay it.

use crate::types::ScriptId;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub name: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub script_id: ScriptId,
    /// Position changed since the last published update
    #[serde(skip)]
    dirty: bool,
}

impl Frame {
    pub fn new(name: &str, file: &str, script_id: ScriptId) -> Self {
        Self {
            name: name.to_string(),
            file: file.to_string(),
            line: 0,
            column: 0,
            script_id,
            dirty: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum BacktraceChange {
    Push { index: usize, frame: Frame },
    Pop { index: usize },
    Update { index: usize, line: u32, column: u32 },
}

#[derive(Debug, Default, Clone)]
pub struct CallStack {
    frames: Vec<Frame>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Frames from the bottom (outermost) to the top
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn push(&mut self, frame: Frame) -> BacktraceChange {
        let index = self.frames.len();
        self.frames.push(frame.clone());
        BacktraceChange::Push { index, frame }
    }

    pub fn pop(&mut self) -> Option<BacktraceChange> {
        match self.frames.pop() {
            Some(_) => Some(BacktraceChange::Pop {
                index: self.frames.len(),
            }),
            None => {
                warn!("Call stack pop on an empty stack");
                None
            }
        }
    }

    /// Refresh the innermost frame's position without publishing it
    pub fn update_top(&mut self, line: u32, column: u32) {
        match self.frames.last_mut() {
            Some(frame) => {
                if frame.line != line || frame.column != column {
                    frame.line = line;
                    frame.column = column;
                    frame.dirty = true;
                }
            }
            None => warn!("Backtrace update on an empty stack"),
        }
    }

    /// Changes for every frame whose position moved since the last call
    pub fn take_updates(&mut self) -> Vec<BacktraceChange> {
        self.frames
            .iter_mut()
            .enumerate()
            .filter(|(_, frame)| frame.dirty)
            .map(|(index, frame)| {
                frame.dirty = false;
                BacktraceChange::Update {
                    index,
                    line: frame.line,
                    column: frame.column,
                }
            })
            .collect()
    }

    /// Pop frames until only `depth` remain
    pub fn truncate(&mut self, depth: usize) -> Vec<BacktraceChange> {
        let mut changes = Vec::new();
        while self.frames.len() > depth {
            if let Some(change) = self.pop() {
                changes.push(change);
            }
        }
        changes
    }

    pub fn clear(&mut self) -> Vec<BacktraceChange> {
        self.truncate(0)
    }
}
