// Observer-side debugger model
//
// Folds the notification stream into the state a UI shows: lifecycle,
// position, backtrace, variables and breakpoints. Frames live in an arena
// addressed by index, exactly as the backtrace changes describe them.

use crate::backtrace::{BacktraceChange, Frame};
use crate::breakpoints::Breakpoint;
use crate::events::DebuggerEvent;
use crate::types::{ExecutionStats, InterruptReason, LifecycleState, Position};
use crate::variables::VariableRecord;
use std::collections::{BTreeMap, VecDeque};
use tracing::warn;

/// Oldest condition errors are dropped past this many
pub const MAX_CONDITION_ERRORS: usize = 100;

#[derive(Debug, Clone)]
pub struct DebuggerModel {
    pub lifecycle: LifecycleState,
    pub file: Option<String>,
    pub position: Option<Position>,
    pub frames: Vec<Frame>,
    pub variables: Vec<VariableRecord>,
    pub breakpoints: BTreeMap<(String, u32), Breakpoint>,
    pub last_interrupt: Option<InterruptReason>,
    pub last_exception: Option<String>,
    pub last_stats: Option<ExecutionStats>,
    /// Condition errors not yet shown to the user, newest last
    pub condition_errors: VecDeque<String>,
}

impl Default for DebuggerModel {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleState::NotRunning,
            file: None,
            position: None,
            frames: Vec::new(),
            variables: Vec::new(),
            breakpoints: BTreeMap::new(),
            last_interrupt: None,
            last_exception: None,
            last_stats: None,
            condition_errors: VecDeque::new(),
        }
    }
}

impl DebuggerModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &DebuggerEvent) {
        match event {
            DebuggerEvent::Started { file } => {
                self.file = Some(file.clone());
                self.position = None;
                self.last_exception = None;
                self.last_interrupt = None;
            }
            DebuggerEvent::Stopped { stats } => {
                self.last_stats = Some(stats.clone());
                self.position = None;
                self.frames.clear();
                self.variables.clear();
            }
            DebuggerEvent::Interrupted { reason, file, line, column } => {
                self.last_interrupt = Some(*reason);
                self.file = Some(file.clone());
                self.position = Some(Position {
                    line: *line,
                    column: *column,
                });
            }
            DebuggerEvent::Continued { .. } | DebuggerEvent::Aborted => {}
            DebuggerEvent::PositionChanged { line, column, .. } => {
                self.position = Some(Position {
                    line: *line,
                    column: *column,
                });
            }
            DebuggerEvent::StateChanged { new, .. } => self.lifecycle = *new,
            DebuggerEvent::BreakpointAdded { breakpoint }
            | DebuggerEvent::BreakpointModified { breakpoint }
            | DebuggerEvent::BreakpointReached { breakpoint } => {
                self.breakpoints
                    .insert((breakpoint.file.clone(), breakpoint.line), breakpoint.clone());
            }
            DebuggerEvent::BreakpointRemoved { breakpoint } => {
                self.breakpoints.remove(&(breakpoint.file.clone(), breakpoint.line));
            }
            DebuggerEvent::BreakpointConditionError { breakpoint, message } => {
                if self.condition_errors.len() >= MAX_CONDITION_ERRORS {
                    self.condition_errors.pop_front();
                }
                self.condition_errors
                    .push_back(format!("{}:{}: {}", breakpoint.file, breakpoint.line, message));
                self.breakpoints
                    .insert((breakpoint.file.clone(), breakpoint.line), breakpoint.clone());
            }
            DebuggerEvent::VariablesChanged { variables, .. } => self.variables = variables.clone(),
            DebuggerEvent::BacktraceChanged { change } => self.apply_backtrace(change),
            DebuggerEvent::Exception { message, .. } => self.last_exception = Some(message.clone()),
        }
    }

    fn apply_backtrace(&mut self, change: &BacktraceChange) {
        match change {
            BacktraceChange::Push { index, frame } => {
                if *index != self.frames.len() {
                    warn!("Frame push at {} but model holds {} frames", index, self.frames.len());
                    self.frames.truncate(*index);
                }
                self.frames.push(frame.clone());
            }
            BacktraceChange::Pop { index } => {
                if *index + 1 != self.frames.len() {
                    warn!("Frame pop at {} but model holds {} frames", index, self.frames.len());
                }
                self.frames.truncate(*index);
            }
            BacktraceChange::Update { index, line, column } => match self.frames.get_mut(*index) {
                Some(frame) => {
                    frame.line = *line;
                    frame.column = *column;
                }
                None => warn!("Frame update for missing index {}", index),
            },
        }
    }

    /// Hand over the unseen condition errors, oldest first
    pub fn take_condition_errors(&mut self) -> Vec<String> {
        self.condition_errors.drain(..).collect()
    }

    pub fn breakpoint(&self, file: &str, line: u32) -> Option<&Breakpoint> {
        self.breakpoints.get(&(file.to_string(), line))
    }

    /// Find a variable by dotted path
    pub fn variable(&self, path: &str) -> Option<&VariableRecord> {
        fn find<'a>(records: &'a [VariableRecord], path: &str) -> Option<&'a VariableRecord> {
            records.iter().find_map(|record| {
                if record.path == path {
                    Some(record)
                } else if path.starts_with(&format!("{}.", record.path)) {
                    find(&record.children, path)
                } else {
                    None
                }
            })
        }
        find(&self.variables, path)
    }

    /// Backtrace text, innermost frame first
    pub fn render_backtrace(&self) -> String {
        self.frames
            .iter()
            .rev()
            .enumerate()
            .map(|(i, frame)| format!("#{} {} at {}:{}", i, frame.name, frame.file, frame.line))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScriptId;

    fn frame(name: &str) -> Frame {
        Frame::new(name, "main.js", ScriptId(1))
    }

    #[test]
    fn test_backtrace_replay() {
        let mut model = DebuggerModel::new();
        model.apply(&BacktraceChange::Push { index: 0, frame: frame("<global>") }.into());
        model.apply(&BacktraceChange::Push { index: 1, frame: frame("f") }.into());
        model.apply(
            &BacktraceChange::Update {
                index: 1,
                line: 7,
                column: 3,
            }
            .into(),
        );
        assert_eq!(model.frames[1].line, 7);
        assert_eq!(model.render_backtrace().lines().next(), Some("#0 f at main.js:7"));

        model.apply(&BacktraceChange::Pop { index: 1 }.into());
        assert_eq!(model.frames.len(), 1);
    }

    #[test]
    fn test_lifecycle_and_stop() {
        let mut model = DebuggerModel::new();
        model.apply(&DebuggerEvent::StateChanged {
            old: LifecycleState::NotRunning,
            new: LifecycleState::Running,
        });
        assert_eq!(model.lifecycle, LifecycleState::Running);
        model.apply(&DebuggerEvent::Stopped {
            stats: ExecutionStats::default(),
        });
        assert!(model.last_stats.is_some());
        assert!(model.position.is_none());
    }

    #[test]
    fn test_breakpoint_table() {
        let mut model = DebuggerModel::new();
        let bp = Breakpoint::new("main.js", 3);
        model.apply(&DebuggerEvent::BreakpointAdded { breakpoint: bp.clone() });
        assert!(model.breakpoint("main.js", 3).is_some());
        model.apply(&DebuggerEvent::BreakpointConditionError {
            breakpoint: bp.clone(),
            message: "ReferenceError".into(),
        });
        assert_eq!(model.condition_errors.len(), 1);
        model.apply(&DebuggerEvent::BreakpointRemoved { breakpoint: bp });
        assert!(model.breakpoints.is_empty());
    }

    #[test]
    fn test_condition_errors_are_capped_and_drained() {
        let mut model = DebuggerModel::new();
        let bp = Breakpoint::new("main.js", 3);
        for i in 0..MAX_CONDITION_ERRORS + 5 {
            model.apply(&DebuggerEvent::BreakpointConditionError {
                breakpoint: bp.clone(),
                message: format!("error {}", i),
            });
        }
        assert_eq!(model.condition_errors.len(), MAX_CONDITION_ERRORS);

        let errors = model.take_condition_errors();
        assert_eq!(errors.first().map(String::as_str), Some("main.js:3: error 5"));
        assert_eq!(errors.len(), MAX_CONDITION_ERRORS);
        assert!(model.condition_errors.is_empty());
    }

    #[test]
    fn test_variable_lookup_by_path() {
        use crate::engine::{EngineValue, ScopeSnapshot};
        use crate::variables::{build_records, SnapshotOptions};

        let chain = vec![ScopeSnapshot {
            name: "<global>".into(),
            is_global: true,
            variables: vec![(
                "o".into(),
                EngineValue::Object(vec![("n".into(), EngineValue::Number(4.0))]),
            )],
        }];
        let options = SnapshotOptions {
            short_value_length: 50,
            helper_object_names: vec![],
            max_children: 10,
        };
        let mut model = DebuggerModel::new();
        model.apply(&DebuggerEvent::VariablesChanged {
            variables: build_records(&chain, &options),
            diff: Default::default(),
        });
        assert_eq!(model.variable("o.n").map(|v| v.full_value.as_str()), Some("4"));
        assert!(model.variable("o.m").is_none());
    }
}
