// Script engine collaborator interface
//
// The debugger drives any engine that implements ScriptEngine. The engine is
// created on the worker thread and never leaves it; hooks receive a
// ScriptContext for the paused evaluation so they can inspect it or run nested
// code inside it.

use crate::types::{Position, ScriptId};
use serde::{Deserialize, Serialize};

/// Returned by hooks that may stop the evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    Continue,
    /// Unwind the innermost running evaluation
    Abort,
}

/// Engine value rendered for the debugger, depth-limited by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum EngineValue {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    RegExp(String),
    Date(String),
    Array(Vec<EngineValue>),
    Object(Vec<(String, EngineValue)>),
    Function(String),
    Error { name: String, message: String },
}

impl EngineValue {
    /// Full textual rendering used for display and change detection
    pub fn render(&self) -> String {
        match self {
            EngineValue::Undefined => "undefined".to_string(),
            EngineValue::Null => "null".to_string(),
            EngineValue::Boolean(b) => b.to_string(),
            EngineValue::Number(n) => tinyscript::format_number(*n),
            EngineValue::String(s) => format!("\"{}\"", s),
            EngineValue::RegExp(source) => source.clone(),
            EngineValue::Date(text) => text.clone(),
            EngineValue::Array(items) => {
                let parts: Vec<String> = items.iter().map(|item| item.render()).collect();
                format!("[{}]", parts.join(", "))
            }
            EngineValue::Object(entries) => {
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(key, value)| format!("{}: {}", key, value.render()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            EngineValue::Function(name) => format!("function {}()", name),
            EngineValue::Error { name, message } if message.is_empty() => name.clone(),
            EngineValue::Error { name, message } => format!("{}: {}", name, message),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EngineValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

/// Uncaught exception leaving an evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptException {
    pub message: String,
    pub line: Option<u32>,
    pub backtrace: Vec<String>,
}

/// How an evaluation ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum Completion {
    Value(EngineValue),
    Exception(ScriptException),
    Aborted,
}

impl Completion {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Completion::Aborted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result")]
pub enum SyntaxCheck {
    Valid,
    Invalid { line: u32, column: u32, message: String },
}

/// Where the engine currently is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextInfo {
    pub function_name: String,
    pub file_name: String,
    pub line: u32,
    pub column: u32,
}

/// Bindings of one scope, innermost scopes come first in a chain
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeSnapshot {
    pub name: String,
    pub is_global: bool,
    pub variables: Vec<(String, EngineValue)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueLimits {
    pub max_depth: usize,
    pub max_children: usize,
}

/// Live view of a running evaluation, handed to hooks
pub trait ScriptContext {
    /// Evaluate code in a nested scope of the current context
    fn evaluate_nested(
        &mut self,
        code: &str,
        label: &str,
        keep_declarations: bool,
        hooks: &mut dyn EngineHooks,
    ) -> Completion;

    fn scope_chain(&self, limits: ValueLimits) -> Vec<ScopeSnapshot>;

    /// Active frames, innermost first
    fn backtrace(&self) -> Vec<ContextInfo>;

    fn current_context_info(&self) -> Option<ContextInfo>;
}

/// Callbacks the engine invokes while code runs
pub trait EngineHooks {
    fn on_statement(
        &mut self,
        ctx: &mut dyn ScriptContext,
        script_id: ScriptId,
        file: &str,
        position: Position,
    ) -> HookAction;

    fn on_function_entry(&mut self, ctx: &mut dyn ScriptContext, script_id: ScriptId, name: &str);

    fn on_function_exit(&mut self, ctx: &mut dyn ScriptContext, script_id: ScriptId, return_value: &EngineValue);

    fn on_exception(
        &mut self,
        ctx: &mut dyn ScriptContext,
        script_id: ScriptId,
        exception: &ScriptException,
        has_handler: bool,
    ) -> HookAction;
}

pub trait ScriptEngine {
    fn evaluate(&mut self, code: &str, file: &str, hooks: &mut dyn EngineHooks) -> Completion;

    fn call_function(&mut self, name: &str, args: Vec<EngineValue>, hooks: &mut dyn EngineHooks) -> Completion;

    fn check_syntax(&self, code: &str) -> SyntaxCheck;

    fn current_context_info(&self) -> Option<ContextInfo>;
}

/// Builds the engine on the worker thread
pub type EngineFactory = Box<dyn FnOnce() -> Box<dyn ScriptEngine> + Send>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_nested_values() {
        let value = EngineValue::Object(vec![
            ("a".to_string(), EngineValue::Number(1.0)),
            (
                "b".to_string(),
                EngineValue::Array(vec![EngineValue::String("x".into()), EngineValue::Null]),
            ),
        ]);
        assert_eq!(value.render(), r#"{a: 1, b: ["x", null]}"#);
    }

    #[test]
    fn test_render_error() {
        let err = EngineValue::Error {
            name: "TypeError".into(),
            message: "bad".into(),
        };
        assert_eq!(err.render(), "TypeError: bad");
    }

    #[test]
    fn test_as_bool() {
        assert_eq!(EngineValue::Boolean(true).as_bool(), Some(true));
        assert_eq!(EngineValue::Number(1.0).as_bool(), None);
    }
}
