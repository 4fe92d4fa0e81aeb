// tinyscript engine binding
//
// Adapts the tinyscript interpreter to the ScriptEngine interface.

use crate::engine::{
    Completion, ContextInfo, EngineFactory, EngineHooks, EngineValue, HookAction, ScopeSnapshot,
    ScriptContext, ScriptEngine, ScriptException, SyntaxCheck, ValueLimits,
};
use crate::types::{Position, ScriptId};
use tinyscript::{FrameInfo, Interpreter, ScopeKind, ScriptError, Value};

pub struct TinyScriptEngine {
    interp: Interpreter,
}

impl Default for TinyScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TinyScriptEngine {
    pub fn new() -> Self {
        Self {
            interp: Interpreter::new(),
        }
    }

    /// Engine whose `print` output goes to `output` instead of stdout
    pub fn with_output(output: impl FnMut(&str) + 'static) -> Self {
        let mut interp = Interpreter::new();
        interp.set_output(Box::new(output));
        Self { interp }
    }

    /// Factory for `Debugger::new` creating a stdout-printing engine
    pub fn factory() -> EngineFactory {
        Box::new(|| Box::new(TinyScriptEngine::new()) as Box<dyn ScriptEngine>)
    }
}

impl ScriptEngine for TinyScriptEngine {
    fn evaluate(&mut self, code: &str, file: &str, hooks: &mut dyn EngineHooks) -> Completion {
        let mut bridge = HookBridge { hooks };
        completion(self.interp.eval(code, file, &mut bridge))
    }

    fn call_function(&mut self, name: &str, args: Vec<EngineValue>, hooks: &mut dyn EngineHooks) -> Completion {
        let args = args.into_iter().map(to_script_value).collect();
        let mut bridge = HookBridge { hooks };
        completion(self.interp.call_function(name, args, &mut bridge))
    }

    fn check_syntax(&self, code: &str) -> SyntaxCheck {
        match self.interp.check_syntax(code) {
            Ok(()) => SyntaxCheck::Valid,
            Err(e) => SyntaxCheck::Invalid {
                line: e.line,
                column: e.column,
                message: e.message,
            },
        }
    }

    fn current_context_info(&self) -> Option<ContextInfo> {
        self.interp.current_frame().map(context_info)
    }
}

struct TinyContext<'a> {
    interp: &'a mut Interpreter,
}

impl ScriptContext for TinyContext<'_> {
    fn evaluate_nested(
        &mut self,
        code: &str,
        label: &str,
        keep_declarations: bool,
        hooks: &mut dyn EngineHooks,
    ) -> Completion {
        let mut bridge = HookBridge { hooks };
        completion(self.interp.eval_nested(code, label, keep_declarations, &mut bridge))
    }

    fn scope_chain(&self, limits: ValueLimits) -> Vec<ScopeSnapshot> {
        self.interp
            .scope_chain()
            .into_iter()
            .map(|view| {
                let name = match &view.kind {
                    ScopeKind::Global => "<global>".to_string(),
                    ScopeKind::Function(name) => name.clone(),
                    ScopeKind::Catch => "<catch>".to_string(),
                    ScopeKind::Nested(label) => label.clone(),
                };
                ScopeSnapshot {
                    name,
                    is_global: view.kind == ScopeKind::Global,
                    variables: view
                        .bindings
                        .iter()
                        .map(|(name, value)| (name.clone(), to_engine_value(value, limits, 0)))
                        .collect(),
                }
            })
            .collect()
    }

    fn backtrace(&self) -> Vec<ContextInfo> {
        self.interp.backtrace().iter().map(context_info).collect()
    }

    fn current_context_info(&self) -> Option<ContextInfo> {
        self.interp.current_frame().map(context_info)
    }
}

/// Forwards interpreter callbacks to debugger hooks
struct HookBridge<'a> {
    hooks: &'a mut dyn EngineHooks,
}

impl tinyscript::Hooks for HookBridge<'_> {
    fn on_statement(&mut self, interp: &mut Interpreter, script_id: u64, pos: tinyscript::Pos) -> tinyscript::HookAction {
        let file = interp
            .current_frame()
            .map(|f| f.file_name.clone())
            .unwrap_or_default();
        let mut ctx = TinyContext { interp };
        let position = Position {
            line: pos.line,
            column: pos.column,
        };
        convert_action(self.hooks.on_statement(&mut ctx, ScriptId(script_id), &file, position))
    }

    fn on_function_entry(&mut self, interp: &mut Interpreter, script_id: u64, name: &str) {
        let mut ctx = TinyContext { interp };
        self.hooks.on_function_entry(&mut ctx, ScriptId(script_id), name);
    }

    fn on_function_exit(&mut self, interp: &mut Interpreter, script_id: u64, value: &Value) {
        let value = to_engine_value(value, ValueLimits { max_depth: 1, max_children: 16 }, 0);
        let mut ctx = TinyContext { interp };
        self.hooks.on_function_exit(&mut ctx, ScriptId(script_id), &value);
    }

    fn on_exception(
        &mut self,
        interp: &mut Interpreter,
        script_id: u64,
        exception: &Value,
        line: u32,
        has_handler: bool,
    ) -> tinyscript::HookAction {
        let exception = ScriptException {
            message: exception.to_display_string(),
            line: Some(line),
            backtrace: interp.backtrace().iter().map(describe_frame).collect(),
        };
        let mut ctx = TinyContext { interp };
        convert_action(
            self.hooks
                .on_exception(&mut ctx, ScriptId(script_id), &exception, has_handler),
        )
    }
}

fn convert_action(action: HookAction) -> tinyscript::HookAction {
    match action {
        HookAction::Continue => tinyscript::HookAction::Continue,
        HookAction::Abort => tinyscript::HookAction::Abort,
    }
}

fn context_info(frame: &FrameInfo) -> ContextInfo {
    ContextInfo {
        function_name: frame.function_name.clone(),
        file_name: frame.file_name.clone(),
        line: frame.line,
        column: frame.column,
    }
}

fn describe_frame(frame: &FrameInfo) -> String {
    format!("{}() at {}:{}", frame.function_name, frame.file_name, frame.line)
}

fn completion(result: Result<Value, ScriptError>) -> Completion {
    let limits = ValueLimits {
        max_depth: 4,
        max_children: 100,
    };
    match result {
        Ok(value) => Completion::Value(to_engine_value(&value, limits, 0)),
        Err(ScriptError::Syntax(e)) => Completion::Exception(ScriptException {
            message: e.to_string(),
            line: Some(e.line),
            backtrace: Vec::new(),
        }),
        Err(ScriptError::Thrown {
            message,
            line,
            backtrace,
            ..
        }) => Completion::Exception(ScriptException {
            message,
            line: Some(line),
            backtrace,
        }),
        Err(ScriptError::Aborted) => Completion::Aborted,
    }
}

fn to_engine_value(value: &Value, limits: ValueLimits, depth: usize) -> EngineValue {
    match value {
        Value::Undefined => EngineValue::Undefined,
        Value::Null => EngineValue::Null,
        Value::Bool(b) => EngineValue::Boolean(*b),
        Value::Number(n) => EngineValue::Number(*n),
        Value::Str(s) => EngineValue::String(s.to_string()),
        Value::Array(items) => {
            if depth >= limits.max_depth {
                return EngineValue::Array(Vec::new());
            }
            EngineValue::Array(
                items
                    .borrow()
                    .iter()
                    .take(limits.max_children)
                    .map(|item| to_engine_value(item, limits, depth + 1))
                    .collect(),
            )
        }
        Value::Object(entries) => {
            if depth >= limits.max_depth {
                return EngineValue::Object(Vec::new());
            }
            EngineValue::Object(
                entries
                    .borrow()
                    .iter()
                    .take(limits.max_children)
                    .map(|(key, value)| (key.clone(), to_engine_value(value, limits, depth + 1)))
                    .collect(),
            )
        }
        Value::Function(closure) => EngineValue::Function(closure.name().to_string()),
        Value::Native(native) => EngineValue::Function(native.name.to_string()),
        Value::Error(err) => EngineValue::Error {
            name: err.name.clone(),
            message: err.message.clone(),
        },
    }
}

fn to_script_value(value: EngineValue) -> Value {
    match value {
        EngineValue::Undefined => Value::Undefined,
        EngineValue::Null => Value::Null,
        EngineValue::Boolean(b) => Value::Bool(b),
        EngineValue::Number(n) => Value::Number(n),
        EngineValue::String(s) | EngineValue::RegExp(s) | EngineValue::Date(s) => Value::str(s),
        EngineValue::Array(items) => Value::array(items.into_iter().map(to_script_value).collect()),
        EngineValue::Object(entries) => Value::object(
            entries
                .into_iter()
                .map(|(key, value)| (key, to_script_value(value)))
                .collect(),
        ),
        EngineValue::Function(name) => Value::str(name),
        EngineValue::Error { name, message } => Value::error(&name, message),
    }
}
