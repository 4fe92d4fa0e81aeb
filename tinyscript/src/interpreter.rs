// Tree-walking interpreter
//
// Every evaluation gets a fresh script id. Hosts observe execution through the
// Hooks trait: a callback before each statement (and each loop iteration), on
// function entry and exit, and whenever a value is thrown. Hooks receive the
// interpreter itself so they can inspect scopes or run nested evaluations.

use crate::ast::*;
use crate::error::{ScriptError, ScriptResult, SyntaxError};
use crate::parser::parse_program;
use crate::scope::{self, Scope, ScopeKind, ScopeRef};
use crate::value::{Builtin, Closure, NativeFunction, Value};
use std::mem;
use std::rc::Rc;
use tracing::trace;

pub type ScriptId = u64;

pub const GLOBAL_FRAME_NAME: &str = "<global>";
const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// Host decision returned from a hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    Continue,
    /// Unwind the innermost running evaluation
    Abort,
}

/// Host callbacks invoked while scripts run
pub trait Hooks {
    fn on_statement(&mut self, _interp: &mut Interpreter, _script_id: ScriptId, _pos: Pos) -> HookAction {
        HookAction::Continue
    }

    fn on_function_entry(&mut self, _interp: &mut Interpreter, _script_id: ScriptId, _name: &str) {}

    fn on_function_exit(&mut self, _interp: &mut Interpreter, _script_id: ScriptId, _value: &Value) {}

    fn on_exception(
        &mut self,
        _interp: &mut Interpreter,
        _script_id: ScriptId,
        _exception: &Value,
        _line: u32,
        _has_handler: bool,
    ) -> HookAction {
        HookAction::Continue
    }
}

/// Hooks that observe nothing
pub struct NoHooks;

impl Hooks for NoHooks {}

/// One entry of the dynamic call stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub function_name: String,
    pub file_name: String,
    pub line: u32,
    pub column: u32,
}

/// Bindings of one scope in the active chain
#[derive(Debug, Clone)]
pub struct ScopeView {
    pub kind: ScopeKind,
    pub bindings: Vec<(String, Value)>,
}

struct EvalRecord {
    script_id: ScriptId,
    file: Rc<str>,
    try_depth: usize,
    frame_base: usize,
    completion: Value,
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Thrown {
    value: Value,
    line: u32,
    backtrace: Vec<String>,
}

enum Unwind {
    Throw(Box<Thrown>),
    Abort,
}

type Exec<T> = Result<T, Unwind>;

pub struct Interpreter {
    global: ScopeRef,
    scope: ScopeRef,
    frames: Vec<FrameInfo>,
    evals: Vec<EvalRecord>,
    next_script_id: ScriptId,
    max_call_depth: usize,
    output: Box<dyn FnMut(&str)>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Creates an interpreter whose `print` writes to stdout
    pub fn new() -> Self {
        let global = Scope::new_global();
        {
            let mut g = global.borrow_mut();
            g.declare("print", Value::native("print", Builtin::Print, None));
            g.declare("Error", Value::native("Error", Builtin::ErrorCtor, None));
            g.declare("String", Value::native("String", Builtin::StringCtor, None));
            g.declare("Number", Value::native("Number", Builtin::NumberCtor, None));
            g.declare(
                "Math",
                Value::object(vec![
                    ("floor".into(), Value::native("floor", Builtin::MathFloor, None)),
                    ("abs".into(), Value::native("abs", Builtin::MathAbs, None)),
                    ("max".into(), Value::native("max", Builtin::MathMax, None)),
                    ("min".into(), Value::native("min", Builtin::MathMin, None)),
                ]),
            );
        }
        Self {
            scope: global.clone(),
            global,
            frames: Vec::new(),
            evals: Vec::new(),
            next_script_id: 1,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            output: Box::new(|line| println!("{}", line)),
        }
    }

    /// Redirects `print` output
    pub fn set_output(&mut self, output: Box<dyn FnMut(&str)>) {
        self.output = output;
    }

    pub fn set_max_call_depth(&mut self, depth: usize) {
        self.max_call_depth = depth;
    }

    /// Declares a global binding visible to every later evaluation
    pub fn define_global(&mut self, name: &str, value: Value) {
        self.global.borrow_mut().declare(name, value);
    }

    pub fn global_names(&self) -> Vec<String> {
        self.global
            .borrow()
            .bindings()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// True while any evaluation is on the stack
    pub fn is_running(&self) -> bool {
        !self.evals.is_empty()
    }

    /// Script id of the innermost running evaluation
    pub fn current_script_id(&self) -> Option<ScriptId> {
        self.evals.last().map(|e| e.script_id)
    }

    /// Script id the next evaluation will receive
    pub fn peek_next_script_id(&self) -> ScriptId {
        self.next_script_id
    }

    pub fn current_frame(&self) -> Option<&FrameInfo> {
        self.frames.last()
    }

    /// Call stack, innermost frame first
    pub fn backtrace(&self) -> Vec<FrameInfo> {
        self.frames.iter().rev().cloned().collect()
    }

    /// Active scope chain, innermost scope first
    pub fn scope_chain(&self) -> Vec<ScopeView> {
        let mut views = Vec::new();
        let mut current = Some(self.scope.clone());
        while let Some(scope) = current {
            let s = scope.borrow();
            views.push(ScopeView {
                kind: s.kind.clone(),
                bindings: s.bindings().to_vec(),
            });
            current = s.parent();
        }
        views
    }

    pub fn check_syntax(&self, code: &str) -> Result<(), SyntaxError> {
        parse_program(code).map(|_| ())
    }

    /// Runs `code` as a program in the global scope
    pub fn eval(&mut self, code: &str, file: &str, hooks: &mut dyn Hooks) -> ScriptResult<Value> {
        let program = parse_program(code)?;
        let global = self.global.clone();
        self.run_program(&program, file, GLOBAL_FRAME_NAME, global, hooks)
    }

    /// Runs `code` in a child of the current scope
    ///
    /// With `keep_declarations`, bindings the code declares at its top level are
    /// copied into the enclosing scope afterwards.
    pub fn eval_nested(
        &mut self,
        code: &str,
        label: &str,
        keep_declarations: bool,
        hooks: &mut dyn Hooks,
    ) -> ScriptResult<Value> {
        let program = parse_program(code)?;
        let parent = self.scope.clone();
        let nested = Scope::new_child(&parent, ScopeKind::Nested(label.to_string()));
        let result = self.run_program(&program, label, label, nested.clone(), hooks);
        if keep_declarations {
            for (name, value) in nested.borrow().bindings() {
                parent.borrow_mut().declare(name, value.clone());
            }
        }
        result
    }

    /// Calls a global function by name
    pub fn call_function(&mut self, name: &str, args: Vec<Value>, hooks: &mut dyn Hooks) -> ScriptResult<Value> {
        let callee = scope::lookup(&self.global, name).ok_or_else(|| ScriptError::Thrown {
            value: Value::error("ReferenceError", format!("{} is not defined", name)),
            message: format!("ReferenceError: {} is not defined", name),
            line: 0,
            backtrace: Vec::new(),
        })?;
        let file: Rc<str> = match &callee {
            Value::Function(closure) => closure.file.clone(),
            _ => Rc::from("<native>"),
        };
        let script_id = self.allocate_script_id();
        self.evals.push(EvalRecord {
            script_id,
            file,
            try_depth: 0,
            frame_base: self.frames.len(),
            completion: Value::Undefined,
        });
        let saved_scope = mem::replace(&mut self.scope, self.global.clone());
        let result = self.call_value(callee, args, name, Pos { line: 0, column: 0 }, hooks);
        self.scope = saved_scope;
        self.evals.pop();
        finish(result)
    }

    fn allocate_script_id(&mut self) -> ScriptId {
        let id = self.next_script_id;
        self.next_script_id += 1;
        id
    }

    fn run_program(
        &mut self,
        program: &[Stmt],
        file: &str,
        frame_name: &str,
        scope: ScopeRef,
        hooks: &mut dyn Hooks,
    ) -> ScriptResult<Value> {
        let script_id = self.allocate_script_id();
        trace!("Starting evaluation {} of {}", script_id, file);
        let file: Rc<str> = Rc::from(file);
        let saved_scope = mem::replace(&mut self.scope, scope);
        self.evals.push(EvalRecord {
            script_id,
            file: file.clone(),
            try_depth: 0,
            frame_base: self.frames.len(),
            completion: Value::Undefined,
        });
        let first = program.first().map(|s| s.pos).unwrap_or(Pos { line: 1, column: 1 });
        self.frames.push(FrameInfo {
            function_name: frame_name.to_string(),
            file_name: file.to_string(),
            line: first.line,
            column: first.column,
        });
        hooks.on_function_entry(self, script_id, frame_name);

        self.hoist(program);
        let result = self.exec_block(program, hooks);
        let completion = match (&result, self.evals.last_mut()) {
            (Ok(Flow::Return(value)), _) => value.clone(),
            (Ok(_), Some(record)) => mem::replace(&mut record.completion, Value::Undefined),
            _ => Value::Undefined,
        };

        hooks.on_function_exit(self, script_id, &completion);
        self.frames.pop();
        self.evals.pop();
        self.scope = saved_scope;
        trace!("Finished evaluation {}", script_id);
        finish(result.map(|_| completion))
    }

    fn hoist(&mut self, body: &[Stmt]) {
        for stmt in body {
            if let StmtKind::Function(decl) = &stmt.kind {
                let closure = self.make_closure(decl.clone());
                if let Some(name) = &decl.name {
                    self.scope.borrow_mut().declare(name, closure);
                }
            }
        }
    }

    fn make_closure(&self, decl: Rc<FunctionDecl>) -> Value {
        let file = self
            .evals
            .last()
            .map(|e| e.file.clone())
            .unwrap_or_else(|| Rc::from(""));
        Value::Function(Rc::new(Closure {
            decl,
            env: self.scope.clone(),
            file,
        }))
    }

    fn exec_block(&mut self, body: &[Stmt], hooks: &mut dyn Hooks) -> Exec<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt, hooks)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn statement_boundary(&mut self, pos: Pos, hooks: &mut dyn Hooks) -> Exec<()> {
        if let Some(frame) = self.frames.last_mut() {
            frame.line = pos.line;
            frame.column = pos.column;
        }
        let Some(script_id) = self.current_script_id() else {
            return Ok(());
        };
        match hooks.on_statement(self, script_id, pos) {
            HookAction::Continue => Ok(()),
            HookAction::Abort => Err(Unwind::Abort),
        }
    }

    fn exec_stmt(&mut self, stmt: &Stmt, hooks: &mut dyn Hooks) -> Exec<Flow> {
        match &stmt.kind {
            StmtKind::Block(body) => return self.exec_block(body, hooks),
            StmtKind::Empty => return Ok(Flow::Normal),
            StmtKind::Function(decl) => {
                let closure = self.make_closure(decl.clone());
                if let Some(name) = &decl.name {
                    self.scope.borrow_mut().declare(name, closure);
                }
                return Ok(Flow::Normal);
            }
            _ => {}
        }
        self.statement_boundary(stmt.pos, hooks)?;
        self.exec_kind(stmt, hooks)
    }

    fn exec_kind(&mut self, stmt: &Stmt, hooks: &mut dyn Hooks) -> Exec<Flow> {
        match &stmt.kind {
            StmtKind::Var(declarations) => {
                for (name, init) in declarations {
                    match init {
                        Some(expr) => {
                            let value = self.eval_expr(expr, hooks)?;
                            self.scope.borrow_mut().declare(name, value);
                        }
                        None => {
                            let exists = self.scope.borrow().has_own(name);
                            if !exists {
                                self.scope.borrow_mut().declare(name, Value::Undefined);
                            }
                        }
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::Expr(expr) => {
                let value = self.eval_expr(expr, hooks)?;
                let depth = self.frames.len();
                if let Some(record) = self.evals.last_mut() {
                    if depth == record.frame_base + 1 {
                        record.completion = value;
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr, hooks)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval_expr(cond, hooks)?.is_truthy() {
                    self.exec_stmt(then, hooks)
                } else if let Some(otherwise) = otherwise {
                    self.exec_stmt(otherwise, hooks)
                } else {
                    Ok(Flow::Normal)
                }
            }
            StmtKind::While { cond, body } => {
                let mut first = true;
                loop {
                    if !first {
                        self.statement_boundary(stmt.pos, hooks)?;
                    }
                    first = false;
                    if !self.eval_expr(cond, hooks)?.is_truthy() {
                        break;
                    }
                    match self.exec_stmt(body, hooks)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                if let Some(init) = init {
                    self.exec_kind(init, hooks)?;
                }
                let mut first = true;
                loop {
                    if !first {
                        self.statement_boundary(stmt.pos, hooks)?;
                        if let Some(update) = update {
                            self.eval_expr(update, hooks)?;
                        }
                    }
                    first = false;
                    if let Some(cond) = cond {
                        if !self.eval_expr(cond, hooks)?.is_truthy() {
                            break;
                        }
                    }
                    match self.exec_stmt(body, hooks)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
            StmtKind::Throw(expr) => {
                let value = self.eval_expr(expr, hooks)?;
                Err(self.raise(value, stmt.pos, hooks))
            }
            StmtKind::Try {
                body,
                catch,
                finally,
            } => self.exec_try(body, catch.as_ref(), finally.as_deref(), hooks),
            StmtKind::Block(_) | StmtKind::Empty | StmtKind::Function(_) => Ok(Flow::Normal),
        }
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        catch: Option<&(Option<String>, Vec<Stmt>)>,
        finally: Option<&[Stmt]>,
        hooks: &mut dyn Hooks,
    ) -> Exec<Flow> {
        if catch.is_some() {
            self.adjust_try_depth(1);
        }
        let mut result = self.exec_block(body, hooks);
        if catch.is_some() {
            self.adjust_try_depth(-1);
        }

        if let Some((binding, handler)) = catch {
            if let Err(Unwind::Throw(thrown)) = result {
                let catch_scope = Scope::new_child(&self.scope, ScopeKind::Catch);
                if let Some(name) = binding {
                    catch_scope.borrow_mut().declare(name, thrown.value);
                }
                let saved = mem::replace(&mut self.scope, catch_scope);
                result = self.exec_block(handler, hooks);
                self.scope = saved;
            }
        }

        // An abort skips finally blocks entirely
        if let (Some(finally), false) = (finally, matches!(result, Err(Unwind::Abort))) {
            match self.exec_block(finally, hooks)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        result
    }

    fn adjust_try_depth(&mut self, delta: isize) {
        if let Some(record) = self.evals.last_mut() {
            record.try_depth = record.try_depth.saturating_add_signed(delta);
        }
    }

    /// Reports a thrown value to the hooks and builds the unwind for it
    fn raise(&mut self, value: Value, pos: Pos, hooks: &mut dyn Hooks) -> Unwind {
        let has_handler = self.evals.last().map(|e| e.try_depth > 0).unwrap_or(false);
        let backtrace = self
            .frames
            .iter()
            .rev()
            .map(|f| format!("{}() at {}:{}", f.function_name, f.file_name, f.line))
            .collect();
        if let Some(script_id) = self.current_script_id() {
            if hooks.on_exception(self, script_id, &value, pos.line, has_handler) == HookAction::Abort {
                return Unwind::Abort;
            }
        }
        Unwind::Throw(Box::new(Thrown {
            value,
            line: pos.line,
            backtrace,
        }))
    }

    fn raise_error(&mut self, name: &str, message: String, pos: Pos, hooks: &mut dyn Hooks) -> Unwind {
        self.raise(Value::error(name, message), pos, hooks)
    }

    fn eval_expr(&mut self, expr: &Expr, hooks: &mut dyn Hooks) -> Exec<Value> {
        match &expr.kind {
            ExprKind::Number(n) => Ok(Value::Number(*n)),
            ExprKind::Str(s) => Ok(Value::str(s)),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Undefined => Ok(Value::Undefined),
            ExprKind::Ident(name) => match scope::lookup(&self.scope, name) {
                Some(value) => Ok(value),
                None => Err(self.raise_error(
                    "ReferenceError",
                    format!("{} is not defined", name),
                    expr.pos,
                    hooks,
                )),
            },
            ExprKind::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item, hooks)?);
                }
                Ok(Value::array(values))
            }
            ExprKind::Object(properties) => {
                let mut entries: Vec<(String, Value)> = Vec::with_capacity(properties.len());
                for (key, value) in properties {
                    let value = self.eval_expr(value, hooks)?;
                    match entries.iter_mut().find(|(k, _)| k == key) {
                        Some((_, slot)) => *slot = value,
                        None => entries.push((key.clone(), value)),
                    }
                }
                Ok(Value::object(entries))
            }
            ExprKind::Function(decl) => Ok(self.make_closure(decl.clone())),
            ExprKind::Unary(UnaryOp::Typeof, operand) => {
                if let ExprKind::Ident(name) = &operand.kind {
                    if scope::lookup(&self.scope, name).is_none() {
                        return Ok(Value::str("undefined"));
                    }
                }
                let value = self.eval_expr(operand, hooks)?;
                Ok(Value::str(value.type_of()))
            }
            ExprKind::Unary(op, operand) => {
                let value = self.eval_expr(operand, hooks)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::Typeof => Value::str(value.type_of()),
                })
            }
            ExprKind::Binary(op, left, right) => {
                let left = self.eval_expr(left, hooks)?;
                let right = self.eval_expr(right, hooks)?;
                Ok(binary(*op, &left, &right))
            }
            ExprKind::Logical(op, left, right) => {
                let left = self.eval_expr(left, hooks)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.is_truthy(),
                    LogicalOp::Or => left.is_truthy(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval_expr(right, hooks)
                }
            }
            ExprKind::Conditional(cond, then, otherwise) => {
                if self.eval_expr(cond, hooks)?.is_truthy() {
                    self.eval_expr(then, hooks)
                } else {
                    self.eval_expr(otherwise, hooks)
                }
            }
            ExprKind::Assign { target, op, value } => {
                let value = match op {
                    Some(op) => {
                        let current = self.eval_expr(target, hooks)?;
                        let rhs = self.eval_expr(value, hooks)?;
                        binary(*op, &current, &rhs)
                    }
                    None => self.eval_expr(value, hooks)?,
                };
                self.write_target(target, value.clone(), hooks)?;
                Ok(value)
            }
            ExprKind::Update {
                target,
                delta,
                prefix,
            } => {
                let old = self.eval_expr(target, hooks)?.to_number();
                let new = old + delta;
                self.write_target(target, Value::Number(new), hooks)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            ExprKind::Member(object, name) => {
                let object = self.eval_expr(object, hooks)?;
                self.get_property(&object, &Value::str(name), expr.pos, hooks)
            }
            ExprKind::Index(object, index) => {
                let object = self.eval_expr(object, hooks)?;
                let key = self.eval_expr(index, hooks)?;
                self.get_property(&object, &key, expr.pos, hooks)
            }
            ExprKind::Call(callee, args) => {
                let function = self.eval_expr(callee, hooks)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval_expr(arg, hooks)?);
                }
                let description = describe_callee(callee);
                self.call_value(function, values, &description, expr.pos, hooks)
            }
        }
    }

    fn write_target(&mut self, target: &Expr, value: Value, hooks: &mut dyn Hooks) -> Exec<()> {
        match &target.kind {
            ExprKind::Ident(name) => {
                if !scope::assign(&self.scope, name, &value) {
                    self.global.borrow_mut().declare(name, value);
                }
                Ok(())
            }
            ExprKind::Member(object, name) => {
                let object = self.eval_expr(object, hooks)?;
                self.set_property(&object, &Value::str(name), value, target.pos, hooks)
            }
            ExprKind::Index(object, index) => {
                let object = self.eval_expr(object, hooks)?;
                let key = self.eval_expr(index, hooks)?;
                self.set_property(&object, &key, value, target.pos, hooks)
            }
            _ => Err(self.raise_error(
                "ReferenceError",
                "Invalid assignment target".to_string(),
                target.pos,
                hooks,
            )),
        }
    }

    fn get_property(&mut self, object: &Value, key: &Value, pos: Pos, hooks: &mut dyn Hooks) -> Exec<Value> {
        let name = key.to_display_string();
        let value = match object {
            Value::Undefined | Value::Null => {
                return Err(self.raise_error(
                    "TypeError",
                    format!("Cannot read property '{}' of {}", name, object.to_display_string()),
                    pos,
                    hooks,
                ))
            }
            Value::Array(items) => match array_index(key) {
                Some(index) => items.borrow().get(index).cloned().unwrap_or(Value::Undefined),
                None => match name.as_str() {
                    "length" => Value::Number(items.borrow().len() as f64),
                    "push" => Value::native("push", Builtin::ArrayPush, Some(object.clone())),
                    "pop" => Value::native("pop", Builtin::ArrayPop, Some(object.clone())),
                    "join" => Value::native("join", Builtin::ArrayJoin, Some(object.clone())),
                    _ => Value::Undefined,
                },
            },
            Value::Str(s) => match array_index(key) {
                Some(index) => s
                    .chars()
                    .nth(index)
                    .map(|c| Value::str(c.to_string()))
                    .unwrap_or(Value::Undefined),
                None if name == "length" => Value::Number(s.chars().count() as f64),
                None => Value::Undefined,
            },
            Value::Object(entries) => entries
                .borrow()
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Undefined),
            Value::Error(err) => match name.as_str() {
                "message" => Value::str(&err.message),
                "name" => Value::str(&err.name),
                _ => Value::Undefined,
            },
            Value::Function(closure) if name == "name" => Value::str(closure.name()),
            _ => Value::Undefined,
        };
        Ok(value)
    }

    fn set_property(
        &mut self,
        object: &Value,
        key: &Value,
        value: Value,
        pos: Pos,
        hooks: &mut dyn Hooks,
    ) -> Exec<()> {
        match object {
            Value::Array(items) => {
                if let Some(index) = array_index(key) {
                    let mut items = items.borrow_mut();
                    if index >= items.len() {
                        items.resize(index + 1, Value::Undefined);
                    }
                    items[index] = value;
                }
                Ok(())
            }
            Value::Object(entries) => {
                let name = key.to_display_string();
                let mut entries = entries.borrow_mut();
                match entries.iter_mut().find(|(k, _)| *k == name) {
                    Some((_, slot)) => *slot = value,
                    None => entries.push((name, value)),
                }
                Ok(())
            }
            other => Err(self.raise_error(
                "TypeError",
                format!(
                    "Cannot set property '{}' of {}",
                    key.to_display_string(),
                    other.to_display_string()
                ),
                pos,
                hooks,
            )),
        }
    }

    fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        description: &str,
        pos: Pos,
        hooks: &mut dyn Hooks,
    ) -> Exec<Value> {
        match callee {
            Value::Function(closure) => self.call_closure(closure, args, pos, hooks),
            Value::Native(native) => self.call_native(&native, args),
            _ => Err(self.raise_error(
                "TypeError",
                format!("{} is not a function", description),
                pos,
                hooks,
            )),
        }
    }

    fn call_closure(&mut self, closure: Rc<Closure>, args: Vec<Value>, pos: Pos, hooks: &mut dyn Hooks) -> Exec<Value> {
        if self.frames.len() >= self.max_call_depth {
            return Err(self.raise_error(
                "RangeError",
                "Maximum call stack size exceeded".to_string(),
                pos,
                hooks,
            ));
        }
        let name = closure.name().to_string();
        let function_scope = Scope::new_child(&closure.env, ScopeKind::Function(name.clone()));
        {
            let mut s = function_scope.borrow_mut();
            let mut args = args.into_iter();
            for param in &closure.decl.params {
                s.declare(param, args.next().unwrap_or(Value::Undefined));
            }
        }
        let saved_scope = mem::replace(&mut self.scope, function_scope);
        self.frames.push(FrameInfo {
            function_name: name.clone(),
            file_name: closure.file.to_string(),
            line: closure.decl.pos.line,
            column: closure.decl.pos.column,
        });
        let script_id = self.current_script_id().unwrap_or(0);
        hooks.on_function_entry(self, script_id, &name);

        self.hoist(&closure.decl.body);
        let result = match self.exec_block(&closure.decl.body, hooks) {
            Ok(Flow::Return(value)) => Ok(value),
            Ok(_) => Ok(Value::Undefined),
            Err(unwind) => Err(unwind),
        };

        let returned = result.as_ref().ok().cloned().unwrap_or(Value::Undefined);
        hooks.on_function_exit(self, script_id, &returned);
        self.frames.pop();
        self.scope = saved_scope;
        result
    }

    fn call_native(&mut self, native: &NativeFunction, args: Vec<Value>) -> Exec<Value> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Undefined);
        let value = match native.builtin {
            Builtin::Print => {
                let line = args
                    .iter()
                    .map(|a| a.to_display_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                (self.output)(&line);
                Value::Undefined
            }
            Builtin::ErrorCtor => {
                let message = match arg(0) {
                    Value::Undefined => String::new(),
                    other => other.to_display_string(),
                };
                Value::error("Error", message)
            }
            Builtin::StringCtor => Value::str(arg(0).to_display_string()),
            Builtin::NumberCtor => Value::Number(arg(0).to_number()),
            Builtin::MathFloor => Value::Number(arg(0).to_number().floor()),
            Builtin::MathAbs => Value::Number(arg(0).to_number().abs()),
            Builtin::MathMax => Value::Number(
                args.iter()
                    .map(Value::to_number)
                    .fold(f64::NEG_INFINITY, f64::max),
            ),
            Builtin::MathMin => Value::Number(args.iter().map(Value::to_number).fold(f64::INFINITY, f64::min)),
            Builtin::ArrayPush | Builtin::ArrayPop | Builtin::ArrayJoin => {
                let Some(Value::Array(items)) = &native.this else {
                    return Ok(Value::Undefined);
                };
                match native.builtin {
                    Builtin::ArrayPush => {
                        let mut items = items.borrow_mut();
                        items.extend(args.iter().cloned());
                        Value::Number(items.len() as f64)
                    }
                    Builtin::ArrayPop => items.borrow_mut().pop().unwrap_or(Value::Undefined),
                    _ => {
                        let separator = match arg(0) {
                            Value::Undefined => ",".to_string(),
                            other => other.to_display_string(),
                        };
                        let joined = items
                            .borrow()
                            .iter()
                            .map(|item| match item {
                                Value::Undefined | Value::Null => String::new(),
                                other => other.to_display_string(),
                            })
                            .collect::<Vec<_>>()
                            .join(&separator);
                        Value::str(joined)
                    }
                }
            }
        };
        Ok(value)
    }
}

fn finish(result: Exec<Value>) -> ScriptResult<Value> {
    match result {
        Ok(value) => Ok(value),
        Err(Unwind::Throw(thrown)) => {
            let Thrown {
                value,
                line,
                backtrace,
            } = *thrown;
            Err(ScriptError::Thrown {
                message: value.to_display_string(),
                value,
                line,
                backtrace,
            })
        }
        Err(Unwind::Abort) => Err(ScriptError::Aborted),
    }
}

fn array_index(key: &Value) -> Option<usize> {
    match key {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
        _ => None,
    }
}

fn describe_callee(callee: &Expr) -> String {
    match &callee.kind {
        ExprKind::Ident(name) => name.clone(),
        ExprKind::Member(object, name) => format!("{}.{}", describe_callee(object), name),
        _ => "expression".to_string(),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            (Value::Str(_), _)
            | (_, Value::Str(_))
            | (Value::Array(_) | Value::Object(_) | Value::Error(_), _)
            | (_, Value::Array(_) | Value::Object(_) | Value::Error(_)) => Value::str(format!(
                "{}{}",
                left.to_display_string(),
                right.to_display_string()
            )),
            _ => Value::Number(left.to_number() + right.to_number()),
        },
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Eq => Value::Bool(left.loose_equals(right)),
        BinaryOp::NotEq => Value::Bool(!left.loose_equals(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(right)),
        BinaryOp::Less | BinaryOp::LessEq | BinaryOp::Greater | BinaryOp::GreaterEq => {
            let ordering = match (left, right) {
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => left.to_number().partial_cmp(&right.to_number()),
            };
            let Some(ordering) = ordering else {
                return Value::Bool(false);
            };
            Value::Bool(match op {
                BinaryOp::Less => ordering.is_lt(),
                BinaryOp::LessEq => ordering.is_le(),
                BinaryOp::Greater => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn run(code: &str) -> ScriptResult<Value> {
        Interpreter::new().eval(code, "test.js", &mut NoHooks)
    }

    fn number(value: ScriptResult<Value>) -> f64 {
        match value {
            Ok(Value::Number(n)) => n,
            other => panic!("expected number, got {:?}", other),
        }
    }

    #[derive(Default)]
    struct Recorder {
        lines: Vec<u32>,
        entries: Vec<String>,
        exits: usize,
        exceptions: Vec<(String, bool)>,
    }

    impl Hooks for Recorder {
        fn on_statement(&mut self, _interp: &mut Interpreter, _id: ScriptId, pos: Pos) -> HookAction {
            self.lines.push(pos.line);
            HookAction::Continue
        }

        fn on_function_entry(&mut self, _interp: &mut Interpreter, _id: ScriptId, name: &str) {
            self.entries.push(name.to_string());
        }

        fn on_function_exit(&mut self, _interp: &mut Interpreter, _id: ScriptId, _value: &Value) {
            self.exits += 1;
        }

        fn on_exception(
            &mut self,
            _interp: &mut Interpreter,
            _id: ScriptId,
            exception: &Value,
            _line: u32,
            has_handler: bool,
        ) -> HookAction {
            self.exceptions.push((exception.to_display_string(), has_handler));
            HookAction::Continue
        }
    }

    #[test]
    fn test_arithmetic_and_completion_value() {
        assert_eq!(number(run("var a = 2; a * 3 + 1")), 7.0);
        assert_eq!(number(run("var s = 0; for (var i = 0; i < 5; i++) { s += i; } s")), 10.0);
    }

    #[test]
    fn test_closures_capture_scope() {
        let code = "function counter() { var n = 0; return function() { n++; return n; }; }\n\
                    var c = counter(); c(); c(); c()";
        assert_eq!(number(run(code)), 3.0);
    }

    #[test]
    fn test_string_concatenation() {
        match run("'a' + 1 + 2").unwrap() {
            Value::Str(s) => assert_eq!(&*s, "a12"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_try_catch_finally() {
        let code = "var log = [];\n\
                    try { throw new Error('boom'); } catch (e) { log.push(e.message); } finally { log.push('done'); }\n\
                    log.join('|')";
        match run(code).unwrap() {
            Value::Str(s) => assert_eq!(&*s, "boom|done"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_uncaught_throw_reports_line() {
        let err = run("var x = 1;\nthrow 'bad';").unwrap_err();
        match err {
            ScriptError::Thrown { message, line, .. } => {
                assert_eq!(message, "bad");
                assert_eq!(line, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_reference_error() {
        let err = run("missing + 1").unwrap_err();
        assert!(err.to_string().contains("missing is not defined"));
    }

    #[test]
    fn test_hooks_see_statements_and_frames() {
        let code = "function g() {\n  return 1;\n}\ng();\ng();";
        let mut recorder = Recorder::default();
        Interpreter::new().eval(code, "t.js", &mut recorder).unwrap();
        assert_eq!(recorder.lines, vec![4, 2, 5, 2]);
        assert_eq!(recorder.entries, vec!["<global>", "g", "g"]);
        assert_eq!(recorder.exits, 3);
    }

    #[test]
    fn test_loop_iterations_hit_header() {
        let code = "var i = 0;\nwhile (i < 3)\n  i++;";
        let mut recorder = Recorder::default();
        Interpreter::new().eval(code, "t.js", &mut recorder).unwrap();
        assert_eq!(recorder.lines, vec![1, 2, 3, 2, 3, 2, 3, 2]);
    }

    #[test]
    fn test_exception_hook_knows_about_handlers() {
        let code = "function f() { throw 'inner'; }\ntry { f(); } catch (e) {}\nthrow 'outer';";
        let mut recorder = Recorder::default();
        let result = Interpreter::new().eval(code, "t.js", &mut recorder);
        assert!(result.is_err());
        assert_eq!(
            recorder.exceptions,
            vec![("inner".to_string(), true), ("outer".to_string(), false)]
        );
    }

    struct AbortAt(u32);

    impl Hooks for AbortAt {
        fn on_statement(&mut self, _interp: &mut Interpreter, _id: ScriptId, pos: Pos) -> HookAction {
            if pos.line == self.0 {
                HookAction::Abort
            } else {
                HookAction::Continue
            }
        }
    }

    #[test]
    fn test_abort_is_not_catchable() {
        let code = "var done = false;\ntry {\n  done = true;\n} catch (e) {}\n";
        let mut interp = Interpreter::new();
        let err = interp.eval(code, "t.js", &mut AbortAt(3)).unwrap_err();
        assert!(matches!(err, ScriptError::Aborted));
        assert!(!interp.is_running());
        assert!(interp.backtrace().is_empty());
    }

    struct NestedAt {
        line: u32,
        result: Option<ScriptResult<Value>>,
        chain_names: Vec<String>,
    }

    impl Hooks for NestedAt {
        fn on_statement(&mut self, interp: &mut Interpreter, _id: ScriptId, pos: Pos) -> HookAction {
            if pos.line == self.line && self.result.is_none() {
                self.chain_names = interp.scope_chain()[0]
                    .bindings
                    .iter()
                    .map(|(n, _)| n.clone())
                    .collect();
                self.result = Some(interp.eval_nested("x = x + 1; var y = 10; x", "console", true, &mut NoHooks));
            }
            HookAction::Continue
        }
    }

    #[test]
    fn test_nested_evaluation_sees_and_mutates_locals() {
        let code = "function f() {\n  var x = 5;\n  return x;\n}\nf()";
        let mut interp = Interpreter::new();
        let mut hooks = NestedAt {
            line: 3,
            result: None,
            chain_names: Vec::new(),
        };
        let value = interp.eval(code, "t.js", &mut hooks).unwrap();
        assert_eq!(number(hooks.result.unwrap()), 6.0);
        assert_eq!(number(Ok(value)), 6.0);
        assert_eq!(hooks.chain_names, vec!["x"]);
    }

    #[test]
    fn test_call_function_by_name() {
        let mut interp = Interpreter::new();
        interp
            .eval("function add(a, b) { return a + b; }", "lib.js", &mut NoHooks)
            .unwrap();
        let value = interp
            .call_function("add", vec![Value::Number(2.0), Value::Number(3.0)], &mut NoHooks)
            .unwrap();
        assert_eq!(number(Ok(value)), 5.0);
        assert!(interp.call_function("nope", vec![], &mut NoHooks).is_err());
    }

    #[test]
    fn test_print_output_is_redirected() {
        let captured = Rc::new(RefCell::new(Vec::new()));
        let sink = captured.clone();
        let mut interp = Interpreter::new();
        interp.set_output(Box::new(move |line| sink.borrow_mut().push(line.to_string())));
        interp.eval("print('a', 1 + 1)", "t.js", &mut NoHooks).unwrap();
        assert_eq!(captured.borrow().as_slice(), ["a 2".to_string()]);
    }

    #[test]
    fn test_script_ids_increase() {
        let mut interp = Interpreter::new();
        let first = interp.peek_next_script_id();
        interp.eval("1", "a.js", &mut NoHooks).unwrap();
        assert_eq!(interp.peek_next_script_id(), first + 1);
    }

    #[test]
    fn test_call_depth_limit() {
        let mut interp = Interpreter::new();
        interp.set_max_call_depth(20);
        let err = interp
            .eval("function r() { return r(); }\nr()", "t.js", &mut NoHooks)
            .unwrap_err();
        assert!(err.to_string().contains("Maximum call stack size exceeded"));
        assert!(interp.backtrace().is_empty());
    }
}
