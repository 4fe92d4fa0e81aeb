// tinyscript
//
// A small JavaScript-flavoured scripting language meant to be embedded in a
// host that wants to watch it run: statement, call and exception hooks, nested
// evaluation in the paused scope, and scope/backtrace inspection.

pub mod ast;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod scope;
pub mod value;

pub use ast::Pos;
pub use error::{ScriptError, ScriptResult, SyntaxError};
pub use interpreter::{
    FrameInfo, HookAction, Hooks, Interpreter, NoHooks, ScopeView, ScriptId, GLOBAL_FRAME_NAME,
};
pub use scope::ScopeKind;
pub use value::{format_number, Value};
