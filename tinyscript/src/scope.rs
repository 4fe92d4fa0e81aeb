// Lexical scopes
//
// A scope chain is a linked list of binding tables ending at the global scope.
// Bindings keep declaration order so inspectors can list them predictably.

use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

pub type ScopeRef = Rc<RefCell<Scope>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Function(String),
    Catch,
    /// Scope opened for a nested evaluation, named after its label
    Nested(String),
}

pub struct Scope {
    pub kind: ScopeKind,
    bindings: Vec<(String, Value)>,
    parent: Option<ScopeRef>,
}

impl Scope {
    pub fn new_global() -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            kind: ScopeKind::Global,
            bindings: Vec::new(),
            parent: None,
        }))
    }

    pub fn new_child(parent: &ScopeRef, kind: ScopeKind) -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            kind,
            bindings: Vec::new(),
            parent: Some(parent.clone()),
        }))
    }

    pub fn parent(&self) -> Option<ScopeRef> {
        self.parent.clone()
    }

    pub fn bindings(&self) -> &[(String, Value)] {
        &self.bindings
    }

    pub fn has_own(&self, name: &str) -> bool {
        self.bindings.iter().any(|(n, _)| n == name)
    }

    /// Creates or overwrites a binding in this scope
    pub fn declare(&mut self, name: &str, value: Value) {
        match self.bindings.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => self.bindings.push((name.to_string(), value)),
        }
    }

    fn get_own(&self, name: &str) -> Option<Value> {
        self.bindings
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }

    fn set_own(&mut self, name: &str, value: &Value) -> bool {
        match self.bindings.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => {
                *slot = value.clone();
                true
            }
            None => false,
        }
    }
}

/// Looks `name` up along the chain starting at `scope`
pub fn lookup(scope: &ScopeRef, name: &str) -> Option<Value> {
    let mut current = scope.clone();
    loop {
        if let Some(value) = current.borrow().get_own(name) {
            return Some(value);
        }
        let parent = current.borrow().parent();
        match parent {
            Some(p) => current = p,
            None => return None,
        }
    }
}

/// Assigns to the nearest existing binding; returns false when none exists
pub fn assign(scope: &ScopeRef, name: &str, value: &Value) -> bool {
    let mut current = scope.clone();
    loop {
        if current.borrow_mut().set_own(name, value) {
            return true;
        }
        let parent = current.borrow().parent();
        match parent {
            Some(p) => current = p,
            None => return false,
        }
    }
}
