// Variable snapshots
//
// Turns the engine's scope chain into a tree of display records and diffs it
// against the snapshot published at the previous pause.

use crate::engine::{EngineValue, ScopeSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    Boolean,
    Number,
    String,
    RegExp,
    Date,
    Array,
    Object,
    Function,
    Error,
    Null,
    /// undefined and other synthetic values
    Special,
}

impl VariableType {
    pub fn of(value: &EngineValue) -> Self {
        match value {
            EngineValue::Undefined => VariableType::Special,
            EngineValue::Null => VariableType::Null,
            EngineValue::Boolean(_) => VariableType::Boolean,
            EngineValue::Number(_) => VariableType::Number,
            EngineValue::String(_) => VariableType::String,
            EngineValue::RegExp(_) => VariableType::RegExp,
            EngineValue::Date(_) => VariableType::Date,
            EngineValue::Array(_) => VariableType::Array,
            EngineValue::Object(_) => VariableType::Object,
            EngineValue::Function(_) => VariableType::Function,
            EngineValue::Error { .. } => VariableType::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableRecord {
    pub name: String,
    /// Dotted path from the scope root, unique within a snapshot
    pub path: String,
    pub var_type: VariableType,
    pub value: EngineValue,
    pub short_value: String,
    pub full_value: String,
    pub is_helper_object: bool,
    pub has_erroneous_value: bool,
    pub defined_in_parent_context: bool,
    pub just_changed: bool,
    pub children: Vec<VariableRecord>,
}

#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    pub short_value_length: usize,
    pub helper_object_names: Vec<String>,
    pub max_children: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl VariableDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Build top-level records for a scope chain, innermost scope first
///
/// Names shadowed by an inner scope are skipped; variables from outer scopes
/// are flagged as defined in a parent context.
pub fn build_records(chain: &[ScopeSnapshot], options: &SnapshotOptions) -> Vec<VariableRecord> {
    let mut seen = HashSet::new();
    let mut records = Vec::new();
    for (depth, scope) in chain.iter().enumerate() {
        for (name, value) in &scope.variables {
            if !seen.insert(name.clone()) {
                continue;
            }
            let mut record = build_record(name, name, value, options);
            record.defined_in_parent_context = depth > 0;
            record.is_helper_object = scope.is_global && options.helper_object_names.iter().any(|h| h == name);
            records.push(record);
        }
    }
    records
}

fn build_record(name: &str, path: &str, value: &EngineValue, options: &SnapshotOptions) -> VariableRecord {
    let full_value = value.render();
    let children = match value {
        EngineValue::Array(items) => items
            .iter()
            .take(options.max_children)
            .enumerate()
            .map(|(i, item)| {
                let child = i.to_string();
                build_record(&child, &format!("{}.{}", path, child), item, options)
            })
            .collect(),
        EngineValue::Object(entries) => entries
            .iter()
            .take(options.max_children)
            .map(|(key, item)| build_record(key, &format!("{}.{}", path, key), item, options))
            .collect(),
        _ => Vec::new(),
    };
    VariableRecord {
        name: name.to_string(),
        path: path.to_string(),
        var_type: VariableType::of(value),
        short_value: shorten(&full_value, options.short_value_length),
        full_value,
        value: value.clone(),
        is_helper_object: false,
        has_erroneous_value: matches!(value, EngineValue::Error { .. }),
        defined_in_parent_context: false,
        just_changed: false,
        children,
    }
}

/// Truncate to `max` characters, marking the cut with an ellipsis
pub fn shorten(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut short: String = text.chars().take(max).collect();
        short.push_str("...");
        short
    }
}

/// Identifies which scope a snapshot belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeKey {
    pub stack_depth: usize,
    pub scope_name: String,
}

/// Keeps the previous snapshot and marks changes against it
#[derive(Debug, Default)]
pub struct VariableTracker {
    previous: HashMap<String, String>,
    scope: Option<ScopeKey>,
    current: Vec<VariableRecord>,
    // baseline of the interrupted scope while injected code publishes its own
    outer: Option<Baseline>,
}

#[derive(Debug)]
struct Baseline {
    previous: HashMap<String, String>,
    scope: Option<ScopeKey>,
    current: Vec<VariableRecord>,
}

impl VariableTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &[VariableRecord] {
        &self.current
    }

    /// Replace the snapshot and compute the diff against the previous one
    ///
    /// A snapshot for a different scope starts from an empty baseline.
    pub fn update(&mut self, mut records: Vec<VariableRecord>, scope: ScopeKey) -> VariableDiff {
        if self.scope.as_ref() != Some(&scope) {
            self.previous.clear();
        }
        let mut diff = VariableDiff::default();
        let mut next = HashMap::new();
        for record in records.iter_mut() {
            mark(record, &self.previous, &mut next, &mut diff);
        }
        diff.removed = self
            .previous
            .keys()
            .filter(|path| !next.contains_key(*path))
            .cloned()
            .collect();
        diff.removed.sort();
        self.previous = next;
        self.scope = Some(scope);
        self.current = records;
        diff
    }

    /// Drop the baseline once the scope it was taken in has been popped
    pub fn on_scope_popped(&mut self, remaining_depth: usize) {
        if self
            .scope
            .as_ref()
            .is_some_and(|s| s.stack_depth > remaining_depth)
        {
            self.reset_active();
        }
    }

    /// Park the current baseline before injected code starts publishing
    pub fn enter_injection(&mut self) {
        self.outer = Some(Baseline {
            previous: self.previous.clone(),
            scope: self.scope.clone(),
            current: self.current.clone(),
        });
    }

    /// Bring back the baseline parked by `enter_injection`
    pub fn leave_injection(&mut self) {
        if let Some(outer) = self.outer.take() {
            self.previous = outer.previous;
            self.scope = outer.scope;
            self.current = outer.current;
        }
    }

    pub fn clear(&mut self) {
        self.reset_active();
        self.outer = None;
    }

    fn reset_active(&mut self) {
        self.previous.clear();
        self.scope = None;
        self.current.clear();
    }
}

fn mark(
    record: &mut VariableRecord,
    previous: &HashMap<String, String>,
    next: &mut HashMap<String, String>,
    diff: &mut VariableDiff,
) {
    match previous.get(&record.path) {
        Some(old) if *old != record.full_value => {
            record.just_changed = true;
            diff.changed.push(record.path.clone());
        }
        Some(_) => {}
        None => diff.added.push(record.path.clone()),
    }
    next.insert(record.path.clone(), record.full_value.clone());
    for child in record.children.iter_mut() {
        mark(child, previous, next, diff);
    }
}
