// Breakpoint registry
//
// Breakpoints are keyed by (file, line). Every mutation returns the change it
// made so the owner can broadcast it.

use crate::error::{DebugResult, DebuggerError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Placeholder replaced by the current hit count in conditions
pub const HITS_PLACEHOLDER: &str = "%HITS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub file: String,
    pub line: u32,
    pub enabled: bool,
    pub hit_count: u32,
    /// Auto-disable once the hit count reaches this value
    pub max_hits: Option<u32>,
    pub condition: Option<String>,
    /// Result of the last successful condition evaluation
    pub last_condition_result: Option<bool>,
    /// Message from the last failed condition evaluation
    pub last_error: Option<String>,
}

impl Breakpoint {
    pub fn new(file: &str, line: u32) -> Self {
        Self {
            file: file.to_string(),
            line,
            enabled: true,
            hit_count: 0,
            max_hits: None,
            condition: None,
            last_condition_result: None,
            last_error: None,
        }
    }

    /// Condition text with %HITS replaced by the current hit count
    pub fn substituted_condition(&self) -> Option<String> {
        self.condition
            .as_ref()
            .map(|c| c.replace(HITS_PLACEHOLDER, &self.hit_count.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakpointState {
    NoBreakpoint,
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BreakpointChange {
    Added(Breakpoint),
    Removed(Breakpoint),
    Modified(Breakpoint),
}

/// What the statement-boundary logic must do after registering a hit
#[derive(Debug, Clone, PartialEq)]
pub enum HitOutcome {
    /// Unconditional breakpoint: pause now
    Fire(Breakpoint),
    /// Evaluate this condition text, then report through `apply_condition_result`
    EvaluateCondition { expression: String, hit_count: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConditionVerdict {
    Fire(Breakpoint),
    Skip,
    Error { breakpoint: Breakpoint, message: String },
}

#[derive(Debug, Default, Clone)]
pub struct BreakpointRegistry {
    breakpoints: BTreeMap<(String, u32), Breakpoint>,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    pub fn get(&self, file: &str, line: u32) -> Option<&Breakpoint> {
        self.breakpoints.get(&(file.to_string(), line))
    }

    /// All breakpoints ordered by file, then line
    pub fn list(&self) -> Vec<Breakpoint> {
        self.breakpoints.values().cloned().collect()
    }

    pub fn state(&self, file: &str, line: u32) -> BreakpointState {
        match self.get(file, line) {
            None => BreakpointState::NoBreakpoint,
            Some(bp) if bp.enabled => BreakpointState::Enabled,
            Some(_) => BreakpointState::Disabled,
        }
    }

    /// Add a breakpoint, replacing any existing one at the same place
    pub fn add(&mut self, file: &str, line: u32, enabled: bool, max_hits: Option<u32>) -> BreakpointChange {
        let mut bp = Breakpoint::new(file, line);
        bp.enabled = enabled;
        bp.max_hits = max_hits;
        info!("Breakpoint added at {}:{}", file, line);
        let existed = self
            .breakpoints
            .insert((file.to_string(), line), bp.clone())
            .is_some();
        if existed {
            BreakpointChange::Modified(bp)
        } else {
            BreakpointChange::Added(bp)
        }
    }

    pub fn remove(&mut self, file: &str, line: u32) -> DebugResult<BreakpointChange> {
        let bp = self
            .breakpoints
            .remove(&(file.to_string(), line))
            .ok_or_else(|| unknown(file, line))?;
        info!("Breakpoint removed at {}:{}", file, line);
        Ok(BreakpointChange::Removed(bp))
    }

    /// Absent becomes enabled; enabled or disabled is removed
    pub fn toggle(&mut self, file: &str, line: u32) -> BreakpointChange {
        match self.state(file, line) {
            BreakpointState::NoBreakpoint => self.add(file, line, true, None),
            BreakpointState::Enabled | BreakpointState::Disabled => match self.remove(file, line) {
                Ok(change) => change,
                Err(_) => self.add(file, line, true, None),
            },
        }
    }

    pub fn set_enabled(&mut self, file: &str, line: u32, enabled: bool) -> DebugResult<BreakpointChange> {
        self.modify(file, line, |bp| bp.enabled = enabled)
    }

    /// Set or clear the condition; the cached result and error go with it
    pub fn set_condition(&mut self, file: &str, line: u32, condition: Option<String>) -> DebugResult<BreakpointChange> {
        let condition = condition.filter(|c| !c.trim().is_empty());
        self.modify(file, line, |bp| {
            bp.condition = condition;
            bp.last_condition_result = None;
            bp.last_error = None;
        })
    }

    pub fn set_max_hits(&mut self, file: &str, line: u32, max_hits: Option<u32>) -> DebugResult<BreakpointChange> {
        self.modify(file, line, |bp| bp.max_hits = max_hits)
    }

    /// Clear hit count and cached condition result
    pub fn reset(&mut self, file: &str, line: u32) -> DebugResult<BreakpointChange> {
        self.modify(file, line, |bp| {
            bp.hit_count = 0;
            bp.last_condition_result = None;
            bp.last_error = None;
            if bp.max_hits.is_some() {
                bp.enabled = true;
            }
        })
    }

    /// Remove every breakpoint, returning one change per removal
    pub fn clear(&mut self) -> Vec<BreakpointChange> {
        let removed = std::mem::take(&mut self.breakpoints);
        removed.into_values().map(BreakpointChange::Removed).collect()
    }

    /// Breakpoint the statement at (file, line) would stop on
    pub fn find_enabled_at(&self, file: &str, line: u32) -> Option<&Breakpoint> {
        self.get(file, line).filter(|bp| bp.enabled)
    }

    /// Register a hit on the enabled breakpoint at (file, line)
    ///
    /// The hit count is incremented before any condition is evaluated. Reaching
    /// max hits disables the breakpoint. Returns the modification together with
    /// the follow-up the caller must perform, or None without an enabled
    /// breakpoint.
    pub fn register_hit(&mut self, file: &str, line: u32) -> Option<(BreakpointChange, HitOutcome)> {
        self.find_enabled_at(file, line)?;
        let bp = self.breakpoints.get_mut(&(file.to_string(), line))?;
        bp.hit_count += 1;
        if let Some(max) = bp.max_hits {
            if bp.hit_count >= max {
                debug!("Breakpoint {}:{} reached max hits {}", file, line, max);
                bp.enabled = false;
            }
        }
        let outcome = match bp.substituted_condition() {
            Some(expression) => HitOutcome::EvaluateCondition {
                expression,
                hit_count: bp.hit_count,
            },
            None => HitOutcome::Fire(bp.clone()),
        };
        Some((BreakpointChange::Modified(bp.clone()), outcome))
    }

    /// Record a condition result; fires on a transition to true
    pub fn apply_condition_result(&mut self, file: &str, line: u32, result: Result<bool, String>) -> ConditionVerdict {
        let Some(bp) = self.breakpoints.get_mut(&(file.to_string(), line)) else {
            // Removed while the condition was being evaluated
            return ConditionVerdict::Skip;
        };
        match result {
            Ok(value) => {
                let previous = bp.last_condition_result.replace(value);
                bp.last_error = None;
                if value && previous != Some(true) {
                    ConditionVerdict::Fire(bp.clone())
                } else {
                    ConditionVerdict::Skip
                }
            }
            Err(message) => {
                bp.last_error = Some(message.clone());
                ConditionVerdict::Error {
                    breakpoint: bp.clone(),
                    message,
                }
            }
        }
    }

    fn modify(&mut self, file: &str, line: u32, f: impl FnOnce(&mut Breakpoint)) -> DebugResult<BreakpointChange> {
        let bp = self
            .breakpoints
            .get_mut(&(file.to_string(), line))
            .ok_or_else(|| unknown(file, line))?;
        f(bp);
        debug!("Breakpoint modified at {}:{}", file, line);
        Ok(BreakpointChange::Modified(bp.clone()))
    }
}

fn unknown(file: &str, line: u32) -> DebuggerError {
    DebuggerError::UnknownBreakpoint {
        file: file.to_string(),
        line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_round_trips() {
        let mut registry = BreakpointRegistry::new();
        assert!(matches!(registry.toggle("a.js", 3), BreakpointChange::Added(_)));
        assert_eq!(registry.state("a.js", 3), BreakpointState::Enabled);
        assert!(matches!(registry.toggle("a.js", 3), BreakpointChange::Removed(_)));
        assert_eq!(registry.state("a.js", 3), BreakpointState::NoBreakpoint);
    }

    #[test]
    fn test_toggle_removes_disabled() {
        let mut registry = BreakpointRegistry::new();
        registry.add("a.js", 3, false, None);
        registry.toggle("a.js", 3);
        assert_eq!(registry.state("a.js", 3), BreakpointState::NoBreakpoint);
    }

    #[test]
    fn test_one_breakpoint_per_line() {
        let mut registry = BreakpointRegistry::new();
        registry.add("a.js", 3, true, None);
        assert!(matches!(registry.add("a.js", 3, true, Some(2)), BreakpointChange::Modified(_)));
        registry.add("b.js", 3, true, None);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_find_enabled_at() {
        let mut registry = BreakpointRegistry::new();
        registry.add("a.js", 3, true, None);
        registry.add("a.js", 4, false, None);

        assert_eq!(registry.find_enabled_at("a.js", 3).map(|bp| bp.line), Some(3));
        assert!(registry.find_enabled_at("a.js", 4).is_none());
        assert!(registry.find_enabled_at("b.js", 3).is_none());

        // a disabled breakpoint is not hit and keeps its count
        assert!(registry.register_hit("a.js", 4).is_none());
        assert_eq!(registry.get("a.js", 4).unwrap().hit_count, 0);
        assert!(registry.register_hit("b.js", 3).is_none());
    }

    #[test]
    fn test_unconditional_hits_fire_until_max() {
        let mut registry = BreakpointRegistry::new();
        registry.add("a.js", 5, true, Some(2));

        let (_, first) = registry.register_hit("a.js", 5).unwrap();
        assert!(matches!(first, HitOutcome::Fire(ref bp) if bp.hit_count == 1 && bp.enabled));
        let (_, second) = registry.register_hit("a.js", 5).unwrap();
        assert!(matches!(second, HitOutcome::Fire(ref bp) if bp.hit_count == 2 && !bp.enabled));

        assert!(registry.register_hit("a.js", 5).is_none());
        assert_eq!(registry.get("a.js", 5).unwrap().hit_count, 2);

        registry.reset("a.js", 5).unwrap();
        let bp = registry.get("a.js", 5).unwrap();
        assert_eq!(bp.hit_count, 0);
        assert!(bp.enabled);
    }

    #[test]
    fn test_hits_placeholder_substitution() {
        let mut registry = BreakpointRegistry::new();
        registry.add("a.js", 1, true, None);
        registry
            .set_condition("a.js", 1, Some("%HITS >= 3 && %HITS < 10".to_string()))
            .unwrap();
        registry.register_hit("a.js", 1);
        let (_, outcome) = registry.register_hit("a.js", 1).unwrap();
        assert_eq!(
            outcome,
            HitOutcome::EvaluateCondition {
                expression: "2 >= 3 && 2 < 10".to_string(),
                hit_count: 2
            }
        );
    }

    #[test]
    fn test_condition_fires_on_rising_edge() {
        let mut registry = BreakpointRegistry::new();
        registry.add("a.js", 1, true, None);
        registry.set_condition("a.js", 1, Some("x".into())).unwrap();

        assert_eq!(registry.apply_condition_result("a.js", 1, Ok(false)), ConditionVerdict::Skip);
        assert!(matches!(
            registry.apply_condition_result("a.js", 1, Ok(true)),
            ConditionVerdict::Fire(_)
        ));
        assert_eq!(registry.apply_condition_result("a.js", 1, Ok(true)), ConditionVerdict::Skip);

        // Changing the condition clears the cached result
        registry.set_condition("a.js", 1, Some("y".into())).unwrap();
        assert!(matches!(
            registry.apply_condition_result("a.js", 1, Ok(true)),
            ConditionVerdict::Fire(_)
        ));
    }

    #[test]
    fn test_condition_error_keeps_breakpoint_enabled() {
        let mut registry = BreakpointRegistry::new();
        registry.add("a.js", 1, true, None);
        registry.set_condition("a.js", 1, Some("1 +".into())).unwrap();
        let verdict = registry.apply_condition_result("a.js", 1, Err("SyntaxError".into()));
        assert!(matches!(verdict, ConditionVerdict::Error { .. }));
        let bp = registry.get("a.js", 1).unwrap();
        assert!(bp.enabled);
        assert_eq!(bp.last_error.as_deref(), Some("SyntaxError"));
    }

    #[test]
    fn test_unknown_breakpoint_errors() {
        let mut registry = BreakpointRegistry::new();
        assert!(matches!(
            registry.remove("a.js", 9),
            Err(DebuggerError::UnknownBreakpoint { line: 9, .. })
        ));
        assert!(registry.set_enabled("a.js", 9, false).is_err());
    }

    #[test]
    fn test_clear_reports_each_removal() {
        let mut registry = BreakpointRegistry::new();
        registry.add("a.js", 1, true, None);
        registry.add("a.js", 2, true, None);
        assert_eq!(registry.clear().len(), 2);
        assert!(registry.is_empty());
    }
}
