// Debugger configuration
//
// Loaded from JSON with per-field defaults, then adjusted by environment
// variables.

use crate::error::{DebugResult, DebuggerError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

pub const ENV_INJECTED_TIMEOUT_MS: &str = "SCRIPT_DEBUGGER_INJECTED_TIMEOUT_MS";
pub const ENV_INTERRUPT_ON_EXCEPTIONS: &str = "SCRIPT_DEBUGGER_INTERRUPT_ON_EXCEPTIONS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebuggerConfig {
    /// Watchdog budget for injected evaluations that do not pause at start
    pub injected_timeout_ms: u64,
    /// Bounded wait used whenever the engine lock is acquired
    pub engine_lock_timeout_ms: u64,
    pub liveness_running_interval_ms: u64,
    pub liveness_interrupted_interval_ms: u64,
    pub interrupt_on_breakpoints: bool,
    pub interrupt_on_exceptions: bool,
    /// Characters kept in a variable's short rendering
    pub short_value_length: usize,
    pub max_variable_depth: usize,
    pub max_child_variables: usize,
    /// Global names flagged as helper objects in variable snapshots
    pub helper_object_names: Vec<String>,
    pub condition_timeout_ms: u64,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            injected_timeout_ms: 3000,
            engine_lock_timeout_ms: 100,
            liveness_running_interval_ms: 1000,
            liveness_interrupted_interval_ms: 5000,
            interrupt_on_breakpoints: true,
            interrupt_on_exceptions: false,
            short_value_length: 50,
            max_variable_depth: 3,
            max_child_variables: 100,
            helper_object_names: ["print", "helper", "network", "storage"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            condition_timeout_ms: 1000,
        }
    }
}

impl DebuggerConfig {
    /// Read a JSON configuration file; missing keys take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> DebugResult<Self> {
        let path = path.as_ref();
        debug!("Loading debugger config from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        let config: DebuggerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn with_env_overrides(self) -> DebugResult<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> DebugResult<Self> {
        if let Some(raw) = lookup(ENV_INJECTED_TIMEOUT_MS) {
            self.injected_timeout_ms = raw.trim().parse().map_err(|_| {
                DebuggerError::Config(format!("{} must be an integer, got '{}'", ENV_INJECTED_TIMEOUT_MS, raw))
            })?;
        }
        if let Some(raw) = lookup(ENV_INTERRUPT_ON_EXCEPTIONS) {
            self.interrupt_on_exceptions = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    warn!("Ignoring {}='{}'", ENV_INTERRUPT_ON_EXCEPTIONS, raw);
                    self.interrupt_on_exceptions
                }
            };
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> DebugResult<()> {
        if self.engine_lock_timeout_ms == 0 {
            return Err(DebuggerError::Config("engine_lock_timeout_ms must be positive".to_string()));
        }
        if self.short_value_length == 0 {
            return Err(DebuggerError::Config("short_value_length must be positive".to_string()));
        }
        Ok(())
    }

    pub fn injected_timeout(&self) -> Duration {
        Duration::from_millis(self.injected_timeout_ms)
    }

    pub fn engine_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.engine_lock_timeout_ms)
    }

    pub fn condition_timeout(&self) -> Duration {
        Duration::from_millis(self.condition_timeout_ms)
    }

    pub fn liveness_interval(&self, interrupted: bool) -> Duration {
        if interrupted {
            Duration::from_millis(self.liveness_interrupted_interval_ms)
        } else {
            Duration::from_millis(self.liveness_running_interval_ms)
        }
    }
}
