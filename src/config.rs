//! Configuration
//!
//! Engine and monitor settings. Every field has a default so a config file
//! only needs to name what it changes.

use crate::error::{Error, Result};
use crate::lifecycle::class::ClassId;
use crate::lifecycle::trace::TraceFlags;
use serde::{Deserialize, Serialize};
use std::path::Path;

// =============================================================================
// Lifecycle Configuration
// =============================================================================

/// Settings consulted by the lifecycle engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Interval a crank reschedules with unless something shortens it (ms)
    pub default_reschedule_ms: u64,
    /// Upper bound on any reschedule interval (ms)
    pub max_reschedule_ms: u64,
    /// Warn every time a condition's set count reaches a multiple of this
    /// (0 disables the warning)
    pub runaway_set_warn_step: u32,
    /// Ring size used when a trace is attached without an explicit capacity
    pub default_trace_capacity: usize,
    /// Categories traced for newly created objects
    pub default_trace_flags: TraceFlags,
    /// Classes whose lifecycle events are also logged at debug level
    pub debug_trace_classes: Vec<ClassId>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            default_reschedule_ms: 3000,
            max_reschedule_ms: 60_000,
            runaway_set_warn_step: 1000,
            default_trace_capacity: 256,
            default_trace_flags: TraceFlags::ALL,
            debug_trace_classes: Vec::new(),
        }
    }
}

impl LifecycleConfig {
    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.max_reschedule_ms == 0 {
            return Err(Error::Configuration(
                "max_reschedule_ms must be greater than zero".to_string(),
            ));
        }
        if self.default_reschedule_ms > self.max_reschedule_ms {
            return Err(Error::Configuration(format!(
                "default_reschedule_ms ({}) exceeds max_reschedule_ms ({})",
                self.default_reschedule_ms, self.max_reschedule_ms
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Monitor Configuration
// =============================================================================

/// Settings of the tokio monitor service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// State change broadcast channel capacity
    pub event_channel_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: 1024,
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Everything the binary reads from its config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub lifecycle: LifecycleConfig,
    pub monitor: MonitorConfig,
}

impl AppConfig {
    /// Load from a YAML (`.yaml`/`.yml`) or JSON (`.json`) file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        let config: AppConfig = match ext.as_deref() {
            Some("yaml") | Some("yml") => Self::from_yaml(&raw)?,
            Some("json") => serde_json::from_str(&raw)
                .map_err(|e| Error::ConfigParse(format!("{}: {}", path.display(), e)))?,
            _ => {
                return Err(Error::ConfigParse(format!(
                    "{}: unsupported config format (expected .yaml, .yml or .json)",
                    path.display()
                )))
            }
        };
        config.lifecycle.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| Error::ConfigParse(e.to_string()))
    }
}
