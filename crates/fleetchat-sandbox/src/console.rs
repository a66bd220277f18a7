//! Secure console proxy.
//!
//! Plugin code never gets a live handle to host logging internals. Instead it
//! receives a [`SecureConsole`] that accepts structured records and re-emits
//! them as host `tracing` events tagged with the plugin id.

use serde::{Deserialize, Serialize};

/// Severity of a plugin console record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Error,
    Warn,
    Info,
    Debug,
}

/// One structured console record emitted by a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleRecord {
    /// Plugin id the record originated from.
    pub plugin: String,
    pub level: ConsoleLevel,
    pub message: String,
}

/// Forwards plugin console output into host `tracing`.
#[derive(Debug, Clone)]
pub struct SecureConsole {
    plugin: String,
}

impl SecureConsole {
    /// Create a console bound to one plugin id.
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
        }
    }

    /// Emit a record at the given level.
    pub fn log(&self, level: ConsoleLevel, message: &str) {
        match level {
            ConsoleLevel::Error => tracing::error!(plugin = %self.plugin, plugin_msg = message),
            ConsoleLevel::Warn => tracing::warn!(plugin = %self.plugin, plugin_msg = message),
            ConsoleLevel::Info => tracing::info!(plugin = %self.plugin, plugin_msg = message),
            ConsoleLevel::Debug => tracing::debug!(plugin = %self.plugin, plugin_msg = message),
        }
    }

    /// Emit an already-structured record (used for records that crossed the
    /// worker channel).
    pub fn emit(&self, record: &ConsoleRecord) {
        self.log(record.level, &record.message);
    }

    /// Build a record tagged with this console's plugin id.
    pub fn record(&self, level: ConsoleLevel, message: impl Into<String>) -> ConsoleRecord {
        ConsoleRecord {
            plugin: self.plugin.clone(),
            level,
            message: message.into(),
        }
    }
}
