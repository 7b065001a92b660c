//! Command and demo configuration
//!
//! Configuration is always passed explicitly; there is no process-wide
//! default instance.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::error::{CommandError, Result};

/// Per-command settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Name used in log output
    pub name: String,

    /// Whether a new invocation may start while another is in flight
    ///
    /// When false, `can_execute` returns false for as long as
    /// `executing_count() != 0`.
    pub allow_concurrent_execution: bool,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            name: "command".to_string(),
            allow_concurrent_execution: true,
        }
    }
}

impl CommandConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn exclusive(mut self) -> Self {
        self.allow_concurrent_execution = false;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("command name must not be empty".into());
        }
        Ok(())
    }
}

/// Settings for the cancel/reset cycle demo binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Command settings for the demo command
    pub command: CommandConfig,

    /// Concurrent invocations started per cycle
    pub invocations: usize,

    /// Number of start/cancel/drain/reset cycles
    pub cycles: usize,

    /// Delay between cancellation polls inside the work function (ms)
    ///
    /// Bounds how long an invocation takes to observe a group cancel.
    pub poll_interval_ms: u64,

    /// Polls a work function performs before completing on its own
    ///
    /// Should be large enough that cancellation wins the race; at the
    /// default of 200 polls * 5ms an invocation runs for about a second.
    pub work_iterations: u32,

    /// tracing env filter used when RUST_LOG is unset
    pub log_filter: String,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            command: CommandConfig::new("demo"),
            invocations: 5,
            cycles: 10,
            poll_interval_ms: 5,
            work_iterations: 200,
            log_filter: "async_command=info".to_string(),
        }
    }
}

impl DemoConfig {
    /// Load a config from a TOML file; missing keys fall back to defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: DemoConfig = toml::from_str(&content)?;
        config.validate().map_err(CommandError::Config)?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        self.command.validate()?;

        if self.invocations == 0 {
            return Err("invocations must be at least 1".into());
        }

        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be positive".into());
        }

        // An exclusive command only ever admits one of the concurrent starts
        if !self.command.allow_concurrent_execution && self.invocations > 1 {
            return Err(format!(
                "invocations ({}) must be 1 when concurrent execution is disabled",
                self.invocations
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(DemoConfig::default().validate().is_ok());
        assert!(CommandConfig::default().allow_concurrent_execution);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: DemoConfig = toml::from_str(
            r#"
            cycles = 3

            [command]
            name = "save"
            "#,
        )
        .unwrap();
        assert_eq!(config.cycles, 3);
        assert_eq!(config.invocations, 5);
        assert_eq!(config.command.name, "save");
        assert!(config.command.allow_concurrent_execution);
    }

    #[test]
    fn test_exclusive_with_many_invocations_is_rejected() {
        let config = DemoConfig {
            command: CommandConfig::new("x").exclusive(),
            ..DemoConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_name_is_rejected() {
        let config = CommandConfig::new("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = DemoConfig::load("/definitely/not/here.toml");
        assert!(matches!(result, Err(CommandError::Io(_))));
    }
}
