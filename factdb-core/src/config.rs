//! Engine configuration
//!
//! Configuration is loaded from TOML, validated after load and applied to
//! query builders and the logging subscriber.

use crate::query::planner::{DeclarationOrder, JoinOrderStrategy, SelectivityOrder};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Query planner settings
    pub planner: PlannerSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerSettings {
    /// Join-order heuristic
    pub join_order: JoinOrderKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level
    pub level: LogLevel,
    /// Log format
    pub format: LogFormat,
    /// Result streams open longer than this are logged as slow queries
    pub slow_query_threshold_ms: u64,
    /// Number of slow queries kept for reporting
    pub slow_query_capacity: usize,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Text,
            slow_query_threshold_ms: 100,
            slow_query_capacity: 1000,
        }
    }
}

impl LoggingSettings {
    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_threshold_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinOrderKind {
    /// Roots joined in declaration order
    Declaration,
    /// Most restricted roots first
    #[default]
    Selectivity,
}

impl JoinOrderKind {
    /// Strategy implementing this kind
    pub fn strategy(self) -> Arc<dyn JoinOrderStrategy> {
        match self {
            JoinOrderKind::Declaration => Arc::new(DeclarationOrder),
            JoinOrderKind::Selectivity => Arc::new(SelectivityOrder),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl EngineConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content).context("Invalid configuration TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.logging.slow_query_threshold_ms == 0 {
            return Err(anyhow::anyhow!("Slow query threshold cannot be 0"));
        }

        if self.logging.slow_query_capacity == 0 {
            return Err(anyhow::anyhow!("Slow query capacity cannot be 0"));
        }

        Ok(())
    }

    /// Join-order strategy selected by the planner settings
    pub fn strategy(&self) -> Arc<dyn JoinOrderStrategy> {
        self.planner.join_order.strategy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.planner.join_order, JoinOrderKind::Selectivity);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.strategy().name(), "selectivity");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            [planner]
            join_order = "declaration"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.strategy().name(), "declaration");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.slow_query_threshold_ms, 100);
    }

    #[test]
    fn test_config_validation() {
        let err = EngineConfig::from_toml_str("[logging]\nslow_query_threshold_ms = 0\n");
        assert!(err.is_err());
        assert!(EngineConfig::from_toml_str("[planner]\njoin_order = \"random\"\n").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("factdb.toml");
        let mut config = EngineConfig::default();
        config.logging.level = LogLevel::Debug;
        config.save_to_file(&path).unwrap();

        let loaded = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(EngineConfig::load_from_file(&dir.path().join("missing.toml")).is_err());
    }
}
