//! Configuration types for the Toolweave engine

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for Toolweave
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ToolweaveConfig {
    /// Tool registry configuration
    pub registry: RegistryConfig,

    /// Orchestrator configuration
    pub orchestrator: OrchestratorConfig,

    /// Manager (facade) configuration
    pub manager: ManagerConfig,
}

/// Tool registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Interval between background health sweeps (zero disables the monitor)
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,

    /// Timeout handed to executors when neither request nor tool sets one
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Union search results with the semantic search provider when requested
    pub enable_semantic_search: bool,

    /// Maximum number of tools selected for a generated plan (before the
    /// dependency closure is added)
    pub max_plan_steps: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(30),
            default_timeout: Duration::from_secs(30),
            enable_semantic_search: true,
            max_plan_steps: 5,
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum number of plans in the `Running` state at once
    pub max_concurrent_executions: usize,

    /// Queue processing tick
    #[serde(with = "humantime_serde")]
    pub queue_tick: Duration,

    /// How often finished executions are swept
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// How long finished executions are retained
    #[serde(with = "humantime_serde")]
    pub retention: Duration,

    /// How long `stop` waits for running plans before cancelling them
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 5,
            queue_tick: Duration::from_secs(1),
            cleanup_interval: Duration::from_secs(60),
            retention: Duration::from_secs(24 * 60 * 60),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Register the built-in tool set at startup
    pub seed_builtin_tools: bool,

    /// Run a health sweep right after startup
    pub initial_health_check: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            seed_builtin_tools: true,
            initial_health_check: true,
        }
    }
}

/// Builder for ToolweaveConfig
pub struct ConfigBuilder {
    config: ToolweaveConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            config: ToolweaveConfig::default(),
        }
    }

    /// Set registry configuration
    pub fn registry(mut self, config: RegistryConfig) -> Self {
        self.config.registry = config;
        self
    }

    /// Set orchestrator configuration
    pub fn orchestrator(mut self, config: OrchestratorConfig) -> Self {
        self.config.orchestrator = config;
        self
    }

    /// Set manager configuration
    pub fn manager(mut self, config: ManagerConfig) -> Self {
        self.config.manager = config;
        self
    }

    /// Set the concurrent plan limit
    pub fn max_concurrent_executions(mut self, max: usize) -> Self {
        self.config.orchestrator.max_concurrent_executions = max;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ToolweaveConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolweaveConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. `toolweave.toml` in the working directory
    /// 3. The file named by `TOOLWEAVE_CONFIG_PATH`, if set
    /// 4. `TOOLWEAVE_` environment variables, nested with `__`
    ///    (e.g. `TOOLWEAVE_ORCHESTRATOR__MAX_CONCURRENT_EXECUTIONS=8`)
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is invalid or the result
    /// fails validation.
    pub fn load() -> crate::error::Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(ToolweaveConfig::default()))
            .merge(Toml::file("toolweave.toml"));

        if let Ok(path) = std::env::var("TOOLWEAVE_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(
            Env::prefixed("TOOLWEAVE_")
                .ignore(&["CONFIG_PATH"])
                .split("__"),
        );

        let config: ToolweaveConfig = figment.extract().map_err(|e| {
            crate::error::ToolweaveError::Configuration(format!(
                "Failed to load configuration: {}",
                e
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::error::Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: ToolweaveConfig = Figment::from(Serialized::defaults(ToolweaveConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                crate::error::ToolweaveError::Configuration(format!(
                    "Failed to load configuration file: {}",
                    e
                ))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a limit or interval is zero.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::ToolweaveError::Configuration;

        if self.orchestrator.max_concurrent_executions == 0 {
            return Err(Configuration(
                "orchestrator.max_concurrent_executions must be at least 1".to_string(),
            ));
        }
        if self.orchestrator.queue_tick.is_zero() {
            return Err(Configuration("orchestrator.queue_tick must be non-zero".to_string()));
        }
        if self.orchestrator.cleanup_interval.is_zero() {
            return Err(Configuration(
                "orchestrator.cleanup_interval must be non-zero".to_string(),
            ));
        }
        if self.registry.max_plan_steps == 0 {
            return Err(Configuration(
                "registry.max_plan_steps must be at least 1".to_string(),
            ));
        }
        if self.registry.default_timeout.is_zero() {
            return Err(Configuration(
                "registry.default_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ToolweaveConfig::default();
        assert_eq!(config.orchestrator.max_concurrent_executions, 5);
        assert_eq!(config.orchestrator.queue_tick, Duration::from_secs(1));
        assert_eq!(config.orchestrator.retention, Duration::from_secs(86_400));
        assert_eq!(config.registry.max_plan_steps, 5);
        assert_eq!(config.registry.default_timeout, Duration::from_secs(30));
        assert!(config.manager.seed_builtin_tools);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[orchestrator]
max_concurrent_executions = 8
queue_tick = "250ms"

[registry]
health_check_interval = "2m"
"#
        )
        .unwrap();

        let config = ToolweaveConfig::from_file(file.path()).unwrap();
        assert_eq!(config.orchestrator.max_concurrent_executions, 8);
        assert_eq!(config.orchestrator.queue_tick, Duration::from_millis(250));
        assert_eq!(config.registry.health_check_interval, Duration::from_secs(120));
        // untouched sections keep their defaults
        assert_eq!(config.orchestrator.cleanup_interval, Duration::from_secs(60));
        assert_eq!(config.registry.max_plan_steps, 5);
    }

    #[test]
    fn test_from_file_rejects_zero_concurrency() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[orchestrator]\nmax_concurrent_executions = 0").unwrap();

        let result = ToolweaveConfig::from_file(file.path());
        assert!(matches!(
            result,
            Err(crate::error::ToolweaveError::Configuration(_))
        ));
    }

    #[test]
    fn test_builder() {
        let config = ConfigBuilder::new()
            .max_concurrent_executions(2)
            .manager(ManagerConfig {
                seed_builtin_tools: false,
                initial_health_check: false,
            })
            .build();

        assert_eq!(config.orchestrator.max_concurrent_executions, 2);
        assert!(!config.manager.seed_builtin_tools);
    }
}
