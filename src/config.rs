use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for a trading node
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub trader: TraderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub exec_database: ExecDatabaseConfig,
    #[serde(default)]
    pub strategy: StrategyStateConfig,
    /// Named market data adapters (`data_clients.<name>`), each with its own table
    #[serde(default)]
    pub data_clients: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub node: NodeSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TraderConfig {
    /// Trader name (e.g., "TESTER")
    pub name: String,
    /// Trader instance tag (e.g., "001")
    pub id_tag: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full EnvFilter directive
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted console logs
    #[serde(default)]
    pub json: bool,
    /// Also write logs to a daily rolling file
    #[serde(default)]
    pub log_to_file: bool,
    /// Directory for the rolling log file
    #[serde(default = "default_log_file_path")]
    pub log_file_path: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file_path() -> String {
    "logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            log_to_file: false,
            log_file_path: default_log_file_path(),
        }
    }
}

/// Execution persistence backend selection
#[derive(Debug, Clone, Deserialize)]
pub struct ExecDatabaseConfig {
    /// "redis" selects the durable backend; any other value is ephemeral
    #[serde(rename = "type", default = "default_exec_db_type")]
    pub db_type: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

fn default_exec_db_type() -> String {
    "bypass".to_string()
}

impl Default for ExecDatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: default_exec_db_type(),
            host: None,
            port: None,
        }
    }
}

/// Resolved backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecDatabaseKind {
    Redis,
    Bypass,
}

impl ExecDatabaseConfig {
    /// Only an exact `redis` selects the durable backend
    pub fn kind(&self) -> ExecDatabaseKind {
        if self.db_type == "redis" {
            ExecDatabaseKind::Redis
        } else {
            ExecDatabaseKind::Bypass
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyStateConfig {
    /// Restore strategy state from the backend at construction
    #[serde(default = "default_true")]
    pub load_state: bool,
    /// Persist strategy state while stopping
    #[serde(default = "default_true")]
    pub save_state: bool,
}

fn default_true() -> bool {
    true
}

impl Default for StrategyStateConfig {
    fn default() -> Self {
        Self {
            load_state: true,
            save_state: true,
        }
    }
}

/// Scheduler flavour for the node runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    /// One cooperative servicing thread plus the bounded blocking pool
    CurrentThread,
    /// Work-stealing worker threads
    MultiThread,
}

impl Default for SchedulerKind {
    fn default() -> Self {
        SchedulerKind::CurrentThread
    }
}

/// Orchestration tuning (`node.*`)
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSettings {
    #[serde(default)]
    pub scheduler: SchedulerKind,
    /// Upper bound of the blocking worker pool
    #[serde(default = "default_max_blocking_threads")]
    pub max_blocking_threads: usize,
    /// Interval between engine readiness polls
    #[serde(default = "default_readiness_poll_interval")]
    pub readiness_poll_interval_ms: u64,
    /// Upper bound of the settling wait before residuals are checked.
    ///
    /// Best effort only: the engines give no backpressure signal, so a flat
    /// report within this window is not proof that every fill has arrived.
    #[serde(default = "default_residuals_timeout")]
    pub residuals_timeout_ms: u64,
    /// How often flatness is probed during the settling wait
    #[serde(default = "default_residuals_poll_interval")]
    pub residuals_poll_interval_ms: u64,
    /// How long dispose waits for queued lifecycle work before forcing cancellation
    #[serde(default = "default_dispose_grace")]
    pub dispose_grace_ms: u64,
    /// Install SIGINT/SIGTERM handling at construction
    #[serde(default = "default_true")]
    pub handle_signals: bool,
}

fn default_max_blocking_threads() -> usize {
    4
}

fn default_readiness_poll_interval() -> u64 {
    100
}

fn default_residuals_timeout() -> u64 {
    2_000
}

fn default_residuals_poll_interval() -> u64 {
    100
}

fn default_dispose_grace() -> u64 {
    5_000
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            scheduler: SchedulerKind::default(),
            max_blocking_threads: default_max_blocking_threads(),
            readiness_poll_interval_ms: default_readiness_poll_interval(),
            residuals_timeout_ms: default_residuals_timeout(),
            residuals_poll_interval_ms: default_residuals_poll_interval(),
            dispose_grace_ms: default_dispose_grace(),
            handle_signals: true,
        }
    }
}

impl NodeSettings {
    pub fn readiness_poll_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_interval_ms)
    }

    pub fn residuals_timeout(&self) -> Duration {
        Duration::from_millis(self.residuals_timeout_ms)
    }

    pub fn residuals_poll_interval(&self) -> Duration {
        Duration::from_millis(self.residuals_poll_interval_ms)
    }

    pub fn dispose_grace(&self) -> Duration {
        Duration::from_millis(self.dispose_grace_ms)
    }
}

impl NodeConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Self::with_defaults(Config::builder())?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("LIVENODE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (LIVENODE_TRADER__NAME, etc.)
            .add_source(
                Environment::with_prefix("LIVENODE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Parse configuration from an inline TOML document
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::with_defaults(Config::builder())?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    fn with_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("exec_database.type", "bypass")?
            .set_default("strategy.load_state", true)?
            .set_default("strategy.save_state", true)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.trader.name.trim().is_empty() {
            errors.push("trader.name must not be empty".to_string());
        }

        if self.trader.id_tag.trim().is_empty() {
            errors.push("trader.id_tag must not be empty".to_string());
        }

        if self.exec_database.kind() == ExecDatabaseKind::Redis {
            if self.exec_database.host.is_none() {
                errors.push("exec_database.host is required for the redis backend".to_string());
            }
            if self.exec_database.port.is_none() {
                errors.push("exec_database.port is required for the redis backend".to_string());
            }
        }

        if self.node.max_blocking_threads == 0 {
            errors.push("node.max_blocking_threads must be positive".to_string());
        }

        if self.node.readiness_poll_interval_ms == 0 {
            errors.push("node.readiness_poll_interval_ms must be positive".to_string());
        }

        if self.node.residuals_poll_interval_ms == 0 {
            errors.push("node.residuals_poll_interval_ms must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
