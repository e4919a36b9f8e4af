use clap::{Parser, Subcommand};

use crate::config::{ExecDatabaseKind, NodeConfig};

#[derive(Parser)]
#[command(name = "livenode")]
#[command(version = "0.1.0")]
#[command(about = "Live trading node supervisor", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build and run a node until SIGINT/SIGTERM
    Run {
        /// Config directory (default.toml plus $LIVENODE_ENV overrides)
        #[arg(short, long, default_value = "config", env = "LIVENODE_CONFIG_DIR")]
        config: String,
    },
    /// Load and validate a config directory without starting anything
    Check {
        #[arg(short, long, default_value = "config", env = "LIVENODE_CONFIG_DIR")]
        config: String,
    },
}

/// Human-readable summary printed by `livenode check`
pub fn describe_config(config: &NodeConfig) -> Vec<String> {
    let database = match config.exec_database.kind() {
        ExecDatabaseKind::Redis => format!(
            "redis ({}:{})",
            config.exec_database.host.as_deref().unwrap_or("?"),
            config
                .exec_database
                .port
                .map(|p| p.to_string())
                .unwrap_or_else(|| "?".to_string())
        ),
        ExecDatabaseKind::Bypass => "bypass".to_string(),
    };

    let clients = if config.data_clients.is_empty() {
        "none".to_string()
    } else {
        config
            .data_clients
            .keys()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    };

    vec![
        format!("trader:         {}-{}", config.trader.name, config.trader.id_tag),
        format!("exec database:  {}", database),
        format!("data clients:   {}", clients),
        format!(
            "strategy state: load={} save={}",
            config.strategy.load_state, config.strategy.save_state
        ),
        format!(
            "scheduler:      {:?} (max_blocking_threads={})",
            config.node.scheduler, config.node.max_blocking_threads
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::parse_from(["livenode", "run", "--config", "deploy/config"]);
        match cli.command {
            Commands::Run { config } => assert_eq!(config, "deploy/config"),
            Commands::Check { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn test_describe_redis_config() {
        let config = NodeConfig::from_toml_str(
            r#"
            [trader]
            name = "TESTER"
            id_tag = "001"

            [exec_database]
            type = "redis"
            host = "localhost"
            port = 6379
            "#,
        )
        .unwrap();

        let lines = describe_config(&config);
        assert!(lines[0].ends_with("TESTER-001"));
        assert!(lines[1].contains("redis (localhost:6379)"));
        assert!(lines[2].ends_with("none"));
    }
}
