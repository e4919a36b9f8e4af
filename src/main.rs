use clap::Parser;
use livenode::cli::{describe_config, Cli, Commands};
use livenode::config::NodeConfig;
use livenode::logging::{init_logging, init_logging_simple};
use livenode::node::TradingNode;
use std::process::ExitCode;
use tracing::{error, info};

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(&config),
        Commands::Check { config } => check(&config),
    }
}

fn run(config_dir: &str) -> ExitCode {
    let config = match NodeConfig::load_from(config_dir) {
        Ok(config) => config,
        Err(e) => {
            init_logging_simple();
            error!("Failed to load config from {}: {}", config_dir, e);
            return ExitCode::FAILURE;
        }
    };

    // Held for the lifetime of the process so file logs are flushed
    let _guard = init_logging(&config.logging);

    let node = match TradingNode::new(Vec::new(), config) {
        Ok(node) => node,
        Err(e) => {
            error!("Failed to build node: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Blocks until a signal (or another caller) stops the node
    node.start();
    // No-op when a signal already queued the shutdown
    node.shutdown();
    node.dispose();

    info!("Exited");
    ExitCode::SUCCESS
}

fn check(config_dir: &str) -> ExitCode {
    init_logging_simple();

    let config = match NodeConfig::load_from(config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {config_dir}: {e}");
            return ExitCode::FAILURE;
        }
    };

    for line in describe_config(&config) {
        println!("{line}");
    }

    match config.validate() {
        Ok(()) => {
            println!("Configuration OK");
            ExitCode::SUCCESS
        }
        Err(errors) => {
            for e in errors {
                eprintln!("  - {e}");
            }
            ExitCode::FAILURE
        }
    }
}
