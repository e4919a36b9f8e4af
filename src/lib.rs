pub mod adapters;
pub mod cli;
pub mod clock;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod logging;
pub mod node;
pub mod persistence;
pub mod strategy;
pub mod tasks;
pub mod trader;

pub use clock::{LiveClock, TimeEvent};
pub use config::NodeConfig;
pub use engine::{DataEngine, DrainHandle, Engine, ExecutionEngine};
pub use error::{NodeError, Result};
pub use node::{NodeHandle, NodeParts, NodeState, TradingNode};
pub use persistence::{
    build_exec_database, BypassExecutionDatabase, ExecutionDatabase, RedisExecutionDatabase,
};
pub use strategy::{Strategy, StrategyContext};
pub use tasks::{CancellationReport, ExceptionHandler, TaskFailure, TaskRegistry};
pub use trader::{ResidualReport, Trader, TraderLifecycle};
