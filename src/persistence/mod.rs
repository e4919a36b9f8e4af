//! Execution State Persistence
//!
//! Pluggable store for execution state (orders, positions) and strategy state:
//! - `RedisExecutionDatabase` keeps state across restarts, keyed by trader identity
//! - `BypassExecutionDatabase` keeps nothing
//!
//! The backend is chosen once from `exec_database.type` at node construction.

pub mod bypass;
pub mod redis_store;

pub use self::bypass::BypassExecutionDatabase;
pub use self::redis_store::RedisExecutionDatabase;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::config::{ExecDatabaseConfig, ExecDatabaseKind};
use crate::domain::{Order, Position, StrategyId, TraderId};
use crate::error::{NodeError, Result};

/// Execution state restored at startup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub orders: Vec<Order>,
    pub positions: Vec<Position>,
}

impl ExecutionSnapshot {
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty() && self.positions.is_empty()
    }
}

/// Store for execution and strategy state
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionDatabase: Send + Sync {
    /// Backend name for logging
    fn kind(&self) -> &'static str;

    /// Load every persisted order and position
    async fn load_snapshot(&self) -> Result<ExecutionSnapshot>;

    async fn add_order(&self, order: &Order) -> Result<()>;

    async fn update_order(&self, order: &Order) -> Result<()>;

    async fn update_position(&self, position: &Position) -> Result<()>;

    async fn load_strategy_state(
        &self,
        strategy_id: &StrategyId,
    ) -> Result<Option<serde_json::Value>>;

    async fn update_strategy_state(
        &self,
        strategy_id: &StrategyId,
        state: &serde_json::Value,
    ) -> Result<()>;
}

/// Select the execution backend from configuration.
///
/// `redis` requires both host and port; anything else falls back to the bypass backend.
pub fn build_exec_database(
    config: &ExecDatabaseConfig,
    trader_id: &TraderId,
) -> Result<Arc<dyn ExecutionDatabase>> {
    let database: Arc<dyn ExecutionDatabase> = match config.kind() {
        ExecDatabaseKind::Redis => {
            let host = config.host.as_deref().ok_or_else(|| {
                NodeError::MissingConfig("exec_database.host (redis backend)".to_string())
            })?;
            let port = config.port.ok_or_else(|| {
                NodeError::MissingConfig("exec_database.port (redis backend)".to_string())
            })?;
            Arc::new(RedisExecutionDatabase::new(trader_id.clone(), host, port)?)
        }
        ExecDatabaseKind::Bypass => Arc::new(BypassExecutionDatabase::new(trader_id.clone())),
    };

    info!(
        "Execution database: {} (type={})",
        database.kind(),
        config.db_type
    );
    Ok(database)
}
