//! Core strategy traits and types

use std::sync::Arc;

use crate::clock::LiveClock;
use crate::domain::{StrategyId, TraderId};
use crate::engine::{DataEngine, ExecutionEngine};
use crate::error::Result;

// ============================================================================
// Strategy Context
// ============================================================================

/// Components a strategy may use while running
#[derive(Clone)]
pub struct StrategyContext {
    pub trader_id: TraderId,
    pub clock: Arc<LiveClock>,
    pub data: Arc<DataEngine>,
    pub exec: Arc<ExecutionEngine>,
}

impl std::fmt::Debug for StrategyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyContext")
            .field("trader_id", &self.trader_id)
            .finish()
    }
}

// ============================================================================
// Strategy Trait
// ============================================================================

/// Core trait that all trading strategies must implement
pub trait Strategy: Send {
    /// Unique strategy identifier
    fn id(&self) -> &StrategyId;

    /// Called once the node is running
    fn on_start(&mut self, ctx: &StrategyContext) -> Result<()>;

    /// Called when the node stops; cancel orders and flatten here
    fn on_stop(&mut self, ctx: &StrategyContext) -> Result<()>;

    fn on_dispose(&mut self) {}

    /// State to persist between runs, if any
    fn save_state(&self) -> Result<Option<serde_json::Value>> {
        Ok(None)
    }

    /// Restore state saved by a previous run
    fn load_state(&mut self, _state: serde_json::Value) -> Result<()> {
        Ok(())
    }
}
