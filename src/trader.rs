//! Trader
//!
//! Owns the strategies of one trader identity and drives them through the node
//! lifecycle. Strategy state is loaded from and saved to the execution database.
//! Residual checks read the execution cache: anything still open after stopping
//! is reported, never blocks.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::domain::{Order, Position, StrategyId, TraderId};
use crate::error::{NodeError, Result};
use crate::persistence::ExecutionDatabase;
use crate::strategy::{Strategy, StrategyContext};

/// Orders and positions still open
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResidualReport {
    pub open_orders: Vec<Order>,
    pub open_positions: Vec<Position>,
}

impl ResidualReport {
    pub fn is_flat(&self) -> bool {
        self.open_orders.is_empty() && self.open_positions.is_empty()
    }
}

/// Lifecycle surface the node drives
#[async_trait]
pub trait TraderLifecycle: Send {
    fn trader_id(&self) -> &TraderId;

    fn start(&mut self);

    fn stop(&mut self);

    /// Restore strategy state from the execution database
    async fn load(&mut self) -> Result<()>;

    /// Persist strategy state to the execution database
    async fn save(&mut self) -> Result<()>;

    /// Current residuals without logging
    fn residuals(&self) -> ResidualReport;

    /// Log every residual as a warning and return them
    fn check_residuals(&self) -> ResidualReport {
        let report = self.residuals();
        for order in &report.open_orders {
            warn!(
                "Residual open order {} ({} {} {} leaves={})",
                order.client_order_id,
                order.strategy_id,
                order.side,
                order.instrument_id,
                order.leaves_qty()
            );
        }
        for position in &report.open_positions {
            warn!(
                "Residual open position {} net_qty={}",
                position.key(),
                position.net_qty
            );
        }
        report
    }

    fn dispose(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TraderState {
    Ready,
    Running,
    Stopped,
    Disposed,
}

pub struct Trader {
    trader_id: TraderId,
    strategies: Vec<Box<dyn Strategy>>,
    ctx: StrategyContext,
    database: Arc<dyn ExecutionDatabase>,
    state: TraderState,
}

impl Trader {
    /// Create a trader; strategy ids must be unique
    pub fn new(strategies: Vec<Box<dyn Strategy>>, ctx: StrategyContext) -> Result<Self> {
        let mut seen = HashSet::new();
        for strategy in &strategies {
            if !seen.insert(strategy.id().clone()) {
                return Err(NodeError::strategy(
                    strategy.id().as_str(),
                    "duplicate strategy id",
                ));
            }
        }

        info!(
            "Trader {} with {} strategy(ies)",
            ctx.trader_id,
            strategies.len()
        );
        Ok(Self {
            trader_id: ctx.trader_id.clone(),
            database: ctx.exec.database(),
            strategies,
            ctx,
            state: TraderState::Ready,
        })
    }

    pub fn strategy_ids(&self) -> Vec<StrategyId> {
        self.strategies.iter().map(|s| s.id().clone()).collect()
    }

    pub fn is_running(&self) -> bool {
        self.state == TraderState::Running
    }
}

#[async_trait]
impl TraderLifecycle for Trader {
    fn trader_id(&self) -> &TraderId {
        &self.trader_id
    }

    fn start(&mut self) {
        if matches!(self.state, TraderState::Running | TraderState::Disposed) {
            warn!("Trader {} cannot start from {:?}", self.trader_id, self.state);
            return;
        }

        for strategy in &mut self.strategies {
            match strategy.on_start(&self.ctx) {
                Ok(()) => debug!("{} started", strategy.id()),
                Err(e) => error!("{} failed to start: {}", strategy.id(), e),
            }
        }
        self.state = TraderState::Running;
    }

    fn stop(&mut self) {
        if self.state != TraderState::Running {
            debug!("Trader {} not running, nothing to stop", self.trader_id);
            return;
        }

        for strategy in &mut self.strategies {
            match strategy.on_stop(&self.ctx) {
                Ok(()) => debug!("{} stopped", strategy.id()),
                Err(e) => error!("{} failed to stop: {}", strategy.id(), e),
            }
        }
        self.state = TraderState::Stopped;
    }

    async fn load(&mut self) -> Result<()> {
        let mut saved = Vec::with_capacity(self.strategies.len());
        for id in self.strategy_ids() {
            let state = self.database.load_strategy_state(&id).await?;
            saved.push(state);
        }

        for (strategy, state) in self.strategies.iter_mut().zip(saved) {
            if let Some(state) = state {
                strategy
                    .load_state(state)
                    .map_err(|e| NodeError::strategy(strategy.id().as_str(), e))?;
                info!("Loaded state for {}", strategy.id());
            }
        }
        Ok(())
    }

    async fn save(&mut self) -> Result<()> {
        let mut states = Vec::new();
        let mut failed = 0usize;
        for strategy in &self.strategies {
            match strategy.save_state() {
                Ok(Some(state)) => states.push((strategy.id().clone(), state)),
                Ok(None) => {}
                Err(e) => {
                    failed += 1;
                    error!("{} failed to produce state: {}", strategy.id(), e);
                }
            }
        }

        for (id, state) in states {
            match self.database.update_strategy_state(&id, &state).await {
                Ok(()) => info!("Saved state for {}", id),
                Err(e) => {
                    failed += 1;
                    error!("Failed to save state for {}: {}", id, e);
                }
            }
        }

        if failed > 0 {
            return Err(NodeError::Persistence(format!(
                "{failed} strategy state(s) not saved"
            )));
        }
        Ok(())
    }

    fn residuals(&self) -> ResidualReport {
        let cache = self.ctx.exec.cache();
        let mut report = ResidualReport::default();
        for strategy in &self.strategies {
            report.open_orders.extend(cache.open_orders(Some(strategy.id())));
            report
                .open_positions
                .extend(cache.open_positions(Some(strategy.id())));
        }
        report
    }

    fn dispose(&mut self) {
        if self.state == TraderState::Disposed {
            return;
        }
        for strategy in &mut self.strategies {
            strategy.on_dispose();
        }
        self.state = TraderState::Disposed;
        debug!("Trader {} disposed", self.trader_id);
    }
}

impl std::fmt::Debug for Trader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trader")
            .field("trader_id", &self.trader_id)
            .field("strategies", &self.strategy_ids())
            .field("state", &self.state)
            .finish()
    }
}
