use async_trait::async_trait;
use tracing::debug;

use super::{ExecutionDatabase, ExecutionSnapshot};
use crate::domain::{Order, Position, StrategyId, TraderId};
use crate::error::Result;

/// Ephemeral backend: accepts every write and restores nothing
#[derive(Debug, Clone)]
pub struct BypassExecutionDatabase {
    trader_id: TraderId,
}

impl BypassExecutionDatabase {
    pub fn new(trader_id: TraderId) -> Self {
        debug!("Bypass execution database for {}", trader_id);
        Self { trader_id }
    }

    pub fn trader_id(&self) -> &TraderId {
        &self.trader_id
    }
}

#[async_trait]
impl ExecutionDatabase for BypassExecutionDatabase {
    fn kind(&self) -> &'static str {
        "bypass"
    }

    async fn load_snapshot(&self) -> Result<ExecutionSnapshot> {
        Ok(ExecutionSnapshot::default())
    }

    async fn add_order(&self, _order: &Order) -> Result<()> {
        Ok(())
    }

    async fn update_order(&self, _order: &Order) -> Result<()> {
        Ok(())
    }

    async fn update_position(&self, _position: &Position) -> Result<()> {
        Ok(())
    }

    async fn load_strategy_state(
        &self,
        _strategy_id: &StrategyId,
    ) -> Result<Option<serde_json::Value>> {
        Ok(None)
    }

    async fn update_strategy_state(
        &self,
        _strategy_id: &StrategyId,
        _state: &serde_json::Value,
    ) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InstrumentId, OrderSide};
    use rust_decimal_macros::dec;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_bypass_restores_nothing() {
        let database = BypassExecutionDatabase::new(TraderId::new("TESTER", "001"));
        let order = Order::new(
            StrategyId::new("S-1"),
            InstrumentId::new("BTCUSDT.SIM"),
            OrderSide::Buy,
            dec!(1),
        );

        assert_ok!(database.add_order(&order).await);
        assert_ok!(
            database
                .update_strategy_state(&StrategyId::new("S-1"), &serde_json::json!({"n": 1}))
                .await
        );

        assert!(database.load_snapshot().await.unwrap().is_empty());
        assert!(database
            .load_strategy_state(&StrategyId::new("S-1"))
            .await
            .unwrap()
            .is_none());
    }
}
