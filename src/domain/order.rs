use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{ClientOrderId, InstrumentId, StrategyId};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order created but not yet submitted
    Initialized,
    /// Order submitted to the venue
    Submitted,
    /// Order accepted and working
    Accepted,
    /// Order partially filled
    PartiallyFilled,
    /// Order fully filled
    Filled,
    /// Order cancelled
    Cancelled,
    /// Order rejected by the venue
    Rejected,
    /// Order expired
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }

    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Initialized => "INITIALIZED",
            OrderStatus::Submitted => "SUBMITTED",
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// Order tracked by the execution engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub client_order_id: ClientOrderId,
    pub strategy_id: StrategyId,
    pub instrument_id: InstrumentId,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub filled_qty: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        strategy_id: StrategyId,
        instrument_id: InstrumentId,
        side: OrderSide,
        quantity: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            client_order_id: ClientOrderId::generate(),
            strategy_id,
            instrument_id,
            side,
            quantity,
            filled_qty: Decimal::ZERO,
            status: OrderStatus::Initialized,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn leaves_qty(&self) -> Decimal {
        (self.quantity - self.filled_qty).max(Decimal::ZERO)
    }
}

/// Net position of one strategy in one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub strategy_id: StrategyId,
    pub instrument_id: InstrumentId,
    /// Signed quantity: positive long, negative short
    pub net_qty: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Key used by caches and the durable backend
    pub fn key(&self) -> String {
        format!("{}.{}", self.strategy_id, self.instrument_id)
    }

    pub fn is_open(&self) -> bool {
        !self.net_qty.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_status_checks() {
        assert!(OrderStatus::Accepted.is_open());
        assert!(OrderStatus::PartiallyFilled.is_open());
        assert!(OrderStatus::Filled.is_terminal());
        assert!(!OrderStatus::Cancelled.is_open());
        assert_eq!(OrderStatus::PartiallyFilled.to_string(), "PARTIALLY_FILLED");
    }

    #[test]
    fn test_status_serializes_like_display() {
        for status in [OrderStatus::PartiallyFilled, OrderStatus::Submitted] {
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::Value::String(status.to_string())
            );
        }
        let parsed: OrderStatus = serde_json::from_str("\"PARTIALLY_FILLED\"").unwrap();
        assert_eq!(parsed, OrderStatus::PartiallyFilled);
    }

    #[test]
    fn test_leaves_qty() {
        let mut order = Order::new("S-1".into(), "BTCUSDT.SIM".into(), OrderSide::Buy, dec!(2));
        order.filled_qty = dec!(0.5);
        assert_eq!(order.leaves_qty(), dec!(1.5));
    }

    #[test]
    fn test_flat_position_is_closed() {
        let position = Position {
            strategy_id: "S-1".into(),
            instrument_id: "ETHUSDT.SIM".into(),
            net_qty: Decimal::ZERO,
            updated_at: Utc::now(),
        };
        assert!(!position.is_open());
        assert_eq!(position.key(), "S-1.ETHUSDT.SIM");
    }
}
