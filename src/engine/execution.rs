//! Execution Engine
//!
//! Keeps the execution cache (orders and positions) and persists every change
//! through the configured `ExecutionDatabase`. The cache is loaded once when the
//! node is built; the engine reports initialized only after that load.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, info, warn};

use super::queue::{DrainHandle, EngineQueue};
use super::Engine;
use crate::domain::{ClientOrderId, Order, OrderStatus, Position, StrategyId};
use crate::error::Result;
use crate::persistence::{ExecutionDatabase, ExecutionSnapshot};
use crate::tasks::TaskRegistry;

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionMessage {
    OrderSubmitted(Order),
    OrderUpdated(Order),
    PositionUpdated(Position),
}

/// Orders and positions known to this trader
#[derive(Debug, Default)]
pub struct ExecutionCache {
    orders: RwLock<HashMap<ClientOrderId, Order>>,
    positions: RwLock<HashMap<String, Position>>,
    loaded: AtomicBool,
}

impl ExecutionCache {
    fn replace(&self, snapshot: ExecutionSnapshot) {
        let mut orders = self.orders.write().unwrap_or_else(PoisonError::into_inner);
        let mut positions = self
            .positions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *orders = snapshot
            .orders
            .into_iter()
            .map(|o| (o.client_order_id.clone(), o))
            .collect();
        *positions = snapshot
            .positions
            .into_iter()
            .map(|p| (p.key(), p))
            .collect();
        self.loaded.store(true, Ordering::SeqCst);
    }

    fn put_order(&self, order: Order) {
        self.orders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(order.client_order_id.clone(), order);
    }

    fn put_position(&self, position: Position) {
        self.positions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(position.key(), position);
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn order(&self, id: &ClientOrderId) -> Option<Order> {
        self.orders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn order_count(&self) -> usize {
        self.orders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Open orders, optionally for one strategy, ordered by client order id
    pub fn open_orders(&self, strategy_id: Option<&StrategyId>) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|o| o.is_open())
            .filter(|o| strategy_id.map_or(true, |id| &o.strategy_id == id))
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.client_order_id.cmp(&b.client_order_id));
        orders
    }

    /// Open positions, optionally for one strategy, ordered by key
    pub fn open_positions(&self, strategy_id: Option<&StrategyId>) -> Vec<Position> {
        let mut positions: Vec<Position> = self
            .positions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|p| p.is_open())
            .filter(|p| strategy_id.map_or(true, |id| &p.strategy_id == id))
            .cloned()
            .collect();
        positions.sort_by_key(|p| p.key());
        positions
    }

    fn clear(&self) {
        self.orders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.positions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

pub struct ExecutionEngine {
    tasks: TaskRegistry,
    queue: EngineQueue<ExecutionMessage>,
    cache: Arc<ExecutionCache>,
    database: Arc<dyn ExecutionDatabase>,
}

impl ExecutionEngine {
    pub fn new(tasks: TaskRegistry, database: Arc<dyn ExecutionDatabase>) -> Self {
        Self {
            tasks,
            queue: EngineQueue::new("ExecEngine"),
            cache: Arc::new(ExecutionCache::default()),
            database,
        }
    }

    /// Load the persisted snapshot into the cache
    pub async fn load_cache(&self) -> Result<()> {
        let snapshot = self.database.load_snapshot().await?;
        info!(
            "Loaded {} order(s), {} position(s) from {} database",
            snapshot.orders.len(),
            snapshot.positions.len(),
            self.database.kind()
        );
        self.cache.replace(snapshot);
        Ok(())
    }

    /// Submit a new order; it is marked submitted, cached and persisted
    pub fn submit_order(&self, mut order: Order) -> Result<ClientOrderId> {
        let id = order.client_order_id.clone();
        if order.status == OrderStatus::Initialized {
            order.status = OrderStatus::Submitted;
        }
        self.queue.send(ExecutionMessage::OrderSubmitted(order))?;
        Ok(id)
    }

    pub fn process(&self, message: ExecutionMessage) -> Result<()> {
        self.queue.send(message)
    }

    pub fn cache(&self) -> Arc<ExecutionCache> {
        self.cache.clone()
    }

    pub fn database(&self) -> Arc<dyn ExecutionDatabase> {
        self.database.clone()
    }

    pub fn processed(&self) -> u64 {
        self.queue.processed()
    }
}

async fn apply(
    cache: &ExecutionCache,
    database: &dyn ExecutionDatabase,
    message: ExecutionMessage,
) -> Result<()> {
    match message {
        ExecutionMessage::OrderSubmitted(order) => {
            database.add_order(&order).await?;
            cache.put_order(order);
        }
        ExecutionMessage::OrderUpdated(order) => {
            database.update_order(&order).await?;
            cache.put_order(order);
        }
        ExecutionMessage::PositionUpdated(position) => {
            database.update_position(&position).await?;
            cache.put_position(position);
        }
    }
    Ok(())
}

impl Engine for ExecutionEngine {
    fn name(&self) -> &str {
        "ExecEngine"
    }

    fn start(&self) {
        let cache = self.cache.clone();
        let database = self.database.clone();
        let opened = self.queue.open(&self.tasks, move |message| {
            let cache = cache.clone();
            let database = database.clone();
            async move {
                if let Err(e) = apply(&cache, database.as_ref(), message).await {
                    error!("ExecEngine failed to persist execution state: {}", e);
                }
            }
        });
        if !opened {
            warn!("ExecEngine run queue not opened");
            return;
        }
        debug!("ExecEngine started");
    }

    fn stop(&self) {
        self.queue.close();
        debug!("ExecEngine stopped");
    }

    fn dispose(&self) {
        self.queue.close();
        self.cache.clear();
        debug!("ExecEngine disposed");
    }

    fn is_initialized(&self) -> bool {
        self.cache.is_loaded()
    }

    fn pending_work_handle(&self) -> DrainHandle {
        self.queue.drain_handle()
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("database", &self.database.kind())
            .field("orders", &self.cache.order_count())
            .field("running", &self.queue.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InstrumentId, OrderSide, TraderId};
    use crate::persistence::{BypassExecutionDatabase, MockExecutionDatabase};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tokio::runtime::Handle;

    fn order(strategy: &str) -> Order {
        Order::new(
            StrategyId::new(strategy),
            InstrumentId::new("BTCUSDT.SIM"),
            OrderSide::Buy,
            dec!(1),
        )
    }

    #[tokio::test]
    async fn test_not_initialized_until_cache_loaded() {
        let database = Arc::new(BypassExecutionDatabase::new(TraderId::new("TESTER", "001")));
        let engine = ExecutionEngine::new(TaskRegistry::new(Handle::current()), database);

        assert!(!engine.is_initialized());
        engine.load_cache().await.unwrap();
        assert!(engine.is_initialized());
    }

    #[tokio::test]
    async fn test_load_cache_restores_snapshot() {
        let mut filled = order("S-1");
        filled.status = OrderStatus::Filled;
        let working = order("S-1");
        let snapshot = ExecutionSnapshot {
            orders: vec![filled, working.clone()],
            positions: vec![Position {
                strategy_id: StrategyId::new("S-1"),
                instrument_id: InstrumentId::new("BTCUSDT.SIM"),
                net_qty: dec!(-2),
                updated_at: Utc::now(),
            }],
        };

        let mut database = MockExecutionDatabase::new();
        database
            .expect_load_snapshot()
            .times(1)
            .returning(move || Ok(snapshot.clone()));
        database.expect_kind().return_const("mock");

        let engine = ExecutionEngine::new(TaskRegistry::new(Handle::current()), Arc::new(database));
        engine.load_cache().await.unwrap();

        let cache = engine.cache();
        assert_eq!(cache.order_count(), 2);
        assert_eq!(cache.open_orders(None), vec![working]);
        assert_eq!(cache.open_positions(Some(&StrategyId::new("S-1"))).len(), 1);
        assert!(cache.open_positions(Some(&StrategyId::new("S-2"))).is_empty());
    }

    #[tokio::test]
    async fn test_submitted_orders_are_persisted() {
        let mut database = MockExecutionDatabase::new();
        database
            .expect_add_order()
            .withf(|o| o.status == OrderStatus::Submitted)
            .times(1)
            .returning(|_| Ok(()));

        let engine = ExecutionEngine::new(TaskRegistry::new(Handle::current()), Arc::new(database));
        engine.start();
        let id = engine.submit_order(order("S-1")).unwrap();
        engine.stop();
        engine.pending_work_handle().wait().await;

        let cached = engine.cache().order(&id).unwrap();
        assert_eq!(cached.status, OrderStatus::Submitted);
        assert_eq!(engine.processed(), 1);
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_cache_unchanged() {
        let mut database = MockExecutionDatabase::new();
        database
            .expect_update_position()
            .returning(|_| Err(crate::error::NodeError::Persistence("down".to_string())));

        let engine = ExecutionEngine::new(TaskRegistry::new(Handle::current()), Arc::new(database));
        engine.start();
        engine
            .process(ExecutionMessage::PositionUpdated(Position {
                strategy_id: StrategyId::new("S-1"),
                instrument_id: InstrumentId::new("BTCUSDT.SIM"),
                net_qty: dec!(1),
                updated_at: Utc::now(),
            }))
            .unwrap();
        engine.stop();
        engine.pending_work_handle().wait().await;

        assert!(engine.cache().open_positions(None).is_empty());
    }
}
