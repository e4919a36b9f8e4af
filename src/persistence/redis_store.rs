//! Durable execution backend on Redis
//!
//! Keys are namespaced per trader (`Trader-<name>-<tag>:`) and values are
//! MessagePack-encoded. The connection is opened lazily on first use.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{ExecutionDatabase, ExecutionSnapshot};
use crate::domain::{Order, Position, StrategyId, TraderId};
use crate::error::Result;

const ORDERS: &str = "Orders";
const POSITIONS: &str = "Positions";
const STRATEGIES: &str = "Strategies";

pub struct RedisExecutionDatabase {
    trader_id: TraderId,
    key_prefix: String,
    client: redis::Client,
    connection: OnceCell<MultiplexedConnection>,
}

impl RedisExecutionDatabase {
    /// Create the backend; no connection is made until the first command
    pub fn new(trader_id: TraderId, host: &str, port: u16) -> Result<Self> {
        let client = redis::Client::open(format!("redis://{host}:{port}/"))?;
        let key_prefix = format!("Trader-{}", trader_id.value());

        Ok(Self {
            trader_id,
            key_prefix,
            client,
            connection: OnceCell::new(),
        })
    }

    pub fn trader_id(&self) -> &TraderId {
        &self.trader_id
    }

    fn key(&self, collection: &str, id: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, collection, id)
    }

    fn pattern(&self, collection: &str) -> String {
        format!("{}:{}:*", self.key_prefix, collection)
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                let connection = self.client.get_multiplexed_async_connection().await?;
                info!("Connected to redis for {}", self.trader_id);
                Ok::<_, redis::RedisError>(connection)
            })
            .await?;
        Ok(connection.clone())
    }

    async fn write<T: Serialize + Sync>(&self, key: String, value: &T) -> Result<()> {
        let bytes = rmp_serde::to_vec_named(value)?;
        let mut connection = self.connection().await?;
        connection.set::<_, _, ()>(&key, bytes).await?;
        debug!("Wrote {}", key);
        Ok(())
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut connection = self.connection().await?;
        let bytes: Option<Vec<u8>> = connection.get(key).await?;
        match bytes {
            Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn read_all<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        let mut connection = self.connection().await?;
        let mut keys: Vec<String> = connection.keys(self.pattern(collection)).await?;
        keys.sort();

        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.read(&key).await? {
                values.push(value);
            }
        }
        Ok(values)
    }
}

impl std::fmt::Debug for RedisExecutionDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisExecutionDatabase")
            .field("trader_id", &self.trader_id)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

#[async_trait]
impl ExecutionDatabase for RedisExecutionDatabase {
    fn kind(&self) -> &'static str {
        "redis"
    }

    async fn load_snapshot(&self) -> Result<ExecutionSnapshot> {
        let orders: Vec<Order> = self.read_all(ORDERS).await?;
        let positions: Vec<Position> = self.read_all(POSITIONS).await?;
        Ok(ExecutionSnapshot { orders, positions })
    }

    async fn add_order(&self, order: &Order) -> Result<()> {
        self.write(self.key(ORDERS, order.client_order_id.as_str()), order)
            .await
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        self.write(self.key(ORDERS, order.client_order_id.as_str()), order)
            .await
    }

    async fn update_position(&self, position: &Position) -> Result<()> {
        self.write(self.key(POSITIONS, &position.key()), position)
            .await
    }

    async fn load_strategy_state(
        &self,
        strategy_id: &StrategyId,
    ) -> Result<Option<serde_json::Value>> {
        self.read(&self.key(STRATEGIES, strategy_id.as_str())).await
    }

    async fn update_strategy_state(
        &self,
        strategy_id: &StrategyId,
        state: &serde_json::Value,
    ) -> Result<()> {
        self.write(self.key(STRATEGIES, strategy_id.as_str()), state)
            .await
    }
}
