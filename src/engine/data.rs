//! Data Engine
//!
//! Queue-driven market-data engine. Registered data clients connect when the
//! engine starts and push `DataMessage`s through a `DataSink`; the run queue
//! applies them to the `DataCache` and fans them out to subscribers.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::queue::{DrainHandle, EngineQueue};
use super::Engine;
use crate::adapters::DataClient;
use crate::domain::InstrumentId;
use crate::error::Result;
use crate::tasks::TaskRegistry;

/// Subscriber channel capacity
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: InstrumentId,
    pub venue: String,
}

/// Top-of-book quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteTick {
    pub instrument_id: InstrumentId,
    pub bid: Decimal,
    pub ask: Decimal,
    pub ts: DateTime<Utc>,
}

impl QuoteTick {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataMessage {
    Instrument(Instrument),
    Quote(QuoteTick),
}

/// Latest instruments and quotes seen by the engine
#[derive(Debug, Default)]
pub struct DataCache {
    instruments: RwLock<HashMap<InstrumentId, Instrument>>,
    quotes: RwLock<HashMap<InstrumentId, QuoteTick>>,
}

impl DataCache {
    fn apply(&self, message: &DataMessage) {
        match message {
            DataMessage::Instrument(instrument) => {
                self.instruments
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(instrument.id.clone(), instrument.clone());
            }
            DataMessage::Quote(quote) => {
                self.quotes
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(quote.instrument_id.clone(), quote.clone());
            }
        }
    }

    pub fn instrument(&self, id: &InstrumentId) -> Option<Instrument> {
        self.instruments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// All cached instruments, ordered by id
    pub fn instruments(&self) -> Vec<Instrument> {
        let mut instruments: Vec<Instrument> = self
            .instruments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        instruments.sort_by(|a, b| a.id.cmp(&b.id));
        instruments
    }

    pub fn quote(&self, id: &InstrumentId) -> Option<QuoteTick> {
        self.quotes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn clear(&self) {
        self.instruments
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.quotes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Write side of the data engine handed to data clients
#[derive(Clone)]
pub struct DataSink {
    queue: Arc<EngineQueue<DataMessage>>,
}

impl DataSink {
    pub fn send(&self, message: DataMessage) -> Result<()> {
        self.queue.send(message)
    }
}

impl std::fmt::Debug for DataSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSink")
            .field("queue", &self.queue.name())
            .finish()
    }
}

pub struct DataEngine {
    tasks: TaskRegistry,
    queue: Arc<EngineQueue<DataMessage>>,
    clients: Mutex<Vec<Arc<dyn DataClient>>>,
    cache: Arc<DataCache>,
    publisher: broadcast::Sender<DataMessage>,
}

impl DataEngine {
    pub fn new(tasks: TaskRegistry) -> Self {
        let (publisher, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tasks,
            queue: Arc::new(EngineQueue::new("DataEngine")),
            clients: Mutex::new(Vec::new()),
            cache: Arc::new(DataCache::default()),
            publisher,
        }
    }

    pub fn register_client(&self, client: Arc<dyn DataClient>) {
        info!("Registered DataClient {}", client.name());
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(client);
    }

    pub fn client_names(&self) -> Vec<String> {
        self.clients()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    fn clients(&self) -> Vec<Arc<dyn DataClient>> {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sink for clients to publish into this engine
    pub fn sink(&self) -> DataSink {
        DataSink {
            queue: self.queue.clone(),
        }
    }

    /// Enqueue a message for processing
    pub fn process(&self, message: DataMessage) -> Result<()> {
        self.queue.send(message)
    }

    /// Receive every processed message
    pub fn subscribe(&self) -> broadcast::Receiver<DataMessage> {
        self.publisher.subscribe()
    }

    pub fn cache(&self) -> Arc<DataCache> {
        self.cache.clone()
    }

    pub fn processed(&self) -> u64 {
        self.queue.processed()
    }
}

impl Engine for DataEngine {
    fn name(&self) -> &str {
        "DataEngine"
    }

    fn start(&self) {
        let cache = self.cache.clone();
        let publisher = self.publisher.clone();
        let opened = self.queue.open(&self.tasks, move |message: DataMessage| {
            cache.apply(&message);
            // No subscribers is fine
            let _ = publisher.send(message);
            async {}
        });
        if !opened {
            warn!("DataEngine run queue not opened");
            return;
        }

        for client in self.clients() {
            let task_name = format!("{}-connect", client.name());
            self.tasks.spawn(&task_name, async move {
                client.connect().await.inspect_err(|e| {
                    error!("DataClient {} failed to connect: {}", client.name(), e);
                })
            });
        }
        debug!("DataEngine started");
    }

    fn stop(&self) {
        let clients = self.clients();
        if !clients.is_empty() {
            self.tasks.spawn("DataEngine-disconnect", async move {
                let results = join_all(clients.iter().map(|c| c.disconnect())).await;
                let mut failed = None;
                for (client, result) in clients.iter().zip(results) {
                    if let Err(e) = result {
                        error!("DataClient {} failed to disconnect: {}", client.name(), e);
                        failed = Some(e);
                    }
                }
                failed.map_or(Ok(()), Err)
            });
        }
        self.queue.close();
        debug!("DataEngine stopped");
    }

    fn dispose(&self) {
        self.queue.close();
        let clients = std::mem::take(
            &mut *self.clients.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for client in clients {
            client.dispose();
        }
        self.cache.clear();
        debug!("DataEngine disposed");
    }

    fn is_initialized(&self) -> bool {
        self.clients().iter().all(|c| c.is_connected())
    }

    fn pending_work_handle(&self) -> DrainHandle {
        self.queue.drain_handle()
    }
}

impl std::fmt::Debug for DataEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataEngine")
            .field("clients", &self.client_names())
            .field("running", &self.queue.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SandboxDataClient;
    use rust_decimal_macros::dec;
    use tokio::runtime::Handle;

    fn quote(symbol: &str) -> DataMessage {
        DataMessage::Quote(QuoteTick {
            instrument_id: InstrumentId::new(symbol),
            bid: dec!(99),
            ask: dec!(101),
            ts: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_engine_without_clients_is_initialized() {
        let engine = DataEngine::new(TaskRegistry::new(Handle::current()));
        assert!(engine.is_initialized());
        assert!(engine.pending_work_handle().is_drained());
    }

    #[tokio::test]
    async fn test_process_updates_cache_and_subscribers() {
        let engine = DataEngine::new(TaskRegistry::new(Handle::current()));
        let mut rx = engine.subscribe();

        engine.start();
        engine.process(quote("BTCUSDT.SIM")).unwrap();
        let received = rx.recv().await.unwrap();
        assert!(
            matches!(received, DataMessage::Quote(ref q) if q.instrument_id.as_str() == "BTCUSDT.SIM")
        );

        engine.stop();
        engine.pending_work_handle().wait().await;

        let cached = engine.cache().quote(&InstrumentId::new("BTCUSDT.SIM")).unwrap();
        assert_eq!(cached.mid(), dec!(100));
        assert!(engine.process(quote("BTCUSDT.SIM")).is_err());
    }

    #[tokio::test]
    async fn test_sandbox_client_becomes_initialized() {
        let engine = DataEngine::new(TaskRegistry::new(Handle::current()));
        let client = SandboxDataClient::new(
            "sandbox",
            "SIM",
            vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            engine.sink(),
        );
        engine.register_client(Arc::new(client));
        assert!(!engine.is_initialized());

        engine.start();
        while !engine.is_initialized() {
            tokio::task::yield_now().await;
        }
        engine.stop();
        engine.pending_work_handle().wait().await;

        let ids: Vec<String> = engine
            .cache()
            .instruments()
            .into_iter()
            .map(|i| i.id.to_string())
            .collect();
        assert_eq!(ids, vec!["BTCUSDT.SIM", "ETHUSDT.SIM"]);

        engine.dispose();
        assert!(engine.client_names().is_empty());
    }
}
