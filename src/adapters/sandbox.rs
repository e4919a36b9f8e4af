//! Simulated venue
//!
//! Publishes its configured instruments on connect and then reports connected.
//! No market data is generated; quotes can be pushed through the data engine.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use super::DataClient;
use crate::domain::InstrumentId;
use crate::engine::{DataMessage, DataSink, Instrument};
use crate::error::Result;

fn default_venue() -> String {
    "SIM".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_venue")]
    pub venue: String,
    #[serde(default)]
    pub instruments: Vec<String>,
}

pub struct SandboxDataClient {
    name: String,
    venue: String,
    symbols: Vec<String>,
    sink: DataSink,
    connected: AtomicBool,
}

impl SandboxDataClient {
    pub fn new(name: &str, venue: &str, symbols: Vec<String>, sink: DataSink) -> Self {
        Self {
            name: name.to_string(),
            venue: venue.to_string(),
            symbols,
            sink,
            connected: AtomicBool::new(false),
        }
    }

    pub fn from_config(name: &str, config: SandboxConfig, sink: DataSink) -> Self {
        Self::new(name, &config.venue, config.instruments, sink)
    }

    pub fn venue(&self) -> &str {
        &self.venue
    }
}

#[async_trait]
impl DataClient for SandboxDataClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        for symbol in &self.symbols {
            self.sink.send(DataMessage::Instrument(Instrument {
                id: InstrumentId::new(format!("{}.{}", symbol, self.venue)),
                venue: self.venue.clone(),
            }))?;
        }
        self.connected.store(true, Ordering::SeqCst);
        info!(
            "{} connected ({} instrument(s) on {})",
            self.name,
            self.symbols.len(),
            self.venue
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        info!("{} disconnected", self.name);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for SandboxDataClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxDataClient")
            .field("name", &self.name)
            .field("venue", &self.venue)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DataEngine, Engine};
    use crate::tasks::TaskRegistry;
    use tokio::runtime::Handle;

    #[tokio::test]
    async fn test_connect_requires_running_engine() {
        let engine = DataEngine::new(TaskRegistry::new(Handle::current()));
        let client = SandboxDataClient::new("sandbox", "SIM", vec!["BTCUSDT".into()], engine.sink());

        assert!(client.connect().await.is_err());
        assert!(!client.is_connected());

        engine.start();
        client.connect().await.unwrap();
        assert!(client.is_connected());
        client.disconnect().await.unwrap();
        assert!(!client.is_connected());
        engine.stop();
    }
}
