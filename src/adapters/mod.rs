//! Data client adapters
//!
//! A data client is configured by name under `data_clients.<name>`. Only names
//! in [`KNOWN_DATA_CLIENTS`] can be built; the node logs and skips the rest.

pub mod sandbox;

pub use sandbox::{SandboxConfig, SandboxDataClient};

use async_trait::async_trait;
use std::sync::Arc;

use crate::engine::DataSink;
use crate::error::{NodeError, Result};

/// Adapter names this build can construct
pub const KNOWN_DATA_CLIENTS: &[&str] = &["sandbox"];

/// Market data connection owned by the data engine
#[async_trait]
pub trait DataClient: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Release any remaining resources
    fn dispose(&self) {}
}

/// Build a data client by adapter name.
///
/// Returns `None` for unknown names; a known adapter with a bad config is an error.
pub fn create_data_client(
    name: &str,
    config: &serde_json::Value,
    sink: DataSink,
) -> Option<Result<Arc<dyn DataClient>>> {
    match name {
        "sandbox" => Some(
            serde_json::from_value::<SandboxConfig>(config.clone())
                .map_err(|e| NodeError::DataClient {
                    client: name.to_string(),
                    reason: e.to_string(),
                })
                .map(|config| {
                    Arc::new(SandboxDataClient::from_config(name, config, sink))
                        as Arc<dyn DataClient>
                }),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DataEngine;
    use crate::tasks::TaskRegistry;
    use serde_json::json;
    use tokio::runtime::Handle;

    #[tokio::test]
    async fn test_create_known_and_unknown_clients() {
        let engine = DataEngine::new(TaskRegistry::new(Handle::current()));

        let client = create_data_client("sandbox", &json!({"venue": "SIM"}), engine.sink())
            .unwrap()
            .unwrap();
        assert_eq!(client.name(), "sandbox");
        assert!(!client.is_connected());

        assert!(create_data_client("binance", &json!({}), engine.sink()).is_none());
    }

    #[tokio::test]
    async fn test_bad_sandbox_config_is_an_error() {
        let engine = DataEngine::new(TaskRegistry::new(Handle::current()));
        let result =
            create_data_client("sandbox", &json!({"instruments": "BTCUSDT"}), engine.sink())
                .unwrap();
        assert!(matches!(result, Err(NodeError::DataClient { .. })));
    }
}
