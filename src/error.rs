use thiserror::Error;

/// Main error type for the trading node
#[derive(Error, Debug)]
pub enum NodeError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Persistence errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("MessagePack encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Runtime errors
    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Lifecycle actor unavailable: {0}")]
    ActorUnavailable(String),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Component errors
    #[error("Engine error: {engine} - {reason}")]
    Engine { engine: String, reason: String },

    #[error("Strategy error: {strategy_id} - {reason}")]
    Strategy { strategy_id: String, reason: String },

    #[error("Data client error: {client} - {reason}")]
    DataClient { client: String, reason: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for NodeError
pub type Result<T> = std::result::Result<T, NodeError>;

impl NodeError {
    /// Build a strategy error from any displayable reason
    pub fn strategy(strategy_id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        NodeError::Strategy {
            strategy_id: strategy_id.into(),
            reason: reason.to_string(),
        }
    }

    /// Build an engine error from any displayable reason
    pub fn engine(engine: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        NodeError::Engine {
            engine: engine.into(),
            reason: reason.to_string(),
        }
    }
}
