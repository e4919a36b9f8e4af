//! Engine Contract
//!
//! Every supervised subsystem (data, execution) implements [`Engine`]. The node
//! only ever drives engines through this contract:
//! - `start` / `stop` / `dispose` are side-effecting and called from the lifecycle actor
//! - `is_initialized` is polled from the blocking pool, so it must be cheap
//! - `pending_work_handle` resolves once the run queue is empty and closed

pub mod data;
pub mod execution;
pub mod queue;

pub use data::{DataCache, DataEngine, DataMessage, DataSink, Instrument, QuoteTick};
pub use execution::{ExecutionCache, ExecutionEngine, ExecutionMessage};
pub use queue::{DrainHandle, EngineQueue};

/// Lifecycle contract of a supervised engine
pub trait Engine: Send + Sync {
    /// Component name for logging
    fn name(&self) -> &str;

    fn start(&self);

    fn stop(&self);

    fn dispose(&self);

    /// Whether every asynchronous setup step (instrument sync, cache load) has completed
    fn is_initialized(&self) -> bool;

    /// Token resolving when no queued or in-flight work remains
    fn pending_work_handle(&self) -> DrainHandle;
}
