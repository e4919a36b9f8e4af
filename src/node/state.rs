use std::sync::Arc;
use tokio::sync::watch;

use crate::error::{NodeError, Result};

/// Lifecycle state of a trading node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    Initialized,
    Starting,
    Running,
    Stopping,
    Stopped,
    Disposing,
    Disposed,
}

impl NodeState {
    /// Allowed edges: the forward chain, restart from STOPPED, and the
    /// skips where nothing ran (INITIALIZED -> DISPOSING, STARTING -> STOPPING)
    pub fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, next),
            (Initialized, Starting)
                | (Initialized, Disposing)
                | (Starting, Running)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Stopping, Stopped)
                | (Stopped, Starting)
                | (Stopped, Disposing)
                | (Disposing, Disposed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == NodeState::Disposed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeState::Initialized => "INITIALIZED",
            NodeState::Starting => "STARTING",
            NodeState::Running => "RUNNING",
            NodeState::Stopping => "STOPPING",
            NodeState::Stopped => "STOPPED",
            NodeState::Disposing => "DISPOSING",
            NodeState::Disposed => "DISPOSED",
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, observable node state
#[derive(Debug, Clone)]
pub struct StateCell {
    tx: Arc<watch::Sender<NodeState>>,
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(NodeState::Initialized);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> NodeState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<NodeState> {
        self.tx.subscribe()
    }

    /// Move to `next` if the edge is allowed
    pub fn transition(&self, next: NodeState) -> Result<NodeState> {
        let mut result = Ok(next);
        self.tx.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                result = Err(NodeError::InvalidStateTransition {
                    from: current.to_string(),
                    to: next.to_string(),
                });
                false
            }
        });
        result
    }

    /// Unconditional move, used once the lifecycle actor is gone
    pub(crate) fn force(&self, next: NodeState) {
        self.tx.send_replace(next);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
