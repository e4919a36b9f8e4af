use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;

use super::actor::{LifecycleCommand, LifecycleRequest};
use super::readiness::release;
use super::state::{NodeState, StateCell};
use crate::engine::Engine;
use crate::error::{NodeError, Result};
use crate::tasks::TaskRegistry;

/// Cloneable, `Send` handle for driving a node from async code
#[derive(Clone)]
pub struct NodeHandle {
    commands: mpsc::UnboundedSender<LifecycleCommand>,
    state: StateCell,
    startup_abandon: Arc<AtomicUsize>,
    tasks: TaskRegistry,
    data_engine: Arc<dyn Engine>,
    exec_engine: Arc<dyn Engine>,
}

impl NodeHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<LifecycleCommand>,
        state: StateCell,
        startup_abandon: Arc<AtomicUsize>,
        tasks: TaskRegistry,
        data_engine: Arc<dyn Engine>,
        exec_engine: Arc<dyn Engine>,
    ) -> Self {
        Self {
            commands,
            state,
            startup_abandon,
            tasks,
            data_engine,
            exec_engine,
        }
    }

    fn submit(
        &self,
        request: LifecycleRequest,
        reply: Option<oneshot::Sender<NodeState>>,
    ) -> Result<()> {
        // A pending readiness wait gives up while anything but a start is queued
        let abandons = request != LifecycleRequest::Start;
        if abandons {
            self.startup_abandon.fetch_add(1, Ordering::SeqCst);
        }
        self.commands
            .send(LifecycleCommand { request, reply })
            .map_err(|_| {
                if abandons {
                    release(&self.startup_abandon);
                }
                NodeError::ActorUnavailable(format!("{request:?} request not delivered"))
            })
    }

    /// Queue a request without waiting for it
    pub fn request(&self, request: LifecycleRequest) -> Result<()> {
        self.submit(request, None)
    }

    /// Queue a request and wait until the actor has processed it
    pub async fn call(&self, request: LifecycleRequest) -> Result<NodeState> {
        let (tx, rx) = oneshot::channel();
        self.submit(request, Some(tx))?;
        rx.await.map_err(|_| {
            NodeError::ActorUnavailable(format!("actor exited before completing {request:?}"))
        })
    }

    pub async fn start(&self) -> Result<NodeState> {
        self.call(LifecycleRequest::Start).await
    }

    pub async fn stop(&self) -> Result<NodeState> {
        self.call(LifecycleRequest::Stop).await
    }

    pub async fn shutdown(&self) -> Result<NodeState> {
        self.call(LifecycleRequest::Shutdown).await
    }

    pub fn state(&self) -> NodeState {
        self.state.get()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<NodeState> {
        self.state.subscribe()
    }

    /// Idle point of a running node: both engines drained and the node out of
    /// RUNNING/STOPPING
    pub async fn wait_until_stopped(&self) {
        self.data_engine.pending_work_handle().wait().await;
        self.exec_engine.pending_work_handle().wait().await;

        let mut rx = self.state.subscribe();
        let _ = rx
            .wait_for(|s| !matches!(s, NodeState::Running | NodeState::Stopping))
            .await;
    }

    /// Spawn a task tracked by the node; it is cancelled on dispose
    pub fn spawn<F>(&self, name: &str, future: F) -> Option<AbortHandle>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.spawn(name, future)
    }

    pub fn pending_tasks(&self) -> Vec<String> {
        self.tasks.pending_names()
    }
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("state", &self.state.get())
            .finish()
    }
}
