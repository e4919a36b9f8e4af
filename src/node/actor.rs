//! Lifecycle actor
//!
//! The only task that mutates node state or touches the trader. Requests
//! arrive over one channel and run to completion in arrival order.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::readiness::{Readiness, ReadinessCoordinator};
use super::state::{NodeState, StateCell};
use crate::clock::LiveClock;
use crate::config::NodeSettings;
use crate::engine::Engine;
use crate::trader::TraderLifecycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleRequest {
    Start,
    Stop,
    Shutdown,
    /// Exit the actor loop; sent by `dispose`
    Halt,
}

#[derive(Debug)]
pub(crate) struct LifecycleCommand {
    pub request: LifecycleRequest,
    pub reply: Option<oneshot::Sender<NodeState>>,
}

pub(crate) struct LifecycleActor {
    pub trader: Box<dyn TraderLifecycle>,
    pub data_engine: Arc<dyn Engine>,
    pub exec_engine: Arc<dyn Engine>,
    pub clock: Arc<LiveClock>,
    pub state: StateCell,
    pub readiness: ReadinessCoordinator,
    pub settings: NodeSettings,
    pub save_strategy_state: bool,
    pub commands: mpsc::UnboundedReceiver<LifecycleCommand>,
}

impl LifecycleActor {
    pub async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            debug!("Lifecycle request {:?}", command.request);
            if command.request != LifecycleRequest::Start {
                self.readiness.release();
            }
            match command.request {
                LifecycleRequest::Start => self.run_start().await,
                LifecycleRequest::Stop => self.run_stop().await,
                LifecycleRequest::Shutdown => self.run_shutdown().await,
                LifecycleRequest::Halt => {}
            }

            if let Some(reply) = command.reply {
                let _ = reply.send(self.state.get());
            }
            if command.request == LifecycleRequest::Halt {
                break;
            }
        }
        debug!("Lifecycle actor exited");
    }

    fn transition(&self, next: NodeState) -> bool {
        match self.state.transition(next) {
            Ok(_) => true,
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }

    async fn run_start(&mut self) {
        let current = self.state.get();
        match current {
            NodeState::Initialized | NodeState::Stopped => {}
            NodeState::Starting | NodeState::Running => {
                warn!("Node already state={}, start ignored", current);
                return;
            }
            _ => {
                warn!("Cannot start node from state={}", current);
                return;
            }
        }

        if !self.transition(NodeState::Starting) {
            return;
        }
        info!("state=STARTING...");

        self.data_engine.start();
        self.exec_engine.start();

        let engines = vec![self.data_engine.clone(), self.exec_engine.clone()];
        match self.readiness.wait(engines).await {
            Ok(Readiness::Ready { polls }) => debug!("Engines initialized after {} poll(s)", polls),
            Ok(Readiness::Abandoned) => {
                warn!("Startup abandoned, stop requested");
                return;
            }
            Err(e) => {
                error!("Startup failed: {}", e);
                return;
            }
        }

        self.trader.start();

        if self.transition(NodeState::Running) {
            info!("state=RUNNING.");
        }
    }

    async fn run_stop(&mut self) {
        let current = self.state.get();
        if !matches!(current, NodeState::Starting | NodeState::Running) {
            debug!("Node state={}, stop ignored", current);
            return;
        }

        if !self.transition(NodeState::Stopping) {
            return;
        }
        info!("state=STOPPING...");

        self.trader.stop();

        info!("Awaiting residual state...");
        self.settle().await;
        self.trader.check_residuals();

        if self.save_strategy_state {
            if let Err(e) = self.trader.save().await {
                error!("Failed to save strategy state: {}", e);
            }
        }

        self.data_engine.stop();
        self.exec_engine.stop();
        self.await_engines_drained().await;

        for name in self.clock.cancel_timers() {
            info!("Cancelled Timer(name={}).", name);
        }

        if self.transition(NodeState::Stopped) {
            info!("state=STOPPED.");
        }
    }

    async fn run_shutdown(&mut self) {
        match self.state.get() {
            NodeState::Starting | NodeState::Running => self.run_stop().await,
            NodeState::Disposing | NodeState::Disposed => {
                debug!("Node already disposing, shutdown ignored");
                return;
            }
            _ => {}
        }

        if !self.transition(NodeState::Disposing) {
            return;
        }
        info!("state=DISPOSING...");

        self.await_engines_drained().await;

        self.trader.dispose();
        self.data_engine.dispose();
        self.exec_engine.dispose();
    }

    /// Give working orders time to resolve; ends early once flat
    async fn settle(&mut self) {
        let deadline = Instant::now() + self.settings.residuals_timeout();
        let poll = self.settings.residuals_poll_interval();
        loop {
            if self.trader.residuals().is_flat() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }

    /// Data engine first, then execution engine
    async fn await_engines_drained(&mut self) {
        let data = self.data_engine.pending_work_handle();
        let exec = self.exec_engine.pending_work_handle();
        data.wait().await;
        exec.wait().await;
    }
}
