//! Trading Node
//!
//! Owns the runtime and every subsystem of one live trader:
//! - builds clock, engines, execution database, data clients and trader
//! - serializes lifecycle requests through a single actor task
//! - drives start/stop/shutdown either blocking (outside any runtime) or
//!   scheduled (from async code, the request is queued and the call returns)
//! - when embedded in a foreign runtime, keeps a driver thread running a
//!   current-thread node runtime so scheduled requests make progress
//! - on dispose, halts the actor, cancels every tracked task and shuts the
//!   runtime down

pub mod actor;
mod handle;
pub mod readiness;
mod signals;
pub mod state;

pub use actor::LifecycleRequest;
pub use handle::NodeHandle;
pub use readiness::{Readiness, ReadinessCoordinator};
pub use state::{NodeState, StateCell};

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime, RuntimeFlavor};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use self::actor::LifecycleActor;
use crate::adapters::{create_data_client, KNOWN_DATA_CLIENTS};
use crate::clock::LiveClock;
use crate::config::{NodeConfig, NodeSettings, SchedulerKind};
use crate::domain::TraderId;
use crate::engine::{DataEngine, Engine, ExecutionEngine};
use crate::error::{NodeError, Result};
use crate::persistence::build_exec_database;
use crate::strategy::{Strategy, StrategyContext};
use crate::tasks::{ExceptionHandler, LoggingExceptionHandler, TaskRegistry};
use crate::trader::{Trader, TraderLifecycle};

/// How long the runtime gets to wind down its remaining tasks on dispose
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Build the node runtime from settings
pub fn build_runtime(settings: &NodeSettings) -> Result<Runtime> {
    let mut builder = match settings.scheduler {
        SchedulerKind::CurrentThread => Builder::new_current_thread(),
        SchedulerKind::MultiThread => Builder::new_multi_thread(),
    };
    builder
        .enable_all()
        .max_blocking_threads(settings.max_blocking_threads.max(1))
        .thread_name("livenode")
        .build()
        .map_err(|e| NodeError::Runtime(format!("failed to build runtime: {e}")))
}

/// Drive `future` on `runtime`, from a helper thread when the caller is
/// already inside some runtime
fn drive<F>(runtime: &Runtime, future: F) -> F::Output
where
    F: Future + Send,
    F::Output: Send,
{
    if Handle::try_current().is_err() {
        return runtime.block_on(future);
    }
    std::thread::scope(|scope| {
        scope
            .spawn(|| runtime.block_on(future))
            .join()
            .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
    })
}

/// Where a lifecycle call comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Caller {
    /// Plain thread, no runtime entered
    Blocking,
    /// Code running on the node runtime itself
    NodeRuntime,
    /// Some other runtime embedding the node
    Foreign,
}

/// Thread that keeps a current-thread node runtime turning while the node is
/// driven from a foreign runtime
struct RuntimeDriver {
    stop: Option<oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl RuntimeDriver {
    fn spawn(runtime: Arc<Runtime>) -> std::io::Result<Self> {
        let (stop, stopped) = oneshot::channel::<()>();
        let thread = std::thread::Builder::new()
            .name("livenode-driver".to_string())
            .spawn(move || {
                let _ = runtime.block_on(stopped);
                debug!("Runtime driver exited");
            })?;
        Ok(Self {
            stop: Some(stop),
            thread: Some(thread),
        })
    }

    /// Stop driving and wait for the thread to release the runtime
    fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.thread().id() == std::thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            error!("Runtime driver thread panicked");
        }
    }
}

/// Components a node is assembled from
pub struct NodeParts {
    pub trader_id: TraderId,
    pub runtime: Runtime,
    pub clock: Arc<LiveClock>,
    pub tasks: TaskRegistry,
    pub data_engine: Arc<dyn Engine>,
    pub exec_engine: Arc<dyn Engine>,
    pub trader: Box<dyn TraderLifecycle>,
    pub settings: NodeSettings,
    pub save_strategy_state: bool,
}

pub struct TradingNode {
    trader_id: TraderId,
    runtime: Mutex<Option<Arc<Runtime>>>,
    runtime_handle: Handle,
    node: NodeHandle,
    state: StateCell,
    tasks: TaskRegistry,
    clock: Arc<LiveClock>,
    actor: Mutex<Option<JoinHandle<()>>>,
    driver: Mutex<Option<RuntimeDriver>>,
    signals: Mutex<Option<JoinHandle<()>>>,
    exception_handler: Arc<dyn ExceptionHandler>,
    settings: NodeSettings,
    disposed: AtomicBool,
    data_engine: Option<Arc<DataEngine>>,
    exec_engine: Option<Arc<ExecutionEngine>>,
}

impl TradingNode {
    /// Build a node from configuration.
    ///
    /// Loads the execution cache and, when `strategy.load_state` is set, the
    /// saved strategy state before returning.
    pub fn new(strategies: Vec<Box<dyn Strategy>>, config: NodeConfig) -> Result<Self> {
        let trader_id = TraderId::new(&config.trader.name, &config.trader.id_tag);
        let database = build_exec_database(&config.exec_database, &trader_id)?;
        config
            .validate()
            .map_err(|errors| NodeError::InvalidConfig(errors.join("; ")))?;

        let runtime = build_runtime(&config.node)?;

        info!("=================================================================");
        info!(" LIVE NODE {}", trader_id);
        info!("=================================================================");
        info!("Building...");

        let tasks = TaskRegistry::new(runtime.handle().clone());
        let clock = Arc::new(LiveClock::new(tasks.clone()));
        let data_engine = Arc::new(DataEngine::new(tasks.clone()));
        let exec_engine = Arc::new(ExecutionEngine::new(tasks.clone(), database));

        drive(&runtime, exec_engine.load_cache())?;
        setup_data_clients(&data_engine, &config)?;

        let ctx = StrategyContext {
            trader_id: trader_id.clone(),
            clock: clock.clone(),
            data: data_engine.clone(),
            exec: exec_engine.clone(),
        };
        let mut trader = Trader::new(strategies, ctx)?;
        if config.strategy.load_state {
            drive(&runtime, trader.load())?;
        }

        let mut node = Self::from_parts(NodeParts {
            trader_id,
            runtime,
            clock,
            tasks,
            data_engine: data_engine.clone(),
            exec_engine: exec_engine.clone(),
            trader: Box::new(trader),
            settings: config.node.clone(),
            save_strategy_state: config.strategy.save_state,
        });
        node.data_engine = Some(data_engine);
        node.exec_engine = Some(exec_engine);
        Ok(node)
    }

    /// Assemble a node from prebuilt components and start its lifecycle actor
    pub fn from_parts(parts: NodeParts) -> Self {
        let runtime_handle = parts.runtime.handle().clone();
        let state = StateCell::new();
        let readiness = ReadinessCoordinator::new(parts.settings.readiness_poll_interval());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let node = NodeHandle::new(
            commands_tx,
            state.clone(),
            readiness.abandon_counter(),
            parts.tasks.clone(),
            parts.data_engine.clone(),
            parts.exec_engine.clone(),
        );

        let actor = LifecycleActor {
            trader: parts.trader,
            data_engine: parts.data_engine,
            exec_engine: parts.exec_engine,
            clock: parts.clock.clone(),
            state: state.clone(),
            readiness,
            settings: parts.settings.clone(),
            save_strategy_state: parts.save_strategy_state,
            commands: commands_rx,
        };
        let actor = runtime_handle.spawn(actor.run());

        let signals = parts
            .settings
            .handle_signals
            .then(|| signals::spawn_signal_listener(&runtime_handle, node.clone()));

        info!("state={}.", NodeState::Initialized);

        Self {
            trader_id: parts.trader_id,
            runtime: Mutex::new(Some(Arc::new(parts.runtime))),
            runtime_handle,
            node,
            state,
            tasks: parts.tasks,
            clock: parts.clock,
            actor: Mutex::new(Some(actor)),
            driver: Mutex::new(None),
            signals: Mutex::new(signals),
            exception_handler: Arc::new(LoggingExceptionHandler),
            settings: parts.settings,
            disposed: AtomicBool::new(false),
            data_engine: None,
            exec_engine: None,
        }
    }

    /// Replace the handler that receives task failures during dispose
    pub fn with_exception_handler(mut self, handler: Arc<dyn ExceptionHandler>) -> Self {
        self.exception_handler = handler;
        self
    }

    pub fn trader_id(&self) -> &TraderId {
        &self.trader_id
    }

    pub fn state(&self) -> NodeState {
        self.state.get()
    }

    /// Handle of the node runtime
    pub fn runtime_handle(&self) -> Handle {
        self.runtime_handle.clone()
    }

    /// Async handle for use inside the runtime
    pub fn handle(&self) -> NodeHandle {
        self.node.clone()
    }

    pub fn clock(&self) -> Arc<LiveClock> {
        self.clock.clone()
    }

    pub fn data_engine(&self) -> Option<Arc<DataEngine>> {
        self.data_engine.clone()
    }

    pub fn exec_engine(&self) -> Option<Arc<ExecutionEngine>> {
        self.exec_engine.clone()
    }

    pub fn pending_tasks(&self) -> Vec<String> {
        self.tasks.pending_names()
    }

    fn caller(&self) -> Caller {
        match Handle::try_current() {
            Err(_) => Caller::Blocking,
            Ok(current) if current.id() == self.runtime_handle.id() => Caller::NodeRuntime,
            Ok(_) => Caller::Foreign,
        }
    }

    /// Make sure something drives the node runtime for a foreign caller.
    ///
    /// Multi-thread runtimes run on their own workers; a current-thread
    /// runtime gets a dedicated driver thread.
    fn ensure_driven(&self) {
        if self.runtime_handle.runtime_flavor() != RuntimeFlavor::CurrentThread {
            return;
        }
        let mut driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        if driver.is_some() {
            return;
        }
        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(runtime) = runtime else {
            return;
        };
        match RuntimeDriver::spawn(runtime) {
            Ok(spawned) => {
                debug!("Driving node runtime from a dedicated thread");
                *driver = Some(spawned);
            }
            Err(e) => error!("Failed to spawn runtime driver: {}", e),
        }
    }

    /// Drive `future` to completion on the node runtime.
    ///
    /// Returns `None` once the node is disposed, or when called from async
    /// code (use [`TradingNode::handle`] there).
    pub fn block_on<F: Future>(&self, future: F) -> Option<F::Output> {
        if Handle::try_current().is_ok() {
            error!("block_on called from async context, use the node handle instead");
            return None;
        }
        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()?;
        Some(runtime.block_on(future))
    }

    /// Start the node.
    ///
    /// Outside a runtime this blocks until the node has run and stopped again;
    /// from async code the request is queued and the call returns.
    pub fn start(&self) {
        if self.caller() != Caller::Blocking {
            self.schedule(LifecycleRequest::Start);
            return;
        }

        let node = self.node.clone();
        let outcome = self.block_on(async move {
            let state = node.start().await?;
            if state == NodeState::Running {
                node.wait_until_stopped().await;
            }
            Ok::<_, NodeError>(node.state())
        });
        self.report(LifecycleRequest::Start, outcome);
    }

    /// Stop the node; blocking or scheduled like [`TradingNode::start`]
    pub fn stop(&self) {
        self.drive_request(LifecycleRequest::Stop);
    }

    /// Stop (if running) and dispose the engines and trader
    pub fn shutdown(&self) {
        self.drive_request(LifecycleRequest::Shutdown);
    }

    fn drive_request(&self, request: LifecycleRequest) {
        if self.caller() != Caller::Blocking {
            self.schedule(request);
            return;
        }
        let node = self.node.clone();
        let outcome = self.block_on(async move { node.call(request).await });
        self.report(request, outcome);
    }

    fn schedule(&self, request: LifecycleRequest) {
        if self.caller() == Caller::Foreign {
            self.ensure_driven();
        }
        if let Err(e) = self.node.request(request) {
            error!("{}", e);
        }
    }

    fn report(&self, request: LifecycleRequest, outcome: Option<Result<NodeState>>) {
        match outcome {
            Some(Ok(state)) => debug!("{:?} finished, state={}", request, state),
            Some(Err(e)) => error!("{:?} failed: {}", request, e),
            None => warn!("{:?} ignored, node runtime is gone", request),
        }
    }

    /// Release every resource of the node. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            debug!("Node already disposed");
            return;
        }

        let signals = self
            .signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let actor = self
            .actor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let teardown = teardown(
            self.node.clone(),
            self.tasks.clone(),
            signals,
            actor,
            self.settings.dispose_grace(),
            self.exception_handler.clone(),
            self.state.clone(),
        );

        let caller = self.caller();
        if caller == Caller::NodeRuntime {
            warn!("Cannot close running runtime.");
            self.runtime_handle.spawn(teardown);
            return;
        }

        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(runtime) = runtime else {
            return;
        };
        let driver = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match caller {
            Caller::Foreign => std::thread::scope(|scope| {
                scope.spawn(move || close_runtime(runtime, driver, teardown));
            }),
            _ => close_runtime(runtime, driver, teardown),
        }
    }
}

/// Run `teardown` to completion, release the driver and shut the runtime down.
/// Must be called outside any runtime context.
fn close_runtime<F: Future<Output = ()>>(
    runtime: Arc<Runtime>,
    driver: Option<RuntimeDriver>,
    teardown: F,
) {
    runtime.block_on(teardown);
    if let Some(driver) = driver {
        driver.stop();
    }
    match Arc::try_unwrap(runtime) {
        Ok(runtime) => runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT),
        Err(_) => warn!("Runtime still in use, leaving shutdown to its last owner"),
    }
}

async fn teardown(
    node: NodeHandle,
    tasks: TaskRegistry,
    signals: Option<JoinHandle<()>>,
    actor: Option<JoinHandle<()>>,
    grace: Duration,
    handler: Arc<dyn ExceptionHandler>,
    state: StateCell,
) {
    if let Some(signals) = signals {
        signals.abort();
    }

    match tokio::time::timeout(grace, node.call(LifecycleRequest::Halt)).await {
        Ok(Ok(state)) => debug!("Lifecycle actor halted at state={}", state),
        Ok(Err(e)) => debug!("{}", e),
        Err(_) => warn!("Lifecycle actor did not halt within {:?}, aborting", grace),
    }
    if let Some(actor) = actor {
        actor.abort();
        let _ = actor.await;
    }

    let report = tasks.cancel_all(handler.as_ref()).await;
    debug!("Disposed tasks: {:?}", report);

    state.force(NodeState::Disposed);
    info!("state={}.", NodeState::Disposed);
}

fn setup_data_clients(engine: &DataEngine, config: &NodeConfig) -> Result<()> {
    for (name, client_config) in &config.data_clients {
        match create_data_client(name, client_config, engine.sink()) {
            Some(client) => engine.register_client(client?),
            None => error!(
                "No DataClient for `{}`. Known clients: {}",
                name,
                KNOWN_DATA_CLIENTS.join(", ")
            ),
        }
    }
    Ok(())
}

impl Drop for TradingNode {
    fn drop(&mut self) {
        if let Some(driver) = self
            .driver
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            driver.stop();
        }
        let runtime = self
            .runtime
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Ok(runtime)) = runtime.map(Arc::try_unwrap) {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for TradingNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradingNode")
            .field("trader_id", &self.trader_id)
            .field("state", &self.state.get())
            .field("tasks", &self.tasks)
            .finish()
    }
}
