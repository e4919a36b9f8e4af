//! OS signal handling
//!
//! SIGINT and SIGTERM (ctrl-c off unix) request a stop followed by a shutdown.
//! Repeated signals re-submit the same requests; the actor ignores them once
//! the node is already stopping.

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::actor::LifecycleRequest;
use super::handle::NodeHandle;

pub(crate) fn spawn_signal_listener(runtime: &Handle, node: NodeHandle) -> JoinHandle<()> {
    runtime.spawn(async move {
        if let Err(e) = listen(&node).await {
            error!("Cannot setup signal handling: {}", e);
        }
    })
}

pub(crate) fn on_signal(node: &NodeHandle, signal: &str) {
    warn!("Received {}, shutting down...", signal);
    for request in [LifecycleRequest::Stop, LifecycleRequest::Shutdown] {
        if let Err(e) = node.request(request) {
            error!("{}", e);
            return;
        }
    }
}

#[cfg(unix)]
async fn listen(node: &NodeHandle) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    debug!("Signal handling installed (SIGINT, SIGTERM)");

    loop {
        let name = tokio::select! {
            Some(()) = sigint.recv() => "SIGINT",
            Some(()) = sigterm.recv() => "SIGTERM",
            else => return Ok(()),
        };
        on_signal(node, name);
    }
}

#[cfg(not(unix))]
async fn listen(node: &NodeHandle) -> std::io::Result<()> {
    debug!("Signal handling installed (ctrl-c)");
    loop {
        tokio::signal::ctrl_c().await?;
        on_signal(node, "SIGINT");
    }
}
