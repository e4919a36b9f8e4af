//! Engine run queue
//!
//! One consumer task per `open`, tracked in the node task registry. `close`
//! drops the sender, so the consumer finishes whatever is queued and exits;
//! the drain token flips when it does (or when the task is aborted).

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::error::{NodeError, Result};
use crate::tasks::TaskRegistry;

/// Awaitable token for "queue drained and closed"
#[derive(Debug, Clone)]
pub struct DrainHandle {
    rx: watch::Receiver<bool>,
}

impl DrainHandle {
    /// A token that is already drained
    pub fn drained() -> Self {
        let (_tx, rx) = watch::channel(true);
        Self { rx }
    }

    pub fn is_drained(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until drained. A dropped queue counts as drained.
    pub async fn wait(mut self) {
        let _ = self.rx.wait_for(|drained| *drained).await;
    }
}

/// Flips the drain flag however the consumer task ends
struct DrainGuard(Arc<watch::Sender<bool>>);

impl Drop for DrainGuard {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

pub struct EngineQueue<M> {
    name: String,
    sender: Mutex<Option<mpsc::UnboundedSender<M>>>,
    drained: Arc<watch::Sender<bool>>,
    processed: Arc<AtomicU64>,
}

impl<M: Send + 'static> EngineQueue<M> {
    pub fn new(name: &str) -> Self {
        let (drained, _) = watch::channel(true);
        Self {
            name: name.to_string(),
            sender: Mutex::new(None),
            drained: Arc::new(drained),
            processed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Messages handled since creation
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Open the queue and spawn its consumer.
    ///
    /// Returns `false` if the queue is already open or the registry refused the task.
    pub fn open<H, Fut>(&self, tasks: &TaskRegistry, mut handler: H) -> bool
    where
        H: FnMut(M) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if sender.is_some() {
            warn!("{} run queue already open", self.name);
            return false;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<M>();
        self.drained.send_replace(false);

        let guard = DrainGuard(self.drained.clone());
        let processed = self.processed.clone();
        let name = self.name.clone();
        let task_name = format!("{}-run-queue", self.name);

        let spawned = tasks.spawn(&task_name, async move {
            let _guard = guard;
            while let Some(message) = rx.recv().await {
                handler(message).await;
                processed.fetch_add(1, Ordering::Relaxed);
            }
            debug!("{} run queue drained", name);
            Ok(())
        });

        if spawned.is_none() {
            // The guard was dropped with the unspawned future
            return false;
        }

        *sender = Some(tx);
        true
    }

    /// Close the queue; queued messages are still processed
    pub fn close(&self) {
        let closed = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if closed.is_some() {
            debug!("{} run queue closed", self.name);
        }
    }

    pub fn send(&self, message: M) -> Result<()> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(tx) => tx
                .send(message)
                .map_err(|_| NodeError::engine(&self.name, "run queue consumer has exited")),
            None => Err(NodeError::engine(&self.name, "run queue is not running")),
        }
    }

    pub fn drain_handle(&self) -> DrainHandle {
        DrainHandle {
            rx: self.drained.subscribe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::runtime::Handle;

    #[tokio::test]
    async fn test_unopened_queue_is_drained() {
        let queue: EngineQueue<u32> = EngineQueue::new("Test");
        assert!(queue.drain_handle().is_drained());
        assert!(queue.send(1).is_err());
        queue.drain_handle().wait().await;
    }

    #[tokio::test]
    async fn test_close_drains_remaining_messages() {
        let tasks = TaskRegistry::new(Handle::current());
        let queue: EngineQueue<u32> = EngineQueue::new("Test");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        assert!(queue.open(&tasks, move |n| {
            let sink = sink.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                sink.lock().unwrap().push(n);
            }
        }));
        assert!(!queue.drain_handle().is_drained());

        for n in 0..5 {
            queue.send(n).unwrap();
        }
        queue.close();
        queue.drain_handle().wait().await;

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.processed(), 5);
        assert!(!queue.is_open());
    }

    #[tokio::test]
    async fn test_queue_reopens_after_close() {
        let tasks = TaskRegistry::new(Handle::current());
        let queue: EngineQueue<u32> = EngineQueue::new("Test");

        assert!(queue.open(&tasks, |_| async {}));
        assert!(!queue.open(&tasks, |_| async {}));
        queue.close();
        queue.drain_handle().wait().await;

        assert!(queue.open(&tasks, |_| async {}));
        queue.send(7).unwrap();
        queue.close();
        queue.drain_handle().wait().await;
        assert_eq!(queue.processed(), 1);
    }

    #[tokio::test]
    async fn test_aborted_consumer_counts_as_drained() {
        let tasks = TaskRegistry::new(Handle::current());
        let queue: EngineQueue<u32> = EngineQueue::new("Test");
        assert!(queue.open(&tasks, |_| async {}));

        tasks
            .cancel_all(&crate::tasks::LoggingExceptionHandler)
            .await;
        queue.drain_handle().wait().await;
    }
}
