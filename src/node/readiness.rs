//! Readiness Coordinator
//!
//! Waits until every engine reports initialized. The poll runs on the blocking
//! pool with a plain thread sleep, so the runtime thread stays free to drive
//! the client connects and cache loads the engines are waiting on. There is no
//! timeout; any queued stop, shutdown or halt abandons the wait.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::engine::Engine;
use crate::error::{NodeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// All engines initialized after `polls` checks
    Ready { polls: u64 },
    Abandoned,
}

#[derive(Debug, Clone)]
pub struct ReadinessCoordinator {
    interval: Duration,
    /// Queued requests that cancel a pending startup
    abandon: Arc<AtomicUsize>,
}

impl ReadinessCoordinator {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            abandon: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counter shared with request submitters; a wait gives up while it is non-zero
    pub fn abandon_counter(&self) -> Arc<AtomicUsize> {
        self.abandon.clone()
    }

    pub fn abandon(&self) {
        self.abandon.fetch_add(1, Ordering::SeqCst);
    }

    /// One abandoning request has been taken off the queue
    pub fn release(&self) {
        release(&self.abandon);
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandon.load(Ordering::SeqCst) > 0
    }

    /// Wait for the engines in order; each poll checks them front to back
    pub async fn wait(&self, engines: Vec<Arc<dyn Engine>>) -> Result<Readiness> {
        info!("Waiting for engines to initialize...");
        let interval = self.interval;
        let abandon = self.abandon.clone();

        let readiness = tokio::task::spawn_blocking(move || poll(interval, &abandon, &engines))
            .await
            .map_err(|e| NodeError::Runtime(format!("readiness poll failed: {e}")))?;

        debug!("Readiness: {:?}", readiness);
        Ok(readiness)
    }
}

pub(crate) fn release(counter: &AtomicUsize) {
    let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
}

fn poll(interval: Duration, abandon: &AtomicUsize, engines: &[Arc<dyn Engine>]) -> Readiness {
    let mut polls = 0;
    loop {
        std::thread::sleep(interval);
        if abandon.load(Ordering::SeqCst) > 0 {
            return Readiness::Abandoned;
        }
        polls += 1;
        if engines.iter().all(|e| e.is_initialized()) {
            return Readiness::Ready { polls };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DrainHandle;
    use std::sync::atomic::AtomicU64;

    /// Reports initialized after a fixed number of checks
    struct SlowEngine {
        ready_after: u64,
        checks: AtomicU64,
    }

    impl Engine for SlowEngine {
        fn name(&self) -> &str {
            "SlowEngine"
        }
        fn start(&self) {}
        fn stop(&self) {}
        fn dispose(&self) {}
        fn is_initialized(&self) -> bool {
            self.checks.fetch_add(1, Ordering::SeqCst) + 1 >= self.ready_after
        }
        fn pending_work_handle(&self) -> DrainHandle {
            DrainHandle::drained()
        }
    }

    fn slow(ready_after: u64) -> Arc<dyn Engine> {
        Arc::new(SlowEngine {
            ready_after,
            checks: AtomicU64::new(0),
        })
    }

    #[tokio::test]
    async fn test_wait_returns_once_all_ready() {
        let coordinator = ReadinessCoordinator::new(Duration::from_millis(1));
        let readiness = coordinator.wait(vec![slow(3), slow(1)]).await.unwrap();
        assert_eq!(readiness, Readiness::Ready { polls: 3 });
    }

    #[tokio::test]
    async fn test_wait_is_abandoned_on_request() {
        let coordinator = ReadinessCoordinator::new(Duration::from_millis(1));
        let waiter = coordinator.clone();
        let wait = tokio::spawn(async move { waiter.wait(vec![slow(u64::MAX)]).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.abandon();
        assert_eq!(wait.await.unwrap().unwrap(), Readiness::Abandoned);

        coordinator.release();
        assert!(!coordinator.is_abandoned());
        assert_eq!(
            coordinator.wait(vec![slow(1)]).await.unwrap(),
            Readiness::Ready { polls: 1 }
        );
    }

    #[tokio::test]
    async fn test_wait_stays_abandoned_while_requests_remain() {
        let coordinator = ReadinessCoordinator::new(Duration::from_millis(1));
        coordinator.abandon();
        coordinator.abandon();

        coordinator.release();
        assert!(coordinator.is_abandoned());
        assert_eq!(
            coordinator.wait(vec![slow(1)]).await.unwrap(),
            Readiness::Abandoned
        );

        coordinator.release();
        coordinator.release();
        assert!(!coordinator.is_abandoned());
    }
}
