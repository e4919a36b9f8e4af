//! Task Registry
//!
//! Every unit of concurrent work the node spawns (engine run queues, client
//! connects, user tasks) is tracked here for the lifetime of the node. Disposal
//! cancels the whole registry in one operation and collects failures instead of
//! stopping at the first one.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::task::{AbortHandle, Id, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// A tracked task that finished with an error (or panicked) during forced cancellation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub message: String,
    pub error: String,
    pub task: String,
}

/// Process-wide sink for failures that must not be raised
pub trait ExceptionHandler: Send + Sync {
    fn handle(&self, failure: &TaskFailure);
}

impl<F> ExceptionHandler for F
where
    F: Fn(&TaskFailure) + Send + Sync,
{
    fn handle(&self, failure: &TaskFailure) {
        self(failure)
    }
}

/// Default handler: one structured ERROR line per failure
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingExceptionHandler;

impl ExceptionHandler for LoggingExceptionHandler {
    fn handle(&self, failure: &TaskFailure) {
        error!(
            message = %failure.message,
            error = %failure.error,
            task = %failure.task,
            "Unhandled task failure"
        );
    }
}

/// Outcome of a registry-wide cancellation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancellationReport {
    /// Tasks still running when cancellation began
    pub pending: usize,
    /// Tasks whose cancellation was acknowledged
    pub cancelled: usize,
    /// Tasks that finished cleanly
    pub completed: usize,
    /// Tasks reported to the exception handler
    pub failed: usize,
}

struct TrackedTask {
    name: String,
    abort: AbortHandle,
}

struct RegistryInner {
    tasks: JoinSet<Result<()>>,
    tracked: HashMap<Id, TrackedTask>,
    closed: bool,
}

impl RegistryInner {
    /// Drop finished tasks; failures among them go to the logging handler
    fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next_with_id() {
            let (id, failure) = match joined {
                Ok((id, Ok(()))) => (id, None),
                Ok((id, Err(e))) => (id, Some(("unhandled error in node task", e.to_string()))),
                Err(join_error) if join_error.is_cancelled() => (join_error.id(), None),
                Err(join_error) => (
                    join_error.id(),
                    Some(("node task panicked", join_error.to_string())),
                ),
            };
            let task = task_name(&self.tracked, id);
            self.tracked.remove(&id);

            if let Some((message, error)) = failure {
                LoggingExceptionHandler.handle(&TaskFailure {
                    message: message.to_string(),
                    error,
                    task,
                });
            }
        }
    }
}

/// Registry of node-scoped tasks
#[derive(Clone)]
pub struct TaskRegistry {
    handle: Handle,
    inner: Arc<Mutex<RegistryInner>>,
}

impl TaskRegistry {
    /// Create a registry spawning onto the given runtime
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            inner: Arc::new(Mutex::new(RegistryInner {
                tasks: JoinSet::new(),
                tracked: HashMap::new(),
                closed: false,
            })),
        }
    }

    pub fn runtime_handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawn a tracked task. Returns `None` once the registry has been cancelled.
    pub fn spawn<F>(&self, name: &str, future: F) -> Option<AbortHandle>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.closed {
            warn!("Task registry closed, not spawning {}", name);
            return None;
        }
        inner.reap();

        let abort = inner.tasks.spawn_on(future, &self.handle);
        inner.tracked.insert(
            abort.id(),
            TrackedTask {
                name: name.to_string(),
                abort: abort.clone(),
            },
        );
        debug!("Spawned task {} ({})", name, abort.id());
        Some(abort)
    }

    /// Tracked tasks that have not finished yet
    pub fn pending_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .tracked
            .values()
            .filter(|t| !t.abort.is_finished())
            .count()
    }

    /// Tasks held by the registry, finished ones not yet reaped included
    pub fn tracked_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tracked
            .len()
    }

    /// Names of tracked tasks that have not finished yet, sorted
    pub fn pending_names(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = inner
            .tracked
            .values()
            .filter(|t| !t.abort.is_finished())
            .map(|t| t.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }

    /// Cancel every tracked task and wait for all of them to settle.
    ///
    /// Cancellation acknowledgements are swallowed; errors and panics go to
    /// `handler`. The registry is closed afterwards, so a second call finds
    /// nothing to cancel.
    pub async fn cancel_all(&self, handler: &dyn ExceptionHandler) -> CancellationReport {
        let (mut tasks, tracked) = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.closed = true;
            (
                std::mem::take(&mut inner.tasks),
                std::mem::take(&mut inner.tracked),
            )
        };

        let mut report = CancellationReport::default();
        let mut pending: Vec<&TrackedTask> = tracked
            .values()
            .filter(|t| !t.abort.is_finished())
            .collect();
        pending.sort_by(|a, b| a.name.cmp(&b.name));
        report.pending = pending.len();

        if pending.is_empty() {
            info!("All tasks finished.");
        } else {
            for task in &pending {
                warn!("Cancelling pending task {}", task.name);
            }
        }
        tasks.abort_all();

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, Ok(()))) => report.completed += 1,
                Ok((id, Err(e))) => {
                    report.failed += 1;
                    handler.handle(&TaskFailure {
                        message: "unhandled error during node disposal".to_string(),
                        error: e.to_string(),
                        task: task_name(&tracked, id),
                    });
                }
                Err(join_error) if join_error.is_cancelled() => report.cancelled += 1,
                Err(join_error) => {
                    report.failed += 1;
                    handler.handle(&TaskFailure {
                        message: "task panicked during node disposal".to_string(),
                        error: join_error.to_string(),
                        task: task_name(&tracked, join_error.id()),
                    });
                }
            }
        }

        debug!("Task cancellation finished: {:?}", report);
        report
    }
}

fn task_name(tracked: &HashMap<Id, TrackedTask>, id: Id) -> String {
    tracked
        .get(&id)
        .map(|t| t.name.clone())
        .unwrap_or_else(|| format!("task-{id}"))
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("pending", &self.pending_names())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeError;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingHandler {
        failures: Mutex<Vec<TaskFailure>>,
    }

    impl ExceptionHandler for RecordingHandler {
        fn handle(&self, failure: &TaskFailure) {
            self.failures.lock().unwrap().push(failure.clone());
        }
    }

    #[tokio::test]
    async fn test_cancel_all_aggregates_failures() {
        let registry = TaskRegistry::new(Handle::current());
        let handler = RecordingHandler::default();

        registry.spawn("domain-error", async {
            Err(NodeError::engine("DataEngine", "feed parse failure"))
        });
        registry.spawn("long-running", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        });
        registry.spawn("quick", async { Ok(()) });

        // Let the short tasks finish before cancellation lands
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.pending_names(), vec!["long-running"]);

        let report = registry.cancel_all(&handler).await;

        let failures = handler.failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].task, "domain-error");
        assert!(failures[0].error.contains("feed parse failure"));
        assert_eq!(report.pending, 1);
        assert_eq!(report.cancelled, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_empty_registry_reports_nothing() {
        let registry = TaskRegistry::new(Handle::current());
        let report = registry.cancel_all(&LoggingExceptionHandler).await;
        assert_eq!(report, CancellationReport::default());
    }

    #[tokio::test]
    async fn test_second_cancel_is_a_no_op() {
        let registry = TaskRegistry::new(Handle::current());
        let calls = Arc::new(Mutex::new(0usize));
        let counter = calls.clone();
        let handler = move |_: &TaskFailure| *counter.lock().unwrap() += 1;

        registry.spawn("fails", async { Err(NodeError::Cancelled) });
        tokio::task::yield_now().await;

        registry.cancel_all(&handler).await;
        let second = registry.cancel_all(&handler).await;

        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(second, CancellationReport::default());
        assert!(registry.is_closed());
        assert!(registry.spawn("late", async { Ok(()) }).is_none());
    }

    #[tokio::test]
    async fn test_finished_tasks_are_reaped_on_spawn() {
        let registry = TaskRegistry::new(Handle::current());
        let handler = RecordingHandler::default();

        for i in 0..1_000 {
            registry.spawn(&format!("short-{i}"), async { Ok(()) });
        }
        registry.spawn("failed-early", async {
            Err(NodeError::Runtime("socket closed".to_string()))
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.pending_count(), 0);

        registry.spawn("latest", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        });
        assert_eq!(registry.tracked_count(), 1);
        assert_eq!(registry.pending_names(), vec!["latest"]);

        // Failures already reaped are not reported a second time
        let report = registry.cancel_all(&handler).await;
        assert!(handler.failures.lock().unwrap().is_empty());
        assert_eq!(report.cancelled, 1);
    }

    #[tokio::test]
    async fn test_panics_are_reported() {
        let registry = TaskRegistry::new(Handle::current());
        let handler = RecordingHandler::default();

        registry.spawn("panics", async {
            if true {
                panic!("boom");
            }
            Ok(())
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let report = registry.cancel_all(&handler).await;
        assert_eq!(report.failed, 1);
        assert_eq!(handler.failures.lock().unwrap()[0].task, "panics");
    }
}
