//! Live Clock and Timer Registry
//!
//! Process-wide time source plus named interval timers used by strategies and
//! engines. The node cancels every remaining timer while stopping.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::error::{NodeError, Result};
use crate::tasks::TaskRegistry;

/// Event delivered to a timer callback on every tick
#[derive(Debug, Clone)]
pub struct TimeEvent {
    pub name: String,
    pub ts: DateTime<Utc>,
}

pub type TimerCallback = Arc<dyn Fn(TimeEvent) + Send + Sync>;

/// Wall clock with a registry of named timers
pub struct LiveClock {
    tasks: TaskRegistry,
    timers: Mutex<BTreeMap<String, AbortHandle>>,
}

impl LiveClock {
    /// Create a clock whose timers are tracked as node tasks
    pub fn new(tasks: TaskRegistry) -> Self {
        Self {
            tasks,
            timers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Register a repeating timer. Names are unique while the timer is active.
    pub fn set_timer(&self, name: &str, interval: Duration, callback: TimerCallback) -> Result<()> {
        if interval.is_zero() {
            return Err(NodeError::InvalidConfig(format!(
                "timer `{name}` interval must be positive"
            )));
        }

        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        if timers.get(name).is_some_and(|t| !t.is_finished()) {
            return Err(NodeError::InvalidConfig(format!(
                "timer `{name}` is already active"
            )));
        }

        let task = self
            .tasks
            .spawn(
                &format!("{name}-timer"),
                run_timer(name.to_string(), interval, callback),
            )
            .ok_or_else(|| NodeError::Runtime(format!("cannot set timer `{name}` after dispose")))?;

        timers.insert(name.to_string(), task);
        debug!("Set Timer(name={}, interval={:?})", name, interval);
        Ok(())
    }

    /// Names of all active timers, ordered by name
    pub fn timer_names(&self) -> Vec<String> {
        let timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        timers
            .iter()
            .filter(|(_, task)| !task.is_finished())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn timer_count(&self) -> usize {
        self.timer_names().len()
    }

    /// Cancel one timer, returning whether it was active
    pub fn cancel_timer(&self, name: &str) -> bool {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        match timers.remove(name) {
            Some(task) => {
                let was_active = !task.is_finished();
                task.abort();
                was_active
            }
            None => false,
        }
    }

    /// Cancel every timer in one step and return the names that were active
    pub fn cancel_timers(&self) -> Vec<String> {
        let drained = {
            let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *timers)
        };

        drained
            .into_iter()
            .filter_map(|(name, task)| {
                let was_active = !task.is_finished();
                task.abort();
                was_active.then_some(name)
            })
            .collect()
    }
}

async fn run_timer(name: String, interval: Duration, callback: TimerCallback) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        callback(TimeEvent {
            name: name.clone(),
            ts: Utc::now(),
        });
    }
}

impl std::fmt::Debug for LiveClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveClock")
            .field("timers", &self.timer_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::runtime::Handle;

    fn noop() -> TimerCallback {
        Arc::new(|_| {})
    }

    #[tokio::test]
    async fn test_timer_names_are_ordered() {
        let clock = LiveClock::new(TaskRegistry::new(Handle::current()));
        clock.set_timer("zeta", Duration::from_secs(60), noop()).unwrap();
        clock.set_timer("alpha", Duration::from_secs(60), noop()).unwrap();

        assert_eq!(clock.timer_names(), vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_duplicate_timer_rejected() {
        let clock = LiveClock::new(TaskRegistry::new(Handle::current()));
        clock.set_timer("heartbeat", Duration::from_secs(1), noop()).unwrap();

        assert!(clock.set_timer("heartbeat", Duration::from_secs(1), noop()).is_err());
        assert!(clock.set_timer("zero", Duration::ZERO, noop()).is_err());
    }

    #[tokio::test]
    async fn test_cancel_timers_drains_registry() {
        let clock = LiveClock::new(TaskRegistry::new(Handle::current()));
        clock.set_timer("a", Duration::from_secs(60), noop()).unwrap();
        clock.set_timer("b", Duration::from_secs(60), noop()).unwrap();

        assert!(clock.cancel_timer("a"));
        assert!(!clock.cancel_timer("a"));

        let cancelled = clock.cancel_timers();
        assert_eq!(cancelled, vec!["b"]);
        assert_eq!(clock.timer_count(), 0);
        assert!(clock.cancel_timers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_on_interval() {
        let clock = LiveClock::new(TaskRegistry::new(Handle::current()));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        clock
            .set_timer(
                "tick",
                Duration::from_millis(100),
                Arc::new(move |event| {
                    assert_eq!(event.name, "tick");
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        clock.cancel_timers();
    }

    #[tokio::test]
    async fn test_timers_are_tracked_node_tasks() {
        let tasks = TaskRegistry::new(Handle::current());
        let clock = LiveClock::new(tasks.clone());
        clock.set_timer("heartbeat", Duration::from_secs(60), noop()).unwrap();

        assert_eq!(tasks.pending_names(), vec!["heartbeat-timer"]);

        let report = tasks.cancel_all(&crate::tasks::LoggingExceptionHandler).await;
        assert_eq!(report.cancelled, 1);
        assert_eq!(clock.timer_count(), 0);
        assert!(clock.set_timer("late", Duration::from_secs(1), noop()).is_err());
    }
}
