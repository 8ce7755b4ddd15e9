//! Periodic trigger abstraction and a tokio-backed implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::error::{RateLimitError, Result};

/// Work run on every firing of a scheduled trigger.
pub type CleanupTask = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// A named, repeating trigger service.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Run `task` roughly every `interval` under `name`. Scheduling a name
    /// that is already registered replaces the previous trigger.
    async fn schedule(&self, name: &str, interval: Duration, task: CleanupTask) -> Result<()>;

    /// Remove a trigger. Returns whether one was registered.
    async fn cancel(&self, name: &str) -> Result<bool>;
}

/// A [`Scheduler`] that runs each trigger as a tokio task.
///
/// Triggers live as long as the runtime; they are not restored after a
/// process restart, so hosts that need that re-register on startup.
#[derive(Debug, Default)]
pub struct TokioScheduler {
    tasks: DashMap<String, JoinHandle<()>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a trigger is registered under `name`.
    pub fn is_scheduled(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Number of registered triggers.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn schedule(&self, name: &str, interval: Duration, task: CleanupTask) -> Result<()> {
        if interval.is_zero() {
            return Err(RateLimitError::Scheduler(format!(
                "interval for '{}' must be greater than zero",
                name
            )));
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RateLimitError::Scheduler(e.to_string()))?;

        let trigger = name.to_string();
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; fire one interval from now.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                debug!(trigger = %trigger, "Trigger fired");
                task().await;
            }
        });

        if let Some(previous) = self.tasks.insert(name.to_string(), handle) {
            previous.abort();
        }

        info!(trigger = %name, interval_secs = interval.as_secs(), "Trigger scheduled");
        Ok(())
    }

    async fn cancel(&self, name: &str) -> Result<bool> {
        match self.tasks.remove(name) {
            Some((_, handle)) => {
                handle.abort();
                info!(trigger = %name, "Trigger cancelled");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for entry in self.tasks.iter() {
            entry.value().abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_task(counter: Arc<AtomicUsize>) -> CleanupTask {
        Arc::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_fires_each_interval() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler
            .schedule("tick", Duration::from_secs(60), counting_task(fired.clone()))
            .await
            .unwrap();
        assert!(scheduler.is_scheduled("tick"));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(155)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_trigger() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler
            .schedule("tick", Duration::from_secs(10), counting_task(fired.clone()))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        assert!(scheduler.cancel("tick").await.unwrap());
        assert!(!scheduler.cancel("tick").await.unwrap());
        assert!(scheduler.is_empty());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_trigger() {
        let scheduler = TokioScheduler::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        scheduler
            .schedule("tick", Duration::from_secs(10), counting_task(first.clone()))
            .await
            .unwrap();
        scheduler
            .schedule("tick", Duration::from_secs(10), counting_task(second.clone()))
            .await
            .unwrap();
        assert_eq!(scheduler.len(), 1);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let scheduler = TokioScheduler::new();
        let result = scheduler
            .schedule("tick", Duration::ZERO, counting_task(Arc::new(AtomicUsize::new(0))))
            .await;
        assert!(matches!(result, Err(RateLimitError::Scheduler(_))));
    }

    #[test]
    fn test_schedule_outside_runtime_fails() {
        let scheduler = TokioScheduler::new();
        let result = futures::executor::block_on(scheduler.schedule(
            "tick",
            Duration::from_secs(1),
            counting_task(Arc::new(AtomicUsize::new(0))),
        ));
        assert!(matches!(result, Err(RateLimitError::Scheduler(_))));
    }
}
