//! Process-wide limiter registry and cleanup registration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::error::Result;
use crate::scheduler::{CleanupTask, Scheduler};
use crate::storage::KeyValueStore;

use super::admin::clear_all_rate_limit_data;
use super::limiter::{CleanupReport, LimiterInner, RateLimiter};

type LimiterList = Arc<Mutex<Vec<Weak<LimiterInner>>>>;

/// Creates limiters that share one store, clock and cleanup trigger.
///
/// The host builds a single registry at startup. The first limiter created
/// registers the periodic cleanup trigger; later ones reuse it. Each firing
/// cleans every limiter the registry created that is still alive.
pub struct LimiterRegistry {
    store: Arc<dyn KeyValueStore>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    settings: Settings,
    cleanup_scheduled: AtomicBool,
    limiters: LimiterList,
}

impl std::fmt::Debug for LimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterRegistry")
            .field("settings", &self.settings)
            .field("cleanup_scheduled", &self.cleanup_scheduled)
            .field("limiters", &self.limiters.lock().len())
            .finish()
    }
}

impl LimiterRegistry {
    /// Create a registry using the system clock.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        scheduler: Arc<dyn Scheduler>,
        settings: Settings,
    ) -> Result<Self> {
        Self::with_clock(store, scheduler, Arc::new(SystemClock), settings)
    }

    /// Create a registry with an explicit clock.
    pub fn with_clock(
        store: Arc<dyn KeyValueStore>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
        settings: Settings,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            store,
            scheduler,
            clock,
            settings,
            cleanup_scheduled: AtomicBool::new(false),
            limiters: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Whether the cleanup trigger has been registered.
    pub fn cleanup_scheduled(&self) -> bool {
        self.cleanup_scheduled.load(Ordering::SeqCst)
    }

    /// Create a limiter for `namespace`.
    ///
    /// Does no store I/O. Registers the cleanup trigger if this registry has
    /// not done so yet; a registration failure is logged and retried on the
    /// next creation.
    pub async fn create(
        &self,
        namespace: &str,
        window_ms: u64,
        max_requests: u64,
    ) -> Result<RateLimiter> {
        let limiter = RateLimiter::new(
            namespace,
            window_ms,
            max_requests,
            self.store.clone(),
            self.clock.clone(),
            &self.settings,
        )?;

        {
            let mut limiters = self.limiters.lock();
            limiters.retain(|l| l.strong_count() > 0);
            limiters.push(limiter.downgrade());
        }

        debug!(
            namespace = %namespace,
            window_ms = window_ms,
            max_requests = max_requests,
            "Created rate limiter"
        );

        self.ensure_cleanup_scheduled().await;
        Ok(limiter)
    }

    /// Create every limiter listed in the settings' presets, keyed by
    /// namespace.
    pub async fn create_presets(&self) -> Result<HashMap<String, RateLimiter>> {
        let mut limiters = HashMap::with_capacity(self.settings.presets.len());
        for preset in &self.settings.presets {
            let limiter = self
                .create(&preset.namespace, preset.window_ms, preset.max_requests)
                .await?;
            limiters.insert(preset.namespace.clone(), limiter);
        }
        Ok(limiters)
    }

    /// Run one cleanup pass over every live limiter now.
    pub async fn run_cleanup(&self) -> Vec<(String, CleanupReport)> {
        cleanup_all(&self.limiters).await
    }

    /// Wipe all rate limit data in the store, clear every live limiter's
    /// memory fallback and cancel the cleanup trigger. The next limiter
    /// created registers the trigger again.
    pub async fn clear_all(&self) -> usize {
        for limiter in live_limiters(&self.limiters) {
            limiter.clear_memory();
        }

        let removed = clear_all_rate_limit_data(
            self.store.as_ref(),
            self.scheduler.as_ref(),
            &self.settings,
        )
        .await;

        self.cleanup_scheduled.store(false, Ordering::SeqCst);
        removed
    }

    async fn ensure_cleanup_scheduled(&self) {
        if self
            .cleanup_scheduled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let limiters = self.limiters.clone();
        let task: CleanupTask = Arc::new(move || {
            let limiters = limiters.clone();
            async move {
                cleanup_all(&limiters).await;
            }
            .boxed()
        });

        let cleanup = &self.settings.cleanup;
        match self
            .scheduler
            .schedule(&cleanup.alarm_name, cleanup.interval(), task)
            .await
        {
            Ok(()) => info!(
                trigger = %cleanup.alarm_name,
                interval_minutes = cleanup.interval_minutes,
                "Rate limit cleanup scheduled"
            ),
            Err(e) => {
                self.cleanup_scheduled.store(false, Ordering::SeqCst);
                warn!(
                    trigger = %cleanup.alarm_name,
                    error = %e,
                    "Could not schedule rate limit cleanup"
                );
            }
        }
    }
}

fn live_limiters(limiters: &LimiterList) -> Vec<RateLimiter> {
    let mut list = limiters.lock();
    list.retain(|l| l.strong_count() > 0);
    list.iter()
        .filter_map(Weak::upgrade)
        .map(RateLimiter::from_inner)
        .collect()
}

async fn cleanup_all(limiters: &LimiterList) -> Vec<(String, CleanupReport)> {
    let mut reports = Vec::new();
    for limiter in live_limiters(limiters) {
        let report = limiter.cleanup().await;
        reports.push((limiter.namespace().to_string(), report));
    }
    reports
}
