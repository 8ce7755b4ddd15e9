//! Namespace-independent maintenance.

use tracing::{info, warn};

use crate::config::Settings;
use crate::scheduler::Scheduler;
use crate::storage::KeyValueStore;

/// Delete every rate limit record in `store` and stop the cleanup trigger.
///
/// Meant for install or upgrade migrations. Removal and cancellation are
/// attempted independently; failures are logged, never returned. Returns
/// the number of keys removed.
pub async fn clear_all_rate_limit_data(
    store: &dyn KeyValueStore,
    scheduler: &dyn Scheduler,
    settings: &Settings,
) -> usize {
    let removed = match remove_prefixed(store, &settings.storage_prefix).await {
        Ok(count) => count,
        Err(e) => {
            warn!(prefix = %settings.storage_prefix, error = %e, "Failed to clear rate limit data");
            0
        }
    };

    if let Err(e) = scheduler.cancel(&settings.cleanup.alarm_name).await {
        warn!(
            trigger = %settings.cleanup.alarm_name,
            error = %e,
            "Failed to cancel rate limit cleanup trigger"
        );
    }

    info!(removed = removed, "Cleared rate limit data");
    removed
}

async fn remove_prefixed(
    store: &dyn KeyValueStore,
    prefix: &str,
) -> crate::storage::StorageResult<usize> {
    let keys: Vec<String> = store
        .keys()
        .await?
        .into_iter()
        .filter(|k| k.starts_with(prefix))
        .collect();

    if !keys.is_empty() {
        store.remove(&keys).await?;
    }
    Ok(keys.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{CleanupTask, TokioScheduler};
    use crate::storage::testing::FlakyStore;
    use crate::storage::MemoryStore;
    use futures::FutureExt;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn noop_task() -> CleanupTask {
        Arc::new(|| async {}.boxed())
    }

    #[tokio::test]
    async fn test_removes_only_prefixed_keys() {
        let store = MemoryStore::new();
        store
            .set(HashMap::from([
                ("hireall_ratelimit_login".to_string(), json!({})),
                ("hireall_ratelimit_scrape".to_string(), json!({})),
                ("hireall_settings".to_string(), json!({"theme": "dark"})),
            ]))
            .await
            .unwrap();

        let scheduler = TokioScheduler::new();
        scheduler
            .schedule("ratelimit-cleanup", Duration::from_secs(300), noop_task())
            .await
            .unwrap();

        let removed = clear_all_rate_limit_data(&store, &scheduler, &Settings::default()).await;

        assert_eq!(removed, 2);
        assert_eq!(store.keys().await.unwrap(), vec!["hireall_settings".to_string()]);
        assert!(!scheduler.is_scheduled("ratelimit-cleanup"));
    }

    #[tokio::test]
    async fn test_store_failure_is_swallowed() {
        let store = FlakyStore::broken();
        let scheduler = TokioScheduler::new();
        scheduler
            .schedule("ratelimit-cleanup", Duration::from_secs(300), noop_task())
            .await
            .unwrap();

        let removed = clear_all_rate_limit_data(&store, &scheduler, &Settings::default()).await;

        assert_eq!(removed, 0);
        assert!(!scheduler.is_scheduled("ratelimit-cleanup"));
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = FlakyStore::new();
        let scheduler = TokioScheduler::new();

        let removed = clear_all_rate_limit_data(&store, &scheduler, &Settings::default()).await;

        assert_eq!(removed, 0);
        assert_eq!(store.writes.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
