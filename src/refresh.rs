//! Background cache refresh
//!
//! Warms the dataset cache at startup and refills it periodically, so most
//! requests never wait on the upstream catalog.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::DatasetCache;
use crate::data::PageSource;

/// Configuration for background refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshConfig {
    /// Time between proactive refills
    pub interval: Duration,
    /// Whether to fill the cache once immediately
    pub warm_on_start: bool,
    /// Whether periodic refills run at all
    pub enabled: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3000), // 50 minutes, inside the 1 hour TTL
            warm_on_start: true,
            enabled: true,
        }
    }
}

/// Handle for controlling the background refresh task
pub struct RefreshHandle {
    /// Signals the task to stop
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Spawns the refresh task for a cache
    ///
    /// Refills go through the cache's own single-flight guard, so they never
    /// race request-driven refills. Failures are logged and the previous
    /// snapshot stays in place.
    pub fn spawn<S>(cache: Arc<DatasetCache<S>>, config: RefreshConfig) -> Self
    where
        S: PageSource + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(async move {
            if config.warm_on_start {
                tokio::select! {
                    result = cache.get_all() => {
                        if let Err(err) = result {
                            warn!(error = %err, "initial cache warm-up failed");
                        }
                    }
                    _ = shutdown_rx.recv() => return,
                }
            }

            if !config.enabled || config.interval.is_zero() {
                return;
            }

            let mut interval = tokio::time::interval(config.interval);
            // Skip the first tick (immediate)
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        info!("background cache refresh");
                        if let Err(err) = cache.refill().await {
                            warn!(error = %err, "background cache refresh failed");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self { shutdown_tx, task }
    }

    /// Stops the refresh task and waits for it to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheSettings;
    use crate::test_support::{dataset, FakeSource};

    fn create_cache() -> (Arc<DatasetCache<FakeSource>>, Arc<FakeSource>) {
        let source = Arc::new(FakeSource::new(dataset(4)));
        let cache = Arc::new(DatasetCache::new(source.clone(), CacheSettings::default()));
        (cache, source)
    }

    #[test]
    fn test_refresh_config_default() {
        let config = RefreshConfig::default();
        assert_eq!(config.interval, Duration::from_secs(3000));
        assert!(config.warm_on_start);
        assert!(config.enabled);
    }

    #[tokio::test]
    async fn test_warm_on_start_fills_cache() {
        let (cache, _source) = create_cache();
        let config = RefreshConfig {
            enabled: false,
            ..Default::default()
        };

        let handle = RefreshHandle::spawn(cache.clone(), config);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(cache.peek().await.map(|s| s.len()), Some(4));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_disabled_refresh_without_warm_up_does_nothing() {
        let (cache, source) = create_cache();
        let config = RefreshConfig {
            warm_on_start: false,
            enabled: false,
            ..Default::default()
        };

        let handle = RefreshHandle::spawn(cache.clone(), config);
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.shutdown().await;

        assert!(cache.peek().await.is_none());
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_periodic_refresh_refills() {
        let (cache, source) = create_cache();
        let config = RefreshConfig {
            interval: Duration::from_millis(20),
            warm_on_start: true,
            enabled: true,
        };

        let handle = RefreshHandle::spawn(cache.clone(), config);
        tokio::time::sleep(Duration::from_millis(75)).await;
        handle.shutdown().await;

        assert!(source.full_fetches() >= 2, "Expected warm-up plus at least one refresh");
    }

    #[tokio::test]
    async fn test_shutdown_stops_refreshing() {
        let (cache, source) = create_cache();
        let config = RefreshConfig {
            interval: Duration::from_millis(10),
            warm_on_start: false,
            enabled: true,
        };

        let handle = RefreshHandle::spawn(cache, config);
        handle.shutdown().await;
        let after_shutdown = source.full_fetches();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(source.full_fetches(), after_shutdown);
    }
}
