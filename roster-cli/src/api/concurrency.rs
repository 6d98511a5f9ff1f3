//! Concurrency limiter for fan-out requests
//!
//! Identity resolution for a batch of records dispatches one request per
//! distinct reference at once; this caps how many of them are in flight.

use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default number of concurrent Graph requests during batch resolution
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 8;

#[derive(Debug, Clone)]
pub struct ConcurrencyConfig {
    /// Maximum concurrent HTTP requests to the API
    pub max_concurrent_requests: usize,
    /// Whether concurrency limiting is enabled
    pub enabled: bool,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            enabled: true,
        }
    }
}

/// Semaphore-based limiter shared by clones
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    config: ConcurrencyConfig,
    requests_acquired: Arc<AtomicU64>,
    requests_waited: Arc<AtomicU64>,
}

impl ConcurrencyLimiter {
    pub fn new(config: ConcurrencyConfig) -> Self {
        let permits = if config.enabled {
            config.max_concurrent_requests.max(1)
        } else {
            // Tokio's semaphore rejects anything above 2^61-1
            1_000_000
        };

        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            config,
            requests_acquired: Arc::new(AtomicU64::new(0)),
            requests_waited: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Wait for a permit. The permit is released when dropped.
    ///
    /// Returns None only if the semaphore was closed, in which case the
    /// caller proceeds unthrottled.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        if self.config.enabled && self.semaphore.available_permits() == 0 {
            self.requests_waited.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Concurrency limiter: waiting for permit ({} in use)",
                self.config.max_concurrent_requests
            );
        }

        let permit = self.semaphore.clone().acquire_owned().await.ok()?;
        self.requests_acquired.fetch_add(1, Ordering::Relaxed);
        Some(permit)
    }

    pub fn available_permits(&self) -> usize {
        if !self.config.enabled {
            return usize::MAX;
        }
        self.semaphore.available_permits()
    }

    pub fn stats(&self) -> ConcurrencyStats {
        ConcurrencyStats {
            available_permits: self.available_permits(),
            max_concurrent_requests: self.config.max_concurrent_requests,
            requests_acquired: self.requests_acquired.load(Ordering::Relaxed),
            requests_waited: self.requests_waited.load(Ordering::Relaxed),
            enabled: self.config.enabled,
        }
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(ConcurrencyConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct ConcurrencyStats {
    pub available_permits: usize,
    pub max_concurrent_requests: usize,
    /// Total permits acquired since creation
    pub requests_acquired: u64,
    /// Number of times a request had to wait for a permit
    pub requests_waited: u64,
    pub enabled: bool,
}
