use crate::error::IngestError;
use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Fixed-window counters keyed by client.
///
/// The in-memory store suits one instance; a shared cache can implement this
/// for multi-instance deployments.
#[async_trait::async_trait]
pub trait CounterStore: Send + Sync {
    /// Adds one hit to `key` and returns the count inside the current window.
    async fn increment(&self, key: &str, window: Duration) -> Result<u64>;

    /// Drops counters whose window has elapsed. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    started: Instant,
    window: Duration,
    count: u64,
}

impl WindowCounter {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.started) >= self.window
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    counters: DashMap<String, WindowCounter>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait::async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64> {
        let now = Instant::now();
        let mut counter = self
            .counters
            .entry(key.to_string())
            .or_insert(WindowCounter {
                started: now,
                window,
                count: 0,
            });

        if counter.expired(now) {
            *counter = WindowCounter {
                started: now,
                window,
                count: 0,
            };
        }
        counter.count += 1;
        Ok(counter.count)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, counter| !counter.expired(now));
        Ok(before.saturating_sub(self.counters.len()))
    }
}

/// Uploads-per-window limit on top of a [`CounterStore`].
///
/// A failing store lets the request through.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, limit: u32, window: Duration) -> Self {
        Self {
            store,
            limit,
            window,
        }
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    pub async fn check(&self, key: &str) -> Result<(), IngestError> {
        if self.limit == 0 {
            return Ok(());
        }

        match self.store.increment(key, self.window).await {
            Ok(count) if count > u64::from(self.limit) => {
                tracing::warn!(client = %key, count, limit = self.limit, "Upload rate limit exceeded");
                Err(IngestError::RateLimited)
            }
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!(client = %key, error = %e, "Rate limit store failed, allowing request");
                Ok(())
            }
        }
    }
}
