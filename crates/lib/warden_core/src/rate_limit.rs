//! Fixed-window request limiter keyed by client.
//!
//! Each key owns a window `{count, started}`. The first request, or the first
//! one after the window has run out, starts a fresh window. A request is
//! allowed while the post-increment count stays within the limit.
//!
//! Windows are fixed, not sliding: a client can land `limit` requests at the
//! end of one window and `limit` more at the start of the next, so up to
//! `2 × limit` may pass in any span of one window length. That is accepted.
//!
//! Windows live in a [`DashMap`]; updating one key takes only that key's
//! shard lock, so unrelated clients rarely contend. Finished windows are
//! evicted by [`RateLimiter::evict_expired`], normally from the task started
//! by [`RateLimiter::spawn_sweeper`]. Dropping a finished window is the same
//! as resetting it, so eviction never changes a decision.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Requests allowed per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub requests: u32,
    pub window: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    started: Instant,
    length: Duration,
}

impl RateWindow {
    fn is_over(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) > self.length
    }
}

/// Per-key fixed-window counter.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
    default_limit: RateLimit,
}

impl RateLimiter {
    pub fn new(default_limit: RateLimit) -> Self {
        Self {
            windows: DashMap::new(),
            default_limit,
        }
    }

    pub fn default_limit(&self) -> RateLimit {
        self.default_limit
    }

    /// Count a request for `key` under the default limit.
    pub fn check(&self, key: &str) -> bool {
        let RateLimit { requests, window } = self.default_limit;
        self.allow(key, requests, window)
    }

    /// Count a request for `key`; `true` if it is within `limit` per `window`.
    pub fn allow(&self, key: &str, limit: u32, window: Duration) -> bool {
        self.allow_at(key, limit, window, Instant::now())
    }

    /// [`RateLimiter::allow`] as of `now`.
    pub fn allow_at(&self, key: &str, limit: u32, window: Duration, now: Instant) -> bool {
        let fresh = RateWindow {
            count: 0,
            started: now,
            length: window,
        };
        let mut entry = self.windows.entry(key.to_string()).or_insert(fresh);
        if entry.is_over(now) {
            *entry = fresh;
        }
        entry.count = entry.count.saturating_add(1);
        entry.count <= limit
    }

    /// Drop every window that has run out as of `now`. Returns how many.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, w| !w.is_over(now));
        before.saturating_sub(self.windows.len())
    }

    /// Number of tracked client keys.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    /// Spawn a periodic eviction task that stops when `shutdown` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let evicted = limiter.evict_expired(Instant::now());
                if evicted > 0 {
                    debug!(evicted, remaining = limiter.tracked(), "evicted rate limit windows");
                }
            }
        })
    }
}
