//! Rate Limiting Infrastructure
//!
//! Common rate limiting abstractions and the in-memory store used for
//! admission control. Counters are fixed-window: one atomic
//! check-and-increment per request, O(1) in the amount of history.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Rate limit configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests allowed in the window
    pub max_requests: u32,
    /// Time window duration
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    pub fn window_ms(&self) -> i64 {
        self.window.as_millis() as i64
    }
}

/// Rate limit check result
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at_ms: i64,
}

/// Trait for rate limit storage backends
#[trait_variant::make(RateLimitStore: Send)]
pub trait LocalRateLimitStore {
    /// Check and increment rate limit counter
    /// Returns (allowed, remaining_requests)
    async fn check_and_increment(
        &self,
        key: &str,
        config: &RateLimitConfig,
    ) -> Result<RateLimitResult, Box<dyn std::error::Error + Send + Sync>>;
}

/// Entries older than this many windows are dropped during pruning
const PRUNE_AGE_WINDOWS: i64 = 2;
/// Map size that triggers an opportunistic prune pass
const PRUNE_HIGH_WATER: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    window_start_ms: i64,
    window_ms: i64,
    count: u32,
}

/// In-memory fixed-window rate limit store
///
/// Counters live in a mutex-guarded map keyed by caller-chosen strings
/// (e.g. `identity:<uuid>`, `ip:<addr>`). A counter resets when the
/// fixed window it was opened in has passed. Stale keys are pruned
/// opportunistically once the map grows past a high-water mark.
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    windows: Mutex<HashMap<String, WindowCounter>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_at(&self, key: &str, config: &RateLimitConfig, now_ms: i64) -> RateLimitResult {
        let window_ms = config.window_ms().max(1);
        let window_start = (now_ms / window_ms) * window_ms;

        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        if windows.len() > PRUNE_HIGH_WATER {
            windows
                .retain(|_, c| c.window_start_ms + PRUNE_AGE_WINDOWS * c.window_ms > now_ms);
        }

        let counter = windows.entry(key.to_string()).or_insert(WindowCounter {
            window_start_ms: window_start,
            window_ms,
            count: 0,
        });
        if counter.window_start_ms != window_start {
            counter.window_start_ms = window_start;
            counter.window_ms = window_ms;
            counter.count = 0;
        }
        counter.count = counter.count.saturating_add(1);

        RateLimitResult {
            allowed: counter.count <= config.max_requests,
            remaining: config.max_requests.saturating_sub(counter.count),
            reset_at_ms: window_start + window_ms,
        }
    }
}

impl RateLimitStore for InMemoryRateLimitStore {
    async fn check_and_increment(
        &self,
        key: &str,
        config: &RateLimitConfig,
    ) -> Result<RateLimitResult, Box<dyn std::error::Error + Send + Sync>> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Ok(self.check_at(key, config, now_ms))
    }
}
