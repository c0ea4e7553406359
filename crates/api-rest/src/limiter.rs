//! Keyed fixed-window request counting.
//!
//! [`RateLimitStore`] is the seam the HTTP layer talks to. [`InMemoryStore`]
//! is the default backing: one process-wide map guarded by a single lock, so
//! the read/compare/increment sequence for a key is atomic.
//!
//! Counters are per process. Several running instances each enforce their
//! own quota; a shared external store is needed for a cluster-wide limit.
//!
//! A fixed window lets a client spend its quota at the end of one window and
//! again at the start of the next, so up to twice the quota can pass in a
//! short burst across a boundary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use taskboard_common::datetime::{now_utc, seconds_until};

/// Probability that a `check` call also sweeps expired entries
pub const DEFAULT_SWEEP_PROBABILITY: f64 = 0.01;

/// Requests allowed per window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Maximum requests per window
    pub max_requests: u32,

    /// Window length
    pub window: Duration,
}

impl Quota {
    /// Create a quota
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

impl Default for Quota {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window: Duration::from_secs(15 * 60),
        }
    }
}

/// Outcome of counting one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,

    /// Quota the request was counted against
    pub limit: u32,

    /// Requests left in the current window
    pub remaining: u32,

    /// When the current window ends
    pub reset_at: DateTime<Utc>,

    /// Whole seconds until `reset_at`, at least 1
    pub retry_after_secs: u64,
}

impl RateLimitDecision {
    /// `reset_at` as unix seconds
    pub fn reset_unix(&self) -> i64 {
        self.reset_at.timestamp()
    }
}

/// Counter state for one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitEntry {
    /// Requests seen in the current window
    pub count: u32,

    /// Start of the current window
    pub window_start: DateTime<Utc>,

    /// Window length the entry was last counted with
    pub window: Duration,

    /// Quota the entry was last counted with
    pub max_requests: u32,
}

impl RateLimitEntry {
    fn vacant(now: DateTime<Utc>, quota: Quota) -> Self {
        Self {
            count: 0,
            window_start: now,
            window: quota.window,
            max_requests: quota.max_requests,
        }
    }

    /// When the current window ends
    pub fn reset_at(&self) -> DateTime<Utc> {
        window_end(self.window_start, self.window)
    }

    /// Whether the window has elapsed at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_at()
    }

    /// Whether the key is currently rejected
    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        self.count >= self.max_requests && !self.is_expired(now)
    }
}

fn window_end(start: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|window| start.checked_add_signed(window))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Storage for rate limit counters.
///
/// Implementations must make counting one request for a key atomic with
/// respect to concurrent requests for the same key.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Count one request for `key` against `quota`
    async fn check(&self, key: &str, quota: Quota) -> RateLimitDecision;
}

/// Time source for the limiter
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        now_utc()
    }
}

/// Clock that only moves when told to. All clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock stopped at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock();
        *current = window_end(*current, by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(now_utc())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}

/// In-process rate limit store
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, RateLimitEntry>>,
    clock: Arc<dyn Clock>,
    sweep_probability: f64,
}

impl fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("entries", &self.entries.lock().len())
            .field("sweep_probability", &self.sweep_probability)
            .finish()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create a store on the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store on a custom clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            sweep_probability: DEFAULT_SWEEP_PROBABILITY,
        }
    }

    /// Set how often `check` also sweeps expired entries (0.0 disables)
    pub fn with_sweep_probability(mut self, probability: f64) -> Self {
        self.sweep_probability = probability.clamp(0.0, 1.0);
        self
    }

    /// Count one request for `key`
    pub fn acquire(&self, key: &str, quota: Quota) -> RateLimitDecision {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        if self.sweep_probability > 0.0 && rand::random::<f64>() < self.sweep_probability {
            let swept = sweep(&mut entries, now);
            if swept > 0 {
                tracing::debug!(swept, remaining = entries.len(), "Swept expired rate limit entries");
            }
        }

        let entry = entries
            .entry(key.to_owned())
            .or_insert_with(|| RateLimitEntry::vacant(now, quota));
        entry.max_requests = quota.max_requests;
        entry.window = quota.window;

        let allowed = if entry.count == 0 || entry.is_expired(now) {
            entry.count = 1;
            entry.window_start = now;
            true
        } else {
            let previous = entry.count;
            entry.count = entry.count.saturating_add(1);
            previous < quota.max_requests
        };

        let reset_at = entry.reset_at();
        RateLimitDecision {
            allowed,
            limit: quota.max_requests,
            remaining: quota.max_requests.saturating_sub(entry.count),
            reset_at,
            retry_after_secs: seconds_until(&now, &reset_at).max(1),
        }
    }

    /// Snapshot of the entry for `key`
    pub fn entry(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries.lock().get(key).cloned()
    }

    /// Remove entries whose window has elapsed, returning how many were dropped
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        sweep(&mut self.entries.lock(), now)
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no keys are tracked
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn sweep(entries: &mut HashMap<String, RateLimitEntry>, now: DateTime<Utc>) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    before - entries.len()
}

#[async_trait]
impl RateLimitStore for InMemoryStore {
    async fn check(&self, key: &str, quota: Quota) -> RateLimitDecision {
        self.acquire(key, quota)
    }
}
