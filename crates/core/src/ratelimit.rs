//! Request-rate gate consulted by the routing layer before it calls the engine.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Outcome of a rate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// How long to wait before the next request would be admitted.
    pub retry_after: Duration,
}

impl RateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after: Duration::ZERO,
        }
    }

    fn deny(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after,
        }
    }
}

/// Token-bucket rate limiting with explicit blocking.
///
/// `rate` tokens are replenished every `window`, up to `burst`.
pub trait RateGate: Send + Sync {
    fn allow(&self, key: &str, rate: u32, burst: u32, window: Duration) -> RateDecision;

    /// Whether `key` is currently blocked outright.
    fn blocked(&self, key: &str) -> bool;

    /// Block `key` for `duration`, regardless of its bucket.
    fn block(&self, key: &str, duration: Duration);
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// In-process [`RateGate`] for single-node deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryRateGate {
    buckets: DashMap<String, Bucket>,
    /// Block deadlines. `None` blocks until the process restarts.
    blocks: DashMap<String, Option<Instant>>,
}

impl MemoryRateGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn allow_at(&self, key: &str, rate: u32, burst: u32, window: Duration, now: Instant) -> RateDecision {
        if rate == 0 || burst == 0 || window.is_zero() {
            return RateDecision::deny(window);
        }
        let per_second = f64::from(rate) / window.as_secs_f64();
        let capacity = f64::from(burst);

        let mut entry = self.buckets.entry(key.to_owned()).or_insert(Bucket {
            tokens: capacity,
            refilled_at: now,
        });
        let bucket = entry.value_mut();
        let elapsed = now.saturating_duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * per_second).min(capacity);
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateDecision::allow()
        } else {
            let missing = 1.0 - bucket.tokens;
            RateDecision::deny(Duration::from_secs_f64(missing / per_second))
        }
    }

    fn blocked_at(&self, key: &str, now: Instant) -> bool {
        let expired = match self.blocks.get(key) {
            Some(until) => until.is_some_and(|until| until <= now),
            None => return false,
        };
        if expired {
            self.blocks
                .remove_if(key, |_, until| until.is_some_and(|until| until <= now));
            return false;
        }
        true
    }

    fn block_at(&self, key: &str, duration: Duration, now: Instant) {
        self.blocks.insert(key.to_owned(), now.checked_add(duration));
    }
}

impl RateGate for MemoryRateGate {
    fn allow(&self, key: &str, rate: u32, burst: u32, window: Duration) -> RateDecision {
        self.allow_at(key, rate, burst, window, Instant::now())
    }

    fn blocked(&self, key: &str) -> bool {
        self.blocked_at(key, Instant::now())
    }

    fn block(&self, key: &str, duration: Duration) {
        self.block_at(key, duration, Instant::now());
    }
}
