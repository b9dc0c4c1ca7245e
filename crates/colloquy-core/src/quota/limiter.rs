//! Fixed-window rate limiting keyed by identity.
//!
//! Windows are clock-aligned UTC buckets named by their formatted key
//! (`%Y-%m-%d-%H` and `%Y-%m-%d`), so rollover is lazy: a counter whose
//! stored key no longer matches the current window reads as zero. Check
//! and consume happen under one map-entry lock, so an identity never
//! exceeds a limit through interleaving, whatever its concurrency.
//!
//! Admin and super-admin identities bypass quotas entirely and never touch
//! the counters.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use colloquy_types::config::QuotaConfig;
use colloquy_types::conversation::{PermissionTier, UserId};
use colloquy_types::error::QuotaWindow;

/// Counters kept no longer than this past their last consumption; the day
/// bucket is worthless after 25 hours.
const STALE_AFTER_SECS: i64 = 25 * 3600;

#[derive(Debug, Default)]
struct Buckets {
    hour_key: String,
    hour_count: u32,
    day_key: String,
    day_count: u32,
    last_seen: i64,
}

/// Outcome of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed,
    Exceeded {
        window: QuotaWindow,
        limit: u32,
        reset_at: DateTime<Utc>,
    },
}

/// Non-consuming usage snapshot for one identity.
#[derive(Debug, Clone, Copy)]
pub struct QuotaStats {
    pub privileged: bool,
    pub hourly_used: u32,
    pub hourly_limit: u32,
    pub daily_used: u32,
    pub daily_limit: u32,
}

/// In-memory fixed-window rate limiter.
pub struct RateLimiter {
    config: QuotaConfig,
    buckets: DashMap<UserId, Buckets>,
    last_sweep: AtomicI64,
}

impl RateLimiter {
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
            // Zero lets the first maintenance pass sweep immediately.
            last_sweep: AtomicI64::new(0),
        }
    }

    /// Check both windows and consume one unit from each, atomically per
    /// identity.
    ///
    /// A refusal consumes nothing. Privileged tiers always pass and leave
    /// the counters untouched.
    pub fn check_and_consume(
        &self,
        user: UserId,
        tier: PermissionTier,
        now: DateTime<Utc>,
    ) -> QuotaDecision {
        if tier.is_privileged() {
            return QuotaDecision::Allowed;
        }

        let hour_key = now.format("%Y-%m-%d-%H").to_string();
        let day_key = now.format("%Y-%m-%d").to_string();

        // The entry guard holds the shard lock, making check-and-consume
        // one atomic step for this identity.
        let mut entry = self.buckets.entry(user).or_default();
        if entry.hour_key != hour_key {
            entry.hour_key = hour_key;
            entry.hour_count = 0;
        }
        if entry.day_key != day_key {
            entry.day_key = day_key;
            entry.day_count = 0;
        }

        if entry.hour_count >= self.config.hourly_limit {
            return QuotaDecision::Exceeded {
                window: QuotaWindow::Hourly,
                limit: self.config.hourly_limit,
                reset_at: next_window(now, 3600),
            };
        }
        if entry.day_count >= self.config.daily_limit {
            return QuotaDecision::Exceeded {
                window: QuotaWindow::Daily,
                limit: self.config.daily_limit,
                reset_at: next_window(now, 86_400),
            };
        }

        entry.hour_count += 1;
        entry.day_count += 1;
        entry.last_seen = now.timestamp();
        QuotaDecision::Allowed
    }

    /// Current usage without consuming anything.
    pub fn stats(&self, user: UserId, tier: PermissionTier, now: DateTime<Utc>) -> QuotaStats {
        let hour_key = now.format("%Y-%m-%d-%H").to_string();
        let day_key = now.format("%Y-%m-%d").to_string();
        let (hourly_used, daily_used) = self
            .buckets
            .get(&user)
            .map(|buckets| {
                (
                    if buckets.hour_key == hour_key {
                        buckets.hour_count
                    } else {
                        0
                    },
                    if buckets.day_key == day_key {
                        buckets.day_count
                    } else {
                        0
                    },
                )
            })
            .unwrap_or((0, 0));
        QuotaStats {
            privileged: tier.is_privileged(),
            hourly_used,
            hourly_limit: self.config.hourly_limit,
            daily_used,
            daily_limit: self.config.daily_limit,
        }
    }

    /// Drop counters of identities idle past the daily window. Runs at
    /// most once per configured sweep interval; extra calls are free.
    pub fn maybe_sweep(&self, now: DateTime<Utc>) -> usize {
        let ts = now.timestamp();
        let last = self.last_sweep.load(Ordering::Relaxed);
        if ts - last < self.config.sweep_interval_secs as i64 {
            return 0;
        }
        if self
            .last_sweep
            .compare_exchange(last, ts, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return 0;
        }
        let cutoff = ts - STALE_AFTER_SECS;
        let before = self.buckets.len();
        self.buckets.retain(|_, buckets| buckets.last_seen >= cutoff);
        let removed = before - self.buckets.len();
        if removed > 0 {
            debug!(removed, "swept stale quota counters");
        }
        removed
    }

    pub fn tracked_identities(&self) -> usize {
        self.buckets.len()
    }
}

/// Start of the next window of `width_secs` (clock-aligned, UTC).
fn next_window(now: DateTime<Utc>, width_secs: i64) -> DateTime<Utc> {
    let ts = now.timestamp();
    let next = ts - ts.rem_euclid(width_secs) + width_secs;
    DateTime::from_timestamp(next, 0).unwrap_or(now)
}
