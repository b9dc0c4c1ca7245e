//! Per-identity request quotas over fixed clock-aligned windows.

pub mod limiter;

pub use limiter::{QuotaDecision, QuotaStats, RateLimiter};
