//! Multi-tier rate limiting: governor token buckets for the global and per-IP
//! budgets, sliding windows for the per-user and per-endpoint budgets.

mod config;
mod limiter;

pub use config::{RateLimiterConfig, TierLimit};
pub use limiter::{LimitScope, RateLimitDecision, RateLimitStats, RateLimiter};
