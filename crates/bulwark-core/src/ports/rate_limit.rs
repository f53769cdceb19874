//! Sliding-window counter port.

use async_trait::async_trait;
use std::time::Duration;

use super::CacheError;

/// Result of recording one hit against a sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOutcome {
    pub allowed: bool,
    /// Hits inside the trailing window, including this one when allowed.
    pub count: u32,
    /// Time until the oldest counted hit leaves the window. Zero when allowed.
    pub retry_after: Duration,
}

impl WindowOutcome {
    pub fn remaining(&self, limit: u32) -> u32 {
        limit.saturating_sub(self.count)
    }
}

/// Trailing-window hit counter.
///
/// A hit is admitted only while fewer than `limit` hits were admitted in the
/// last `window`; rejected hits are not recorded. Every implementation must
/// agree on this so that swapping backends changes visibility, not decisions.
#[async_trait]
pub trait SlidingWindow: Send + Sync {
    async fn hit(&self, key: &str, limit: u32, window: Duration)
    -> Result<WindowOutcome, CacheError>;

    /// Drop windows with no hits inside `window`. Returns how many were removed.
    async fn cleanup(&self, _window: Duration) -> usize {
        0
    }

    /// Number of tracked keys, when the backend can tell cheaply.
    async fn tracked_keys(&self) -> usize {
        0
    }

    fn backend(&self) -> &'static str;
}
