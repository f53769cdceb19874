//! Bounded usage-recording queue.
//!
//! Successful verifications enqueue a usage record without waiting; a single
//! worker appends it to the repository and bumps the key's counters. When the
//! queue is full the record is dropped and counted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use bulwark_core::domain::ApiKeyUsage;
use bulwark_core::ports::ApiKeyRepository;

#[derive(Default)]
struct UsageCounters {
    recorded: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of the usage queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct UsageStats {
    pub recorded: u64,
    pub dropped: u64,
    pub failed: u64,
}

pub struct UsageRecorder {
    sender: mpsc::Sender<ApiKeyUsage>,
    counters: Arc<UsageCounters>,
}

impl UsageRecorder {
    /// Start the worker on the current runtime. It exits once the recorder
    /// is dropped and the queue drains.
    pub fn spawn(repo: Arc<dyn ApiKeyRepository>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<ApiKeyUsage>(capacity.max(1));
        let counters = Arc::new(UsageCounters::default());
        let worker_counters = counters.clone();

        tokio::spawn(async move {
            tracing::info!("API key usage worker started");

            while let Some(usage) = rx.recv().await {
                let result = match repo.append_usage(&usage).await {
                    Ok(()) => repo.touch(usage.api_key_id, usage.timestamp).await,
                    Err(e) => Err(e),
                };

                match result {
                    Ok(()) => {
                        worker_counters.recorded.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        worker_counters.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(
                            api_key_id = %usage.api_key_id,
                            error = %e,
                            "Failed to record API key usage"
                        );
                    }
                }
            }

            tracing::info!("API key usage worker shutting down");
        });

        Self {
            sender: tx,
            counters,
        }
    }

    /// Enqueue without waiting. Never fails the caller.
    pub fn record(&self, usage: ApiKeyUsage) {
        match self.sender.try_send(usage) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(usage)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(api_key_id = %usage.api_key_id, "Usage queue full, record dropped");
            }
            Err(mpsc::error::TrySendError::Closed(usage)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    api_key_id = %usage.api_key_id,
                    "Usage worker stopped, record dropped"
                );
            }
        }
    }

    pub fn stats(&self) -> UsageStats {
        UsageStats {
            recorded: self.counters.recorded.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Records waiting for the worker.
    pub fn pending(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    #[cfg(test)]
    fn detached(capacity: usize) -> (Self, mpsc::Receiver<ApiKeyUsage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                sender: tx,
                counters: Arc::new(UsageCounters::default()),
            },
            rx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use uuid::Uuid;

    use crate::api_key::InMemoryApiKeyRepository;

    fn usage(api_key_id: Uuid) -> ApiKeyUsage {
        ApiKeyUsage {
            id: Uuid::new_v4(),
            api_key_id,
            ip_address: "10.0.0.1".to_string(),
            user_agent: "test".to_string(),
            endpoint: "/api/external/ping".to_string(),
            method: "GET".to_string(),
            timestamp: Utc::now(),
            success: true,
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_and_counts() {
        let (recorder, _rx) = UsageRecorder::detached(1);
        let id = Uuid::new_v4();

        recorder.record(usage(id));
        recorder.record(usage(id));

        assert_eq!(recorder.pending(), 1);
        assert_eq!(recorder.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_worker_failure_is_counted() {
        let repo = Arc::new(InMemoryApiKeyRepository::new());
        let recorder = UsageRecorder::spawn(repo.clone(), 8);

        // Unknown key: the append succeeds but the counter bump cannot.
        let id = Uuid::new_v4();
        recorder.record(usage(id));

        for _ in 0..50 {
            if recorder.stats().failed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(recorder.stats().failed, 1);
        assert_eq!(repo.usage_for(id).len(), 1);
    }
}
