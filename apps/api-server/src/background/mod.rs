//! Background maintenance: expired rate-limit state, idle sessions, lapsed
//! lockouts and expired cache entries.

#[cfg(feature = "scheduler")]
mod scheduler;

use std::time::Duration;

use crate::state::AppState;

#[cfg(feature = "scheduler")]
pub use scheduler::{Scheduler, SchedulerConfig};

/// Counts from one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub rate_limit: usize,
    pub auth: usize,
    pub cache: usize,
}

/// One cleanup pass over every component.
pub async fn run_maintenance(state: &AppState) -> MaintenanceReport {
    let report = MaintenanceReport {
        rate_limit: state.limiter.cleanup().await,
        auth: state.auth.cleanup().await,
        cache: state.local_cache.purge_expired(),
    };
    tracing::debug!(
        rate_limit = report.rate_limit,
        auth = report.auth,
        cache = report.cache,
        "Maintenance pass complete"
    );
    report
}

/// Running maintenance; stop it on shutdown.
pub enum Maintenance {
    #[cfg(feature = "scheduler")]
    Scheduled(Scheduler),
    Interval(tokio::task::JoinHandle<()>),
}

impl Maintenance {
    /// Start the periodic cleanup. Uses the job scheduler when compiled in,
    /// otherwise a plain tokio interval.
    pub async fn start(state: AppState, every: Duration) -> Self {
        #[cfg(feature = "scheduler")]
        {
            match Self::scheduled(state.clone(), every).await {
                Ok(scheduler) => return Maintenance::Scheduled(scheduler),
                Err(e) => {
                    tracing::error!("Failed to start scheduler: {}. Falling back to interval.", e)
                }
            }
        }

        Self::interval(state, every)
    }

    #[cfg(feature = "scheduler")]
    async fn scheduled(
        state: AppState,
        every: Duration,
    ) -> Result<Scheduler, tokio_cron_scheduler::JobSchedulerError> {
        let scheduler = Scheduler::new(SchedulerConfig::from_env()).await?;
        scheduler
            .add_repeated("security-maintenance", every, move || {
                let state = state.clone();
                async move {
                    run_maintenance(&state).await;
                }
            })
            .await?;
        scheduler.start().await?;
        Ok(scheduler)
    }

    fn interval(state: AppState, every: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                run_maintenance(&state).await;
            }
        });
        tracing::info!(every_secs = every.as_secs(), "Maintenance interval started");
        Maintenance::Interval(handle)
    }

    pub async fn shutdown(self) {
        match self {
            #[cfg(feature = "scheduler")]
            Maintenance::Scheduled(mut scheduler) => {
                if let Err(e) = scheduler.shutdown().await {
                    tracing::warn!("Scheduler shutdown failed: {}", e);
                }
            }
            Maintenance::Interval(handle) => handle.abort(),
        }
    }
}
