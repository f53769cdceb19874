//! Circuit breaker guarding calls to unreliable dependencies.
//!
//! # States
//! - Closed: calls pass through, consecutive failures are counted
//! - Open: calls fail fast until the cool-down elapses
//! - Half-Open: a limited number of trial calls decide whether to close again
//!
//! ```text
//! Closed --(failures >= threshold)--> Open --(cool-down)--> HalfOpen
//! HalfOpen --(trial failure)--> Open
//! HalfOpen --(half_open_max_calls successes)--> Closed
//! ```
//!
//! All transitions happen under one mutex per breaker. Observers are notified
//! after the lock is released.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

use bulwark_core::AppError;

use crate::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before trial calls are allowed.
    pub cool_down: Duration,
    /// Trial calls admitted while half-open; this many successes close it.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cool_down: Duration::from_secs(60),
            half_open_max_calls: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            failure_threshold: env::parse_or(
                "CIRCUIT_FAILURE_THRESHOLD",
                defaults.failure_threshold,
            ),
            cool_down: env::secs_or("CIRCUIT_COOL_DOWN_SECS", defaults.cool_down),
            half_open_max_calls: env::parse_or(
                "CIRCUIT_HALF_OPEN_MAX_CALLS",
                defaults.half_open_max_calls,
            ),
        }
    }
}

/// Transition hook: `(breaker name, from, to)`.
pub type StateObserver = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

#[derive(Debug, Error)]
pub enum CircuitError<E> {
    #[error("circuit '{0}' is open")]
    Open(String),

    #[error("circuit '{0}' is half-open and at trial capacity")]
    HalfOpenAtCapacity(String),

    #[error(transparent)]
    Inner(E),
}

impl<E> From<CircuitError<E>> for AppError
where
    E: Into<AppError>,
{
    fn from(err: CircuitError<E>) -> Self {
        match err {
            CircuitError::Open(name) | CircuitError::HalfOpenAtCapacity(name) => {
                AppError::circuit_open(name)
            }
            CircuitError::Inner(e) => e.into(),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
    half_open_successes: u32,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            half_open_in_flight: 0,
            half_open_successes: 0,
        }
    }

    fn transition(
        &mut self,
        to: CircuitState,
        now: Instant,
    ) -> Option<(CircuitState, CircuitState)> {
        let from = self.state;
        if from == to {
            return None;
        }

        self.state = to;
        self.half_open_in_flight = 0;
        self.half_open_successes = 0;
        match to {
            CircuitState::Open => self.opened_at = Some(now),
            CircuitState::Closed => {
                self.opened_at = None;
                self.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {}
        }

        Some((from, to))
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    observer: Option<StateObserver>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState::closed()),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: StateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. An open circuit whose cool-down has elapsed reports
    /// half-open only once a call has been attempted.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let guard = self.lock();
        CircuitSnapshot {
            name: self.name.clone(),
            state: guard.state,
            consecutive_failures: guard.consecutive_failures,
        }
    }

    /// Run `f` through the breaker. `f` is not invoked while the circuit is
    /// open or the half-open trial budget is spent. A half-open trial that is
    /// dropped before finishing (cancelled or panicked) counts as a failure.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.acquire()?;

        let outcome = f().await;
        permit.settle();
        match outcome {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitError::Inner(e))
            }
        }
    }

    fn acquire<E>(&self) -> Result<Permit<'_>, CircuitError<E>> {
        let now = Instant::now();
        let mut guard = self.lock();

        let mut changed = None;
        if guard.state == CircuitState::Open {
            let cooled = guard
                .opened_at
                .is_some_and(|at| now.duration_since(at) >= self.config.cool_down);
            if !cooled {
                return Err(CircuitError::Open(self.name.clone()));
            }
            changed = guard.transition(CircuitState::HalfOpen, now);
        }

        let result = match guard.state {
            CircuitState::HalfOpen
                if guard.half_open_in_flight >= self.config.half_open_max_calls =>
            {
                Err(CircuitError::HalfOpenAtCapacity(self.name.clone()))
            }
            CircuitState::HalfOpen => {
                guard.half_open_in_flight += 1;
                Ok(Permit { breaker: self, trial: true, settled: false })
            }
            _ => Ok(Permit { breaker: self, trial: false, settled: false }),
        };

        drop(guard);
        self.notify(changed);
        result
    }

    /// A half-open trial that never reported back.
    fn abandon_trial(&self) {
        let now = Instant::now();
        let mut guard = self.lock();

        let changed = if guard.state == CircuitState::HalfOpen {
            guard.consecutive_failures += 1;
            guard.transition(CircuitState::Open, now)
        } else {
            None
        };

        drop(guard);
        tracing::warn!(circuit = %self.name, "Half-open trial call abandoned");
        self.notify(changed);
    }

    fn record_success(&self) {
        let now = Instant::now();
        let mut guard = self.lock();

        let changed = match guard.state {
            CircuitState::Closed => {
                guard.consecutive_failures = 0;
                None
            }
            CircuitState::HalfOpen => {
                guard.half_open_in_flight = guard.half_open_in_flight.saturating_sub(1);
                guard.half_open_successes += 1;
                if guard.half_open_successes >= self.config.half_open_max_calls {
                    guard.transition(CircuitState::Closed, now)
                } else {
                    None
                }
            }
            // A call admitted before the circuit opened; its result is stale.
            CircuitState::Open => None,
        };

        drop(guard);
        self.notify(changed);
    }

    fn record_failure(&self) {
        let now = Instant::now();
        let mut guard = self.lock();

        let changed = match guard.state {
            CircuitState::Closed => {
                guard.consecutive_failures += 1;
                if guard.consecutive_failures >= self.config.failure_threshold {
                    guard.transition(CircuitState::Open, now)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                guard.consecutive_failures += 1;
                guard.transition(CircuitState::Open, now)
            }
            CircuitState::Open => None,
        };

        drop(guard);
        self.notify(changed);
    }

    fn notify(&self, changed: Option<(CircuitState, CircuitState)>) {
        if let (Some((from, to)), Some(observer)) = (changed, &self.observer) {
            observer(&self.name, from, to);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        // State stays consistent even if a holder panicked; every write is a
        // single assignment sequence with no await in between.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Admission for one call. An unsettled half-open trial releases its slot on
/// drop by reopening the circuit.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.abandon_trial();
        }
    }
}

/// Named breakers, created on first use with a shared config and observer.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    observer: Option<StateObserver>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            observer: None,
            breakers: DashMap::new(),
        }
    }

    pub fn with_observer(mut self, observer: StateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }

        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let mut breaker = CircuitBreaker::new(name, self.config.clone());
                if let Some(observer) = &self.observer {
                    breaker = breaker.with_observer(observer.clone());
                }
                Arc::new(breaker)
            })
            .clone()
    }

    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut all: Vec<_> = self.breakers.iter().map(|b| b.snapshot()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(cool_down: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            cool_down,
            half_open_max_calls: 2,
        }
    }

    async fn fail(
        breaker: &CircuitBreaker,
        calls: &AtomicUsize,
    ) -> Result<(), CircuitError<&'static str>> {
        breaker
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("boom")
            })
            .await
    }

    async fn succeed(
        breaker: &CircuitBreaker,
        calls: &AtomicUsize,
    ) -> Result<(), CircuitError<&'static str>> {
        breaker
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<(), &'static str>(())
            })
            .await
    }

    #[test]
    fn test_from_env_falls_back_to_defaults() {
        let config = CircuitBreakerConfig::from_env();
        let defaults = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, defaults.failure_threshold);
        assert_eq!(config.cool_down, defaults.cool_down);
        assert_eq!(config.half_open_max_calls, defaults.half_open_max_calls);
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_short_circuits() {
        let breaker = CircuitBreaker::new("db", config(Duration::from_secs(60)));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            assert!(matches!(fail(&breaker, &calls).await, Err(CircuitError::Inner(_))));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let result = succeed(&breaker, &calls).await;
        assert!(matches!(result, Err(CircuitError::Open(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3, "open circuit must not invoke f");
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let breaker = CircuitBreaker::new("db", config(Duration::from_secs(60)));
        let calls = AtomicUsize::new(0);

        let _ = fail(&breaker, &calls).await;
        let _ = fail(&breaker, &calls).await;
        succeed(&breaker, &calls).await.unwrap();
        let _ = fail(&breaker, &calls).await;

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_half_open_trials_close_circuit() {
        let breaker = CircuitBreaker::new("api", config(Duration::from_millis(30)));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let _ = fail(&breaker, &calls).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        succeed(&breaker, &calls).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker, &calls).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("api", config(Duration::from_millis(30)));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let _ = fail(&breaker, &calls).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let _ = fail(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(succeed(&breaker, &calls).await, Err(CircuitError::Open(_))));
    }

    #[tokio::test]
    async fn test_observer_sees_transitions() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let breaker = CircuitBreaker::new("cache", config(Duration::from_millis(10)))
            .with_observer(Arc::new(move |_, from, to| {
                sink.lock().unwrap().push((from, to))
            }));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let _ = fail(&breaker, &calls).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        succeed(&breaker, &calls).await.unwrap();
        succeed(&breaker, &calls).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    fn single_trial(cool_down: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 1,
            cool_down,
            half_open_max_calls: 1,
        }
    }

    #[tokio::test]
    async fn test_cancelled_trial_releases_half_open_slot() {
        let breaker = CircuitBreaker::new("slow", single_trial(Duration::from_millis(20)));
        let calls = AtomicUsize::new(0);

        let _ = fail(&breaker, &calls).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let cancelled = tokio::time::timeout(
            Duration::from_millis(5),
            breaker.call(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<(), &'static str>(())
            }),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        succeed(&breaker, &calls).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_panicking_trial_reopens_circuit() {
        use futures::FutureExt;
        use std::panic::AssertUnwindSafe;

        let breaker = CircuitBreaker::new("flaky", single_trial(Duration::from_millis(20)));
        let calls = AtomicUsize::new(0);

        let _ = fail(&breaker, &calls).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let panicked = AssertUnwindSafe(breaker.call(|| async {
            let explode = true;
            if explode {
                panic!("trial call panicked");
            }
            Ok::<(), &'static str>(())
        }))
        .catch_unwind()
        .await;
        assert!(panicked.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        succeed(&breaker, &calls).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_open_maps_to_circuit_breaker_error() {
        let err: AppError = CircuitError::<AppError>::Open("payments".into()).into();
        assert_eq!(err.kind, bulwark_core::ErrorKind::CircuitBreaker);
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn test_registry_reuses_breakers() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        let a = registry.get("db");
        let b = registry.get("db");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.snapshots().len(), 1);
    }
}
