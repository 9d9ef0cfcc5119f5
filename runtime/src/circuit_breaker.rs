//! Circuit breaker for the queue and persistence calls of the pipeline.
//!
//! A breaker watches one dependency. After enough consecutive failures it
//! "opens" and rejects calls immediately, so a degraded broker or database
//! does not hold request tasks and connections hostage.
//!
//! # States
//!
//! - **Closed**: calls pass through; consecutive failures are counted and the
//!   counter is cleared every `stats_interval` even without a transition.
//! - **Open**: calls are rejected without running. After `open_timeout` the
//!   next caller moves the breaker to half-open.
//! - **HalfOpen**: exactly one probe call is in flight at a time; other
//!   callers are rejected as if open. `success_threshold` consecutive probe
//!   successes close the breaker, any failure reopens it.
//!
//! Every call runs under `call_timeout`; a timeout counts as a failure.
//! [`CircuitBreaker::execute_classified`] lets the caller exclude errors that
//! say nothing about the dependency's health (a business conflict, say) from
//! the failure count.
//!
//! # Example
//!
//! ```rust
//! use flashsale_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig::builder()
//!     .failure_threshold(5)
//!     .open_timeout(Duration::from_secs(10))
//!     .call_timeout(Duration::from_millis(500))
//!     .build();
//!
//! let breaker = CircuitBreaker::new("queue", config);
//!
//! match breaker.execute(|| async { Ok::<_, String>(42) }).await {
//!     Ok(result) => println!("Success: {result}"),
//!     Err(e) => println!("Failed: {e}"),
//! }
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,
    /// Time spent open before a probe is allowed
    pub open_timeout: Duration,
    /// Interval after which the closed-state failure counter is cleared
    pub stats_interval: Duration,
    /// Deadline for each wrapped call
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(10),
            stats_interval: Duration::from_secs(60),
            call_timeout: Duration::from_secs(1),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub const fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder {
            failure_threshold: None,
            success_threshold: None,
            open_timeout: None,
            stats_interval: None,
            call_timeout: None,
        }
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: Option<u32>,
    success_threshold: Option<u32>,
    open_timeout: Option<Duration>,
    stats_interval: Option<Duration>,
    call_timeout: Option<Duration>,
}

impl CircuitBreakerConfigBuilder {
    /// Circuit opens after this many consecutive failures.
    #[must_use]
    pub const fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// Half-open successes needed to close the circuit.
    #[must_use]
    pub const fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = Some(threshold);
        self
    }

    /// How long to stay open before probing.
    #[must_use]
    pub const fn open_timeout(mut self, duration: Duration) -> Self {
        self.open_timeout = Some(duration);
        self
    }

    /// How often the closed-state failure counter is cleared.
    #[must_use]
    pub const fn stats_interval(mut self, duration: Duration) -> Self {
        self.stats_interval = Some(duration);
        self
    }

    /// Deadline for each wrapped call.
    #[must_use]
    pub const fn call_timeout(mut self, duration: Duration) -> Self {
        self.call_timeout = Some(duration);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> CircuitBreakerConfig {
        let defaults = CircuitBreakerConfig::default();
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(defaults.failure_threshold).max(1),
            success_threshold: self.success_threshold.unwrap_or(defaults.success_threshold).max(1),
            open_timeout: self.open_timeout.unwrap_or(defaults.open_timeout),
            stats_interval: self.stats_interval.unwrap_or(defaults.stats_interval),
            call_timeout: self.call_timeout.unwrap_or(defaults.call_timeout),
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Requests pass through normally
    Closed,
    /// Requests fail immediately
    Open,
    /// One probe at a time tests whether the dependency recovered
    HalfOpen,
}

impl State {
    /// Lowercase name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    const fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

/// Errors from circuit breaker operations.
#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open (or a half-open probe is already in flight)
    #[error("Circuit breaker '{name}' is open")]
    Open {
        /// Breaker name
        name: String,
    },
    /// Call exceeded the per-call timeout
    #[error("Call through '{name}' timed out after {after:?}")]
    Timeout {
        /// Breaker name
        name: String,
        /// The configured deadline
        after: Duration,
    },
    /// Operation failed
    #[error("Operation failed: {0}")]
    Inner(E),
}

/// Point-in-time view of a breaker, for readiness reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    /// Breaker name
    pub name: String,
    /// Current state
    pub state: State,
    /// Consecutive failures in the current window
    pub consecutive_failures: u32,
    /// Consecutive half-open successes
    pub consecutive_successes: u32,
    /// Wall-clock time of the last state change
    pub last_transition_at: DateTime<Utc>,
}

#[derive(Debug)]
struct BreakerState {
    state: State,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_transition: Instant,
    last_transition_at: DateTime<Utc>,
    window_started: Instant,
}

/// Admission of one call; holds the probe slot when half-open.
struct Permit<'a> {
    _probe: Option<ProbeGuard<'a>>,
}

/// Releases the half-open probe slot, also when the caller's future is dropped.
struct ProbeGuard<'a>(&'a AtomicBool);

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Named circuit breaker.
///
/// Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    state: Arc<RwLock<BreakerState>>,
    probe_in_flight: Arc<AtomicBool>,
    total_calls: Arc<AtomicU64>,
    total_successes: Arc<AtomicU64>,
    total_failures: Arc<AtomicU64>,
    total_timeouts: Arc<AtomicU64>,
    total_rejections: Arc<AtomicU64>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name: String = name.into();
        let now = Instant::now();
        metrics::gauge!("flashsale_circuit_breaker_state", "breaker" => name.clone())
            .set(State::Closed.gauge_value());

        Self {
            name: Arc::from(name),
            config: Arc::new(config),
            state: Arc::new(RwLock::new(BreakerState {
                state: State::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_transition: now,
                last_transition_at: Utc::now(),
                window_started: now,
            })),
            probe_in_flight: Arc::new(AtomicBool::new(false)),
            total_calls: Arc::new(AtomicU64::new(0)),
            total_successes: Arc::new(AtomicU64::new(0)),
            total_failures: Arc::new(AtomicU64::new(0)),
            total_timeouts: Arc::new(AtomicU64::new(0)),
            total_rejections: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Breaker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub async fn state(&self) -> State {
        self.state.read().await.state
    }

    /// Current state with counters.
    pub async fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state.read().await;
        BreakerSnapshot {
            name: self.name.to_string(),
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            last_transition_at: state.last_transition_at,
        }
    }

    /// Run `operation` through the breaker under the per-call timeout.
    ///
    /// Every error counts as a failure; see
    /// [`execute_classified`](Self::execute_classified).
    ///
    /// # Errors
    ///
    /// - [`CircuitBreakerError::Open`] if the call was rejected without running
    /// - [`CircuitBreakerError::Timeout`] if it exceeded `call_timeout`
    /// - [`CircuitBreakerError::Inner`] if the operation itself failed
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_classified(operation, |_| true).await
    }

    /// Like [`execute`](Self::execute), but an error for which
    /// `is_failure` returns `false` is passed through without touching the
    /// breaker's failure accounting; the dependency answered.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute).
    pub async fn execute_classified<F, Fut, T, E, C>(
        &self,
        operation: F,
        is_failure: C,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> bool,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let Some(permit) = self.try_acquire().await else {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("flashsale_circuit_breaker_rejections_total", "breaker" => self.name.to_string())
                .increment(1);
            tracing::debug!(breaker = %self.name, "Circuit open, rejecting call");
            return Err(CircuitBreakerError::Open {
                name: self.name.to_string(),
            });
        };

        let result = tokio::time::timeout(self.config.call_timeout, operation()).await;

        match result {
            Ok(Ok(value)) => {
                self.on_success().await;
                self.total_successes.fetch_add(1, Ordering::Relaxed);
                drop(permit);
                Ok(value)
            }
            Ok(Err(err)) => {
                if is_failure(&err) {
                    self.on_failure().await;
                    self.total_failures.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.on_success().await;
                }
                drop(permit);
                Err(CircuitBreakerError::Inner(err))
            }
            Err(_elapsed) => {
                self.on_failure().await;
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                self.total_timeouts.fetch_add(1, Ordering::Relaxed);
                drop(permit);
                tracing::warn!(
                    breaker = %self.name,
                    timeout_ms = self.config.call_timeout.as_millis(),
                    "Call timed out"
                );
                Err(CircuitBreakerError::Timeout {
                    name: self.name.to_string(),
                    after: self.config.call_timeout,
                })
            }
        }
    }

    /// Time until an open breaker lets a probe through.
    ///
    /// `None` when closed; zero once the open timeout has elapsed or while a
    /// half-open probe decides the outcome.
    pub async fn retry_in(&self) -> Option<Duration> {
        let state = self.state.read().await;
        match state.state {
            State::Closed => None,
            State::HalfOpen => Some(Duration::ZERO),
            State::Open => Some(
                self.config
                    .open_timeout
                    .saturating_sub(state.last_transition.elapsed()),
            ),
        }
    }

    /// Decide whether a call may run now.
    async fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut state = self.state.write().await;
        let now = Instant::now();

        match state.state {
            State::Closed => {
                if now.duration_since(state.window_started) >= self.config.stats_interval {
                    state.consecutive_failures = 0;
                    state.window_started = now;
                }
                Some(Permit { _probe: None })
            }
            State::Open => {
                if now.duration_since(state.last_transition) < self.config.open_timeout {
                    return None;
                }
                self.transition(&mut state, State::HalfOpen);
                self.claim_probe()
            }
            State::HalfOpen => self.claim_probe(),
        }
    }

    fn claim_probe(&self) -> Option<Permit<'_>> {
        self.probe_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Permit {
                _probe: Some(ProbeGuard(&self.probe_in_flight)),
            })
    }

    async fn on_success(&self) {
        let mut state = self.state.write().await;

        match state.state {
            State::Closed => {
                state.consecutive_failures = 0;
            }
            State::HalfOpen => {
                state.consecutive_successes += 1;
                if state.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut state, State::Closed);
                }
            }
            // A call admitted before the circuit opened finished late
            State::Open => {}
        }
    }

    async fn on_failure(&self) {
        let mut state = self.state.write().await;

        match state.state {
            State::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut state, State::Open);
                }
            }
            State::HalfOpen => {
                state.consecutive_failures += 1;
                self.transition(&mut state, State::Open);
            }
            State::Open => {}
        }
    }

    fn transition(&self, state: &mut BreakerState, to: State) {
        let from = state.state;
        if from == to {
            return;
        }

        match to {
            State::Open => tracing::warn!(
                breaker = %self.name,
                from = from.as_str(),
                to = to.as_str(),
                failures = state.consecutive_failures,
                "Circuit breaker opened"
            ),
            State::HalfOpen | State::Closed => tracing::info!(
                breaker = %self.name,
                from = from.as_str(),
                to = to.as_str(),
                "Circuit breaker state change"
            ),
        }

        let now = Instant::now();
        state.state = to;
        state.last_transition = now;
        state.last_transition_at = Utc::now();
        state.consecutive_successes = 0;
        if to != State::Open {
            state.consecutive_failures = 0;
            state.window_started = now;
        }

        metrics::counter!(
            "flashsale_circuit_breaker_transitions_total",
            "breaker" => self.name.to_string(),
            "to" => to.as_str()
        )
        .increment(1);
        metrics::gauge!("flashsale_circuit_breaker_state", "breaker" => self.name.to_string())
            .set(to.gauge_value());
    }

    /// Call counters since creation.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    /// Force the breaker closed.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        tracing::info!(breaker = %self.name, "Circuit breaker manually reset");
        self.transition(&mut state, State::Closed);
        state.consecutive_failures = 0;
    }
}

/// Call counters for one breaker.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerMetrics {
    /// Calls attempted
    pub total_calls: u64,
    /// Calls that succeeded
    pub total_successes: u64,
    /// Calls that failed, timeouts included
    pub total_failures: u64,
    /// Calls that timed out
    pub total_timeouts: u64,
    /// Calls rejected without running
    pub total_rejections: u64,
}
