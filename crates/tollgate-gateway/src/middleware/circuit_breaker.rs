//! Per-backend circuit breaker.
//!
//! ```text
//!            failures >= failure_threshold
//!   Closed ─────────────────────────────────► Open
//!     ▲                                         │ open_timeout elapsed
//!     │ successes >= success_threshold          ▼ (checked on next call)
//!     └────────────────────────────────────  HalfOpen ── any failure ──► Open
//! ```
//!
//! Only bookkeeping happens under the lock; the guarded call itself runs
//! unlocked.  Every transition bumps a generation counter and outcomes are
//! recorded only against the generation that admitted the call, so late
//! results from an earlier state never move the breaker.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tollgate_kernel::gateway::{CircuitBreakerConfig, GatewayConfig, GatewayResponse};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        })
    }
}

/// Decides whether a guarded call counts as a breaker failure.
pub trait CallOutcome {
    fn is_failure(&self) -> bool;
}

impl CallOutcome for GatewayResponse {
    fn is_failure(&self) -> bool {
        self.is_server_error()
    }
}

impl<T: CallOutcome, E> CallOutcome for Result<T, E> {
    fn is_failure(&self) -> bool {
        match self {
            Ok(value) => value.is_failure(),
            Err(_) => true,
        }
    }
}

/// Returned instead of invoking the call while the circuit rejects traffic.
#[derive(Debug, Clone, Error)]
#[error("circuit open for backend '{backend}'")]
pub struct CircuitOpen {
    pub backend: String,
    /// Time until the breaker will admit a trial call.
    pub retry_after: Duration,
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub backend: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    pub half_open_in_flight: u32,
}

struct BreakerCore {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_in_flight: u32,
    last_transition: Instant,
    generation: u64,
}

/// Admission ticket for one guarded call.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl Permit<'_> {
    fn settle(mut self, failed: bool) {
        self.settled = true;
        self.breaker.record(self.generation, self.trial, failed);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        // A cancelled trial call gives its half-open slot back.
        if !self.settled && self.trial {
            self.breaker.release_trial(self.generation);
        }
    }
}

pub struct CircuitBreaker {
    backend: String,
    config: CircuitBreakerConfig,
    core: Mutex<BreakerCore>,
}

impl CircuitBreaker {
    pub fn new(backend: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            backend: backend.into(),
            config,
            core: Mutex::new(BreakerCore {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                half_open_in_flight: 0,
                last_transition: Instant::now(),
                generation: 0,
            }),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Current state as last recorded; an expired open timeout is only
    /// acted upon by the next call.
    pub fn state(&self) -> CircuitState {
        self.core.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let core = self.core.lock();
        BreakerSnapshot {
            backend: self.backend.clone(),
            state: core.state,
            consecutive_failures: core.consecutive_failures,
            half_open_successes: core.half_open_successes,
            half_open_in_flight: core.half_open_in_flight,
        }
    }

    /// Run `call` under the breaker.
    ///
    /// While open (or half-open with every trial slot taken) `call` is never
    /// invoked and [`CircuitOpen`] is returned.  Otherwise the outcome is
    /// recorded according to [`CallOutcome::is_failure`] and handed back.
    pub async fn execute<F, Fut, T>(&self, call: F) -> Result<T, CircuitOpen>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
        T: CallOutcome,
    {
        let permit = self.acquire()?;
        let outcome = call().await;
        permit.settle(outcome.is_failure());
        Ok(outcome)
    }

    fn acquire(&self) -> Result<Permit<'_>, CircuitOpen> {
        let now = Instant::now();
        let mut core = self.core.lock();

        if core.state == CircuitState::Open {
            let elapsed = now.saturating_duration_since(core.last_transition);
            let open_timeout = self.config.open_timeout();
            if elapsed < open_timeout {
                return Err(self.rejection(open_timeout - elapsed));
            }
            self.transition(&mut core, CircuitState::HalfOpen, now);
        }

        let trial = core.state == CircuitState::HalfOpen;
        if trial {
            if core.half_open_in_flight >= self.config.half_open_max_requests {
                return Err(self.rejection(Duration::ZERO));
            }
            core.half_open_in_flight += 1;
        }

        Ok(Permit {
            breaker: self,
            generation: core.generation,
            trial,
            settled: false,
        })
    }

    fn record(&self, generation: u64, trial: bool, failed: bool) {
        let now = Instant::now();
        let mut core = self.core.lock();
        if core.generation != generation {
            return;
        }

        match core.state {
            CircuitState::Closed => {
                if failed {
                    core.consecutive_failures += 1;
                    if core.consecutive_failures >= self.config.failure_threshold {
                        self.transition(&mut core, CircuitState::Open, now);
                    }
                } else {
                    core.consecutive_failures = 0;
                }
            }
            CircuitState::HalfOpen => {
                if trial {
                    core.half_open_in_flight = core.half_open_in_flight.saturating_sub(1);
                }
                if failed {
                    self.transition(&mut core, CircuitState::Open, now);
                } else {
                    core.half_open_successes += 1;
                    if core.half_open_successes >= self.config.success_threshold {
                        self.transition(&mut core, CircuitState::Closed, now);
                    }
                }
            }
            CircuitState::Open => {}
        }
    }

    fn release_trial(&self, generation: u64) {
        let mut core = self.core.lock();
        if core.generation == generation && core.state == CircuitState::HalfOpen {
            core.half_open_in_flight = core.half_open_in_flight.saturating_sub(1);
        }
    }

    fn transition(&self, core: &mut BreakerCore, to: CircuitState, now: Instant) {
        let from = core.state;
        core.state = to;
        core.last_transition = now;
        core.generation += 1;
        core.half_open_in_flight = 0;
        match to {
            CircuitState::Closed => {
                core.consecutive_failures = 0;
                core.half_open_successes = 0;
            }
            CircuitState::Open | CircuitState::HalfOpen => core.half_open_successes = 0,
        }

        if to == CircuitState::Open {
            warn!(
                backend = %self.backend,
                %from,
                consecutive_failures = core.consecutive_failures,
                "circuit opened"
            );
        } else {
            info!(backend = %self.backend, %from, to = %to, "circuit state changed");
        }
    }

    fn rejection(&self, retry_after: Duration) -> CircuitOpen {
        CircuitOpen {
            backend: self.backend.clone(),
            retry_after,
        }
    }
}

/// Lazily creates one breaker per backend name.
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            overrides: HashMap::new(),
            breakers: DashMap::new(),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            default_config: config.circuit_breaker.clone(),
            overrides: config.circuit_breakers.clone(),
            breakers: DashMap::new(),
        }
    }

    /// The breaker for `backend`, created on first use.
    pub fn get(&self, backend: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(backend) {
            return breaker.clone();
        }
        self.breakers
            .entry(backend.to_string())
            .or_insert_with(|| {
                let config = self
                    .overrides
                    .get(backend)
                    .unwrap_or(&self.default_config)
                    .clone();
                Arc::new(CircuitBreaker::new(backend, config))
            })
            .clone()
    }

    /// Snapshots of every breaker created so far, sorted by backend.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut all: Vec<_> = self.breakers.iter().map(|b| b.snapshot()).collect();
        all.sort_by(|a, b| a.backend.cmp(&b.backend));
        all
    }
}
