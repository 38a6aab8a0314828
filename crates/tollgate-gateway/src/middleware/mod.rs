//! Admission control engines shared by the filters and the aggregator.

pub mod circuit_breaker;
pub mod rate_limit;

pub use circuit_breaker::{
    BreakerSnapshot, CallOutcome, CircuitBreaker, CircuitBreakerRegistry, CircuitOpen,
    CircuitState,
};
pub use rate_limit::{RateLimiter, client_key};
