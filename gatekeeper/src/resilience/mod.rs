//! Resilience wrappers for calls to unreliable external providers.

pub mod circuit_breaker;

pub use circuit_breaker::{
    BreakerConfig, CircuitBreaker, CircuitError, CircuitSnapshot, CircuitState, ServiceHealth,
    SharedCircuitBreaker,
};
