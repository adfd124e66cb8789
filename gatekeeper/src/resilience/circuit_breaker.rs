//! Per-service circuit breaker for outbound provider calls.
//!
//! Each external service id (trace, verification, messaging provider) gets
//! its own circuit, created lazily on first use and kept for the lifetime of
//! the breaker. Consecutive failures trip the circuit *open*; calls are then
//! rejected without reaching the provider. Once the reset timeout has elapsed
//! the next query moves it to *half-open*, where enough successes close it
//! again and a single failure re-opens it.
//!
//! ```text
//! closed --(failures >= failure_threshold)--> open
//! open   --(reset_timeout elapsed, on query)--> half_open
//! half_open --(successes >= half_open_success_threshold)--> closed
//! half_open --(any failure)--> open
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::SharedClock;

/// Circuit breaker state for a single service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Healthy: requests allowed.
    Closed,
    /// Tripped: requests blocked until the reset timeout expires.
    Open,
    /// Reset timeout expired: probe requests allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Coarse provider health derived from the circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceHealth {
    Ok,
    Degraded,
    Down,
}

impl From<CircuitState> for ServiceHealth {
    fn from(state: CircuitState) -> Self {
        match state {
            CircuitState::Closed => Self::Ok,
            CircuitState::HalfOpen => Self::Degraded,
            CircuitState::Open => Self::Down,
        }
    }
}

/// Thresholds for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Seconds an open circuit waits before allowing probes.
    pub reset_timeout_secs: u64,
    /// Successes in half-open needed to close the circuit.
    pub half_open_success_threshold: u32,
    /// Upper bound on a single provider call.
    pub call_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_secs: 30,
            half_open_success_threshold: 2,
            call_timeout_ms: 10_000,
        }
    }
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reset_timeout_secs as i64)
    }

    pub fn call_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.call_timeout_ms)
    }
}

/// Error returned by [`CircuitBreaker::execute`].
///
/// `Operation` carries the provider's own error untouched.
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    #[error("circuit open for service '{service}'")]
    Open { service: String },

    #[error("call to '{service}' timed out after {timeout_ms}ms")]
    Timeout { service: String, timeout_ms: u64 },

    #[error("{0}")]
    Operation(E),
}

impl<E> CircuitError<E> {
    /// Whether the breaker (rather than the provider) produced this error.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Point-in-time view of one service's circuit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub half_open_success_count: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejected: u64,
}

#[derive(Debug, Clone)]
struct ServiceCircuit {
    state: CircuitState,
    failures: u32,
    last_failure_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    half_open_successes: u32,
    total_successes: u64,
    total_failures: u64,
    total_rejected: u64,
}

impl ServiceCircuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            last_failure_at: None,
            opened_at: None,
            half_open_successes: 0,
            total_successes: 0,
            total_failures: 0,
            total_rejected: 0,
        }
    }

    /// Lazy open → half-open transition, evaluated whenever the circuit is queried.
    fn refresh(&mut self, service: &str, config: &BreakerConfig, now: DateTime<Utc>) {
        if self.state != CircuitState::Open {
            return;
        }
        let Some(opened_at) = self.opened_at else {
            return;
        };
        if now - opened_at >= config.reset_timeout() {
            self.state = CircuitState::HalfOpen;
            self.half_open_successes = 0;
            info!(service = %service, "circuit breaker: open → half_open");
        }
    }

    fn open(&mut self, service: &str, now: DateTime<Utc>) {
        let from = self.state;
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.half_open_successes = 0;
        warn!(
            service = %service,
            failures = self.failures,
            "circuit breaker: {} → open",
            from
        );
    }
}

/// Process-wide map of circuits keyed by service id.
///
/// Share it behind an [`Arc`]; every per-service update happens under one
/// short, synchronous lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    default_config: BreakerConfig,
    overrides: HashMap<String, BreakerConfig>,
    circuits: Mutex<HashMap<String, ServiceCircuit>>,
    clock: SharedClock,
}

/// Shared reference to a CircuitBreaker
pub type SharedCircuitBreaker = Arc<CircuitBreaker>;

impl CircuitBreaker {
    /// Create a breaker applying `default_config` to every service.
    pub fn new(default_config: BreakerConfig, clock: SharedClock) -> Self {
        Self {
            default_config,
            overrides: HashMap::new(),
            circuits: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Override the thresholds for one service.
    pub fn with_service_config(mut self, service: impl Into<String>, config: BreakerConfig) -> Self {
        self.overrides.insert(service.into(), config);
        self
    }

    /// Create a shared reference to this breaker
    pub fn shared(self) -> SharedCircuitBreaker {
        Arc::new(self)
    }

    /// Thresholds in force for `service`.
    pub fn config_for(&self, service: &str) -> &BreakerConfig {
        self.overrides.get(service).unwrap_or(&self.default_config)
    }

    fn circuits(&self) -> MutexGuard<'_, HashMap<String, ServiceCircuit>> {
        // A panic mid-update leaves counters that are still meaningful.
        self.circuits.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_circuit<R>(&self, service: &str, f: impl FnOnce(&mut ServiceCircuit) -> R) -> R {
        let config = self.config_for(service);
        let now = self.clock.now();
        let mut circuits = self.circuits();
        let circuit = circuits
            .entry(service.to_string())
            .or_insert_with(ServiceCircuit::new);
        circuit.refresh(service, config, now);
        f(circuit)
    }

    /// Current state of the circuit for `service`.
    ///
    /// Performs the open → half-open transition when the reset timeout has
    /// elapsed.
    pub fn state(&self, service: &str) -> CircuitState {
        self.with_circuit(service, |c| c.state)
    }

    /// Whether calls to `service` are currently rejected.
    pub fn is_open(&self, service: &str) -> bool {
        self.state(service) == CircuitState::Open
    }

    /// Coarse health of `service`.
    pub fn health(&self, service: &str) -> ServiceHealth {
        self.state(service).into()
    }

    /// Record a successful call.
    pub fn record_success(&self, service: &str) {
        let threshold = self.config_for(service).half_open_success_threshold;
        self.with_circuit(service, |c| {
            c.total_successes += 1;
            let state = c.state;
            match state {
                CircuitState::Closed => c.failures = 0,
                CircuitState::HalfOpen => {
                    c.half_open_successes += 1;
                    if c.half_open_successes >= threshold {
                        c.state = CircuitState::Closed;
                        c.failures = 0;
                        c.opened_at = None;
                        c.half_open_successes = 0;
                        info!(service = %service, "circuit breaker: half_open → closed");
                    }
                }
                // A call that started before the circuit tripped.
                CircuitState::Open => {}
            }
        })
    }

    /// Record a failed call (including timeouts).
    pub fn record_failure(&self, service: &str) {
        let threshold = self.config_for(service).failure_threshold;
        let now = self.clock.now();
        self.with_circuit(service, |c| {
            c.total_failures += 1;
            c.failures += 1;
            c.last_failure_at = Some(now);
            let state = c.state;
            match state {
                CircuitState::Closed if c.failures >= threshold => c.open(service, now),
                CircuitState::Closed => {}
                CircuitState::HalfOpen => c.open(service, now),
                CircuitState::Open => c.opened_at = Some(now),
            }
        })
    }

    /// Run `operation` against `service` under the breaker.
    ///
    /// Fails fast with [`CircuitError::Open`] without invoking `operation`
    /// when the circuit is open. Otherwise the call is bounded by the
    /// service's call timeout; a timeout or an operation error counts as a
    /// failure, and the operation's own error is handed back unchanged.
    pub async fn execute<T, E, F, Fut>(
        &self,
        service: &str,
        operation: F,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let rejected = self.with_circuit(service, |c| {
            if c.state == CircuitState::Open {
                c.total_rejected += 1;
                true
            } else {
                false
            }
        });
        if rejected {
            return Err(CircuitError::Open {
                service: service.to_string(),
            });
        }

        let timeout = self.config_for(service).call_timeout();
        match tokio::time::timeout(timeout, operation()).await {
            Ok(Ok(value)) => {
                self.record_success(service);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure(service);
                Err(CircuitError::Operation(e))
            }
            Err(_) => {
                self.record_failure(service);
                warn!(service = %service, timeout_ms = timeout.as_millis() as u64, "provider call timed out");
                Err(CircuitError::Timeout {
                    service: service.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Snapshot of the circuit for `service`.
    pub fn snapshot(&self, service: &str) -> CircuitSnapshot {
        self.with_circuit(service, |c| CircuitSnapshot {
            service: service.to_string(),
            state: c.state,
            failures: c.failures,
            last_failure_at: c.last_failure_at,
            half_open_success_count: c.half_open_successes,
            total_successes: c.total_successes,
            total_failures: c.total_failures,
            total_rejected: c.total_rejected,
        })
    }

    /// Snapshots of every service seen so far, sorted by id.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut services: Vec<String> = self.circuits().keys().cloned().collect();
        services.sort();
        services.iter().map(|s| self.snapshot(s)).collect()
    }

    /// Force the circuit for `service` back to closed.
    pub fn reset(&self, service: &str) {
        let mut circuits = self.circuits();
        circuits.insert(service.to_string(), ServiceCircuit::new());
        info!(service = %service, "circuit breaker: reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn breaker(failure_threshold: u32) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = ManualClock::shared(Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap());
        let config = BreakerConfig {
            failure_threshold,
            ..Default::default()
        };
        (CircuitBreaker::new(config, clock.clone()), clock)
    }

    #[test]
    fn test_circuit_starts_closed() {
        let (cb, _) = breaker(5);
        assert_eq!(cb.state("trestle"), CircuitState::Closed);
        assert!(!cb.is_open("trestle"));
        assert_eq!(cb.health("trestle"), ServiceHealth::Ok);
    }

    #[test]
    fn test_circuit_opens_after_threshold() {
        let (cb, _) = breaker(3);
        cb.record_failure("trestle");
        cb.record_failure("trestle");
        assert_eq!(cb.state("trestle"), CircuitState::Closed);
        cb.record_failure("trestle");
        assert_eq!(cb.state("trestle"), CircuitState::Open);
        assert_eq!(cb.health("trestle"), ServiceHealth::Down);
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let (cb, _) = breaker(3);
        cb.record_failure("trestle");
        cb.record_failure("trestle");
        cb.record_success("trestle");
        cb.record_failure("trestle");
        cb.record_failure("trestle");
        assert_eq!(cb.state("trestle"), CircuitState::Closed);
    }

    #[test]
    fn test_lifecycle_open_half_open_reopen() {
        let (cb, clock) = breaker(3);
        for _ in 0..3 {
            cb.record_failure("tracerfy");
        }
        assert_eq!(cb.state("tracerfy"), CircuitState::Open);

        clock.advance(chrono::Duration::seconds(29));
        assert_eq!(cb.state("tracerfy"), CircuitState::Open);

        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(cb.state("tracerfy"), CircuitState::HalfOpen);

        cb.record_failure("tracerfy");
        assert_eq!(cb.state("tracerfy"), CircuitState::Open);
    }

    #[test]
    fn test_half_open_closes_after_success_threshold() {
        let (cb, clock) = breaker(1);
        cb.record_failure("signalhouse");
        clock.advance(chrono::Duration::seconds(30));
        assert!(!cb.is_open("signalhouse"));
        assert_eq!(cb.health("signalhouse"), ServiceHealth::Degraded);

        cb.record_success("signalhouse");
        assert_eq!(cb.state("signalhouse"), CircuitState::HalfOpen);
        cb.record_success("signalhouse");
        assert_eq!(cb.state("signalhouse"), CircuitState::Closed);
        assert_eq!(cb.snapshot("signalhouse").failures, 0);
    }

    #[test]
    fn test_services_are_independent() {
        let (cb, _) = breaker(1);
        cb.record_failure("trestle");
        assert!(cb.is_open("trestle"));
        assert!(!cb.is_open("tracerfy"));
    }

    #[test]
    fn test_per_service_override() {
        let (cb, _) = breaker(5);
        let cb = cb.with_service_config(
            "flaky",
            BreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
        );
        cb.record_failure("flaky");
        cb.record_failure("steady");
        assert!(cb.is_open("flaky"));
        assert!(!cb.is_open("steady"));
    }

    #[tokio::test]
    async fn test_execute_rethrows_operation_error() {
        let (cb, _) = breaker(5);
        let result: Result<(), CircuitError<String>> = cb
            .execute("trestle", || async { Err("bad gateway".to_string()) })
            .await;
        match result {
            Err(CircuitError::Operation(msg)) => assert_eq!(msg, "bad gateway"),
            other => panic!("expected operation error, got {:?}", other),
        }
        assert_eq!(cb.snapshot("trestle").failures, 1);
    }

    #[tokio::test]
    async fn test_execute_rejects_without_calling_when_open() {
        let (cb, _) = breaker(1);
        cb.record_failure("trestle");

        let called = AtomicBool::new(false);
        let result: Result<u8, CircuitError<String>> = cb
            .execute("trestle", || async {
                called.store(true, Ordering::SeqCst);
                Ok(1)
            })
            .await;

        assert!(matches!(result, Err(CircuitError::Open { .. })));
        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(cb.snapshot("trestle").total_rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let clock = ManualClock::shared(Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap());
        let cb = CircuitBreaker::new(
            BreakerConfig {
                failure_threshold: 1,
                call_timeout_ms: 50,
                ..Default::default()
            },
            clock,
        );

        let result: Result<(), CircuitError<String>> = cb
            .execute("slow", || async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(
            result,
            Err(CircuitError::Timeout { timeout_ms: 50, .. })
        ));
        assert_eq!(cb.state("slow"), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_execute_success_records() {
        let (cb, _) = breaker(5);
        let value: Result<u32, CircuitError<String>> =
            cb.execute("trestle", || async { Ok(7) }).await;
        assert_eq!(value.unwrap(), 7);
        let snap = cb.snapshot("trestle");
        assert_eq!(snap.total_successes, 1);
        assert_eq!(snap.state, CircuitState::Closed);
    }

    #[test]
    fn test_reset_closes_circuit() {
        let (cb, _) = breaker(1);
        cb.record_failure("trestle");
        cb.reset("trestle");
        assert_eq!(cb.state("trestle"), CircuitState::Closed);
        assert_eq!(cb.snapshots().len(), 1);
    }
}
