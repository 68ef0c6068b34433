use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

// ============================================================================
// Circuit Breaker Pattern Implementation
// ============================================================================
//
// Guards a best-effort backend (the snapshot store) so that coordinators
// stop hammering it while it is failing. Cloned handles share one state.
//
// States:
// - Closed: Normal operation, calls pass through
// - Open: Too many failures, calls are skipped immediately
// - HalfOpen: Cool-down elapsed, trial calls decide whether to close again
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time to wait before attempting recovery
    pub cooldown_ms: u64,
    /// Successes needed to close the circuit from half-open
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 30_000,
            success_threshold: 1,
        }
    }
}

impl CircuitBreakerConfig {
    fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("operation failed: {0}")]
    OperationFailed(E),
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
        }
    }

    /// Whether a call may go through now. Moves Open to HalfOpen once the
    /// cool-down has elapsed.
    fn admit(&mut self, cooldown: Duration) -> bool {
        if self.state != CircuitState::Open {
            return true;
        }
        match self.opened_at {
            Some(opened) if opened.elapsed() >= cooldown => {
                self.state = CircuitState::HalfOpen;
                self.success_count = 0;
                true
            }
            _ => false,
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.success_count = 0;
    }

    /// Feed one call result; returns the new state on a transition.
    fn record(&mut self, succeeded: bool, config: &CircuitBreakerConfig) -> Option<CircuitState> {
        match (self.state, succeeded) {
            (CircuitState::Closed, true) => {
                self.failure_count = 0;
                None
            }
            (CircuitState::Closed, false) => {
                self.failure_count += 1;
                (self.failure_count >= config.failure_threshold).then(|| {
                    self.open();
                    CircuitState::Open
                })
            }
            (CircuitState::HalfOpen, true) => {
                self.success_count += 1;
                (self.success_count >= config.success_threshold).then(|| {
                    *self = Self::closed();
                    CircuitState::Closed
                })
            }
            (CircuitState::HalfOpen, false) => {
                self.open();
                Some(CircuitState::Open)
            }
            (CircuitState::Open, _) => None,
        }
    }
}

#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    state: Arc<Mutex<BreakerState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: CircuitBreakerConfig) -> Self {
        Self {
            name: Arc::from(name),
            state: Arc::new(Mutex::new(BreakerState::closed())),
            config,
        }
    }

    /// Run `operation` unless the circuit is open.
    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        if !self.state.lock().await.admit(self.config.cooldown()) {
            return Err(CircuitBreakerError::CircuitOpen);
        }

        let result = operation.await;

        let transition = self.state.lock().await.record(result.is_ok(), &self.config);
        match transition {
            Some(CircuitState::Open) => {
                tracing::warn!(breaker = %self.name, "Circuit breaker opened");
            }
            Some(state) => tracing::info!(breaker = %self.name, ?state, "Circuit breaker recovered"),
            None => {}
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    pub async fn get_state(&self) -> CircuitState {
        self.state.lock().await.state
    }
}
