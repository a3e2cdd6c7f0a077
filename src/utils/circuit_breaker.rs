use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

// ============================================================================
// Circuit Breaker
// ============================================================================
//
// One breaker per provider. While a provider keeps failing, calls are
// rejected without touching the network; the worker still answers each
// rejected request with an error envelope.
//
// States:
// - Closed:   calls pass through
// - Open:     calls rejected until `open_duration` elapses
// - HalfOpen: calls pass through; `success_threshold` successes close the
//             circuit, any failure reopens it
//
// Only errors the caller classifies as provider faults count as failures.
// Other errors pass through without touching the state.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding: 0=Closed, 1=Open, 2=HalfOpen.
    pub fn as_gauge(self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing again
    pub open_duration: Duration,
    /// Successes in half-open state needed to close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    state: Arc<Mutex<BreakerState>>,
    config: CircuitBreakerConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit open for {0}")]
    CircuitOpen(String),
    #[error(transparent)]
    OperationFailed(E),
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: Arc::from(name.into()),
            state: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            })),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `operation` unless the circuit is open. An error counts toward
    /// opening the circuit only when `is_fault` returns true for it.
    pub async fn call<F, T, E, P>(&self, operation: F, is_fault: P) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        self.admit().await?;

        match operation.await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(error) => {
                if is_fault(&error) {
                    self.record_failure().await;
                }
                Err(CircuitBreakerError::OperationFailed(error))
            }
        }
    }

    async fn admit<E>(&self) -> Result<(), CircuitBreakerError<E>> {
        let mut state = self.state.lock().await;

        if state.state != CircuitState::Open {
            return Ok(());
        }

        let cooled_down = state
            .opened_at
            .map(|opened| opened.elapsed() >= self.config.open_duration)
            .unwrap_or(true);

        if cooled_down {
            tracing::info!(breaker = %self.name, "Circuit breaker half-open, probing provider");
            state.state = CircuitState::HalfOpen;
            state.success_count = 0;
            Ok(())
        } else {
            Err(CircuitBreakerError::CircuitOpen(self.name.to_string()))
        }
    }

    async fn record_success(&self) {
        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    tracing::info!(breaker = %self.name, "Circuit breaker closed");
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.opened_at = None;
                }
            }
            CircuitState::Closed => state.failure_count = 0,
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self) {
        let mut state = self.state.lock().await;
        state.failure_count += 1;

        let should_open = match state.state {
            CircuitState::Closed => state.failure_count >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };

        if should_open {
            tracing::warn!(
                breaker = %self.name,
                failures = state.failure_count,
                "Circuit breaker opened"
            );
            state.state = CircuitState::Open;
            state.success_count = 0;
            state.opened_at = Some(Instant::now());
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    pub async fn failure_count(&self) -> u32 {
        self.state.lock().await.failure_count
    }

}
