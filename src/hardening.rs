use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Trips after `failure_threshold` consecutive failures of one alternate
/// backend. While open, the dispatcher treats the backend as unavailable and
/// goes straight to the fallback.
pub struct CircuitBreaker {
    name: &'static str,
    state: Arc<RwLock<CircuitState>>,
    failure_threshold: u32,
    recovery_timeout: Duration,
    consecutive_failures: Arc<AtomicU32>,
    last_failure_time: Arc<RwLock<Option<Instant>>>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name,
            state: Arc::new(RwLock::new(CircuitState::Closed)),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            consecutive_failures: Arc::new(AtomicU32::new(0)),
            last_failure_time: Arc::new(RwLock::new(None)),
        }
    }

    /// Whether a call may go through now. An open breaker whose recovery
    /// window elapsed moves to half-open and lets one trial call through.
    pub async fn allows_call(&self) -> bool {
        let mut state = self.state.write().await;
        if *state != CircuitState::Open {
            return true;
        }

        let last_failure = *self.last_failure_time.read().await;
        match last_failure {
            Some(last) if last.elapsed() > self.recovery_timeout => {
                tracing::info!("Circuit breaker [{}] transitioning to HALF-OPEN", self.name);
                *state = CircuitState::HalfOpen;
                true
            }
            _ => false,
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        self.consecutive_failures.store(0, Ordering::Relaxed);
        if *state != CircuitState::Closed {
            tracing::info!("Circuit breaker [{}] transitioning to CLOSED", self.name);
            *state = CircuitState::Closed;
        }
    }

    pub async fn record_failure(&self) {
        let mut state = self.state.write().await;
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        *self.last_failure_time.write().await = Some(Instant::now());

        // A failed half-open call reopens immediately.
        let should_open = failures >= self.failure_threshold || *state == CircuitState::HalfOpen;
        if should_open && *state != CircuitState::Open {
            tracing::error!(
                "Circuit breaker [{}] transitioning to OPEN ({} consecutive failures)",
                self.name,
                failures
            );
            *state = CircuitState::Open;
        }
    }

    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }
}
