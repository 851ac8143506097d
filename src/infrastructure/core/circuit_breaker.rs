use crate::domain::errors::ExchangeError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,   // Normal operation - requests pass through
    Open,     // Failure threshold breached - reject all requests
    HalfOpen, // Testing if venue recovered - allow limited requests
}

/// Circuit breaker guarding one venue's REST surface.
///
/// Only transport-level failures trip the breaker: an `AuthFailure` or
/// `VenueReject` is a healthy venue answering, and must not block other
/// clients' enforcement calls.
pub struct CircuitBreaker {
    state: Arc<RwLock<BreakerState>>,
    failure_threshold: usize,
    success_threshold: usize,
    timeout: Duration,
    name: String,
}

struct BreakerState {
    state: CircuitState,
    failure_count: usize,
    success_count: usize,
    last_failure_time: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        failure_threshold: usize,
        success_threshold: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            })),
            failure_threshold,
            success_threshold,
            timeout,
            name: name.into(),
        }
    }

    /// Execute a venue call with breaker protection. An open circuit is
    /// surfaced as `Throttled` carrying the remaining cool-down.
    pub async fn call<F, T>(&self, f: F) -> Result<T, ExchangeError>
    where
        F: std::future::Future<Output = Result<T, ExchangeError>>,
    {
        {
            let mut state = self.state.write().await;

            if state.state == CircuitState::Open {
                if let Some(last_failure) = state.last_failure_time {
                    if last_failure.elapsed() > self.timeout {
                        info!(
                            "CircuitBreaker [{}]: Transitioning Open -> HalfOpen (timeout elapsed)",
                            self.name
                        );
                        state.state = CircuitState::HalfOpen;
                        state.success_count = 0;
                    } else {
                        return Err(ExchangeError::Throttled {
                            retry_after: Some(self.timeout - last_failure.elapsed()),
                        });
                    }
                }
            }
        }

        match f.await {
            Ok(result) => {
                self.on_success().await;
                Ok(result)
            }
            Err(e) => {
                if self.counts_as_failure(&e) {
                    self.on_failure().await;
                } else {
                    // Venue answered; the transport is fine.
                    self.on_success().await;
                }
                Err(e)
            }
        }
    }

    fn counts_as_failure(&self, err: &ExchangeError) -> bool {
        matches!(
            err,
            ExchangeError::TransientNetwork(_)
                | ExchangeError::Throttled { .. }
                | ExchangeError::Unknown(_)
        )
    }

    async fn on_success(&self) {
        let mut state = self.state.write().await;

        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.success_threshold {
                    info!(
                        "CircuitBreaker [{}]: Transitioning HalfOpen -> Closed ({} successes)",
                        self.name, state.success_count
                    );
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                }
            }
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::Open => {
                warn!(
                    "CircuitBreaker [{}]: Success recorded in Open state (unexpected)",
                    self.name
                );
            }
        }
    }

    async fn on_failure(&self) {
        let mut state = self.state.write().await;

        state.failure_count += 1;
        state.last_failure_time = Some(Instant::now());

        match state.state {
            CircuitState::Closed => {
                if state.failure_count >= self.failure_threshold {
                    error!(
                        "CircuitBreaker [{}]: Transitioning Closed -> Open ({} failures)",
                        self.name, state.failure_count
                    );
                    state.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                error!(
                    "CircuitBreaker [{}]: Failure in HalfOpen, reopening circuit",
                    self.name
                );
                state.state = CircuitState::Open;
                state.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    #[cfg(test)]
    async fn current_state(&self) -> CircuitState {
        self.state.read().await.state
    }
}
