use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::error::{RetryError, Retryable};

/// Immutable retry schedule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
}

impl RetryPolicy {
    /// Creates a new policy.
    ///
    /// At least one attempt is always made and factors below 1 are raised to 1
    /// so delays never shrink between attempts.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, backoff_factor: f64) -> Self {
        let backoff_factor = if backoff_factor.is_finite() {
            backoff_factor.max(1.0)
        } else {
            1.0
        };
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: base_delay.min(max_delay),
            max_delay,
            backoff_factor,
        }
    }

    /// Total number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait before the zero-based `attempt`.
    ///
    /// The first attempt runs immediately. Attempt `k >= 1` waits
    /// `min(base * factor^(k-1), max)`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exp = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let max = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Remote dependencies with their preset retry and breaker settings.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Dependency {
    /// Ingest transport creation.
    Subscriber,

    /// Bitcoin node JSON-RPC.
    BitcoinRpc,

    /// Settlement chain contract calls.
    Settlement,

    /// Proof store writes and reads.
    Database,
}

impl Dependency {
    /// Short name used in logs and breaker errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Subscriber => "subscriber",
            Self::BitcoinRpc => "bitcoin-rpc",
            Self::Settlement => "settlement",
            Self::Database => "database",
        }
    }

    /// Retry schedule for this dependency.
    pub fn policy(&self) -> RetryPolicy {
        match self {
            Self::Subscriber | Self::Database => {
                RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(30), 2.0)
            }
            Self::BitcoinRpc | Self::Settlement => {
                RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(60), 2.0)
            }
        }
    }

    /// Breaker thresholds for this dependency.
    pub fn breaker_config(&self) -> BreakerConfig {
        match self {
            Self::Subscriber | Self::Database => BreakerConfig::new(5, Duration::from_secs(30)),
            Self::BitcoinRpc | Self::Settlement => BreakerConfig::new(5, Duration::from_secs(60)),
        }
    }
}

/// Runs operations under a retry policy and a shared circuit breaker.
#[derive(Clone, Debug)]
pub struct Retrier {
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    cancel: CancellationToken,
}

impl Retrier {
    /// Creates a retrier around an existing breaker.
    pub fn new(policy: RetryPolicy, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            policy,
            breaker,
            cancel: CancellationToken::new(),
        }
    }

    /// Creates a retrier with a fresh breaker using the dependency presets.
    pub fn for_dependency(dep: Dependency) -> Self {
        let breaker = CircuitBreaker::new(dep.name(), dep.breaker_config());
        Self::new(dep.policy(), Arc::new(breaker))
    }

    /// Makes waits between attempts abort when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// A copy with the same policy and cancellation but its own breaker,
    /// configured like the current one.
    pub fn with_fresh_breaker(&self) -> Self {
        let breaker = CircuitBreaker::new(self.breaker.name(), self.breaker.config());
        Self {
            breaker: Arc::new(breaker),
            ..self.clone()
        }
    }

    /// Returns the breaker shared by this retrier.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Returns the policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `op` until it succeeds, fails terminally, exhausts its attempts or
    /// is stopped by the breaker or cancellation.
    ///
    /// Every failed attempt, terminal or not, is recorded as a failure on the
    /// breaker.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt = 0;
        loop {
            let delay = self.policy.delay_before(attempt);
            if !delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            } else if self.cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            if !self.breaker.can_execute() {
                return Err(RetryError::CircuitOpen(self.breaker.name().to_owned()));
            }

            match op().await {
                Ok(v) => {
                    self.breaker.record_success();
                    return Ok(v);
                }
                Err(e) if !e.is_retryable() => {
                    self.breaker.record_failure();
                    return Err(RetryError::Terminal(e));
                }
                Err(e) => {
                    self.breaker.record_failure();
                    attempt += 1;
                    if attempt >= self.policy.max_attempts {
                        error!(dep = %self.breaker.name(), %attempt, %e, "retries exhausted");
                        return Err(RetryError::Exhausted { attempts: attempt, last: e });
                    }
                    warn!(dep = %self.breaker.name(), %attempt, %e, "attempt failed, retrying");
                }
            }
        }
    }
}
