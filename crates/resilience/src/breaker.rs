use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::*;

/// Breaker state for one remote dependency.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,

    /// Calls are rejected until the cooldown elapses.
    Open,

    /// The cooldown elapsed and a single probe call has been let through.
    /// Another probe is allowed if the first reports nothing for a further
    /// cooldown.
    HalfOpen,
}

/// Thresholds for a [`CircuitBreaker`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BreakerConfig {
    /// Failures after which the breaker opens.
    pub max_failures: u32,

    /// Time since the last failure before a probe is allowed.
    pub cooldown: Duration,
}

impl BreakerConfig {
    /// Creates a new config.
    pub const fn new(max_failures: u32, cooldown: Duration) -> Self {
        Self {
            max_failures,
            cooldown,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    probe_started: Option<Instant>,
}

/// Closed/open/half-open circuit breaker guarding one dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                probe_started: None,
            }),
        }
    }

    /// Name of the guarded dependency.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the config this breaker was created with.
    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // State stays consistent across a panic in another holder, every
        // update is a single assignment.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the current state without transitioning.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Returns the current consecutive failure count.
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Checks whether a call may proceed.
    ///
    /// Once the cooldown has elapsed on an open breaker this moves to
    /// half-open and returns `true` exactly once. Further calls return `false`
    /// until the probe's outcome is recorded, or until another cooldown passes
    /// without one, which lets a replacement probe through.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();
        let cooldown = self.config.cooldown;
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                let abandoned = inner.probe_started.is_none_or(|at| at.elapsed() > cooldown);
                if abandoned {
                    inner.probe_started = Some(Instant::now());
                    warn!(breaker = %self.name, "probe never reported, allowing another");
                }
                abandoned
            }
            CircuitState::Open => {
                let cooled = inner.last_failure.is_none_or(|at| at.elapsed() > cooldown);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_started = Some(Instant::now());
                    info!(breaker = %self.name, "circuit half-open, allowing probe");
                }
                cooled
            }
        }
    }

    /// Records a successful call, closing the breaker.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!(breaker = %self.name, "circuit closed");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.probe_started = None;
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failure_count >= self.config.max_failures,
            CircuitState::Open => false,
        };

        if should_open {
            inner.state = CircuitState::Open;
            inner.probe_started = None;
            warn!(
                breaker = %self.name,
                failures = inner.failure_count,
                cooldown = ?self.config.cooldown,
                "circuit opened"
            );
        }
    }
}
