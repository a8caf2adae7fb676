//! Circuit breaking and retry for every remote call the relay makes.
//!
//! Each remote dependency (bitcoin RPC, settlement chain, proof store, ingest
//! transport) gets its own [`CircuitBreaker`]. A [`Retrier`] pairs a breaker
//! with an immutable [`RetryPolicy`] and consults the breaker before every
//! attempt, so failures recorded by concurrent callers can stop a retry loop
//! that is already in flight.

mod breaker;
mod error;
mod retry;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use error::{RetryError, Retryable};
pub use retry::{Dependency, Retrier, RetryPolicy};
