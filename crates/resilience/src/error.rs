use thiserror::Error;

/// Classifies errors for the retry loop.
pub trait Retryable {
    /// Returns whether another attempt may succeed.
    ///
    /// Terminal errors (rejected input, insufficient funds) return `false` and
    /// are surfaced on the first occurrence.
    fn is_retryable(&self) -> bool;
}

/// Why a retried operation gave up.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The breaker rejected an attempt.
    #[error("circuit breaker '{0}' is open")]
    CircuitOpen(String),

    /// All attempts failed with retryable errors.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last: E,
    },

    /// The operation failed with a non-retryable error.
    #[error("{0}")]
    Terminal(E),

    /// Shutdown was requested while waiting between attempts.
    #[error("retry cancelled")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// Returns the underlying operation error, if there was one.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::Terminal(e) => Some(e),
            Self::CircuitOpen(_) | Self::Cancelled => None,
        }
    }

    /// Returns whether the failure was terminal rather than transient.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}
