use darelay_btcio::BtcioError;
use darelay_ingest::IngestError;
use darelay_resilience::{RetryError, Retryable};
use thiserror::Error;

/// Error returned by external collaborators (settlement contract, price
/// oracle, proof store).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The remote could not be reached or timed out.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The remote refused the request. Retrying will not help.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl Retryable for ClientError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Wrapper result type for collaborator calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Why a single submission leg failed.
#[derive(Debug, Error)]
pub enum LegError {
    /// Writing to the UTXO chain failed.
    #[error("utxo chain: {0}")]
    Utxo(#[from] RetryError<BtcioError>),

    /// Storing on the settlement chain failed.
    #[error("settlement chain: {0}")]
    Settlement(#[from] RetryError<ClientError>),
}

/// Configuration problems found by [`crate::RelayerConfig::validate`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// A required field is empty.
    #[error("{0} must not be empty")]
    Empty(&'static str),

    /// A field that must be positive is zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// A super-proof hour is not a valid hour of the day.
    #[error("super proof hour {0} is out of range")]
    BadHour(u32),

    /// The protocol id does not parse.
    #[error("invalid protocol id: {0}")]
    ProtocolId(String),

    /// The signing key does not load.
    #[error("invalid signing key: {0}")]
    SigningKey(String),
}

/// Errors that stop the relay from starting or running.
#[derive(Debug, Error)]
pub enum RelayerError {
    /// The configuration is invalid.
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// An ingest transport could not be established.
    #[error("ingest: {0}")]
    Ingest(#[from] IngestError),

    /// Setting up bitcoin access failed.
    #[error("bitcoin: {0}")]
    Btcio(#[from] BtcioError),
}

/// Wrapper result type.
pub type RelayerResult<T> = Result<T, RelayerError>;
