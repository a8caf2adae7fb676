use bitcoin::script::PushBytesError;
use thiserror::Error;

/// Errors for encoding tx format types.
#[derive(Debug, Error)]
pub enum TxFmtError {
    /// The encoded payload exceeds the standard `OP_RETURN` relay limit.
    #[error("exceeded {0} bytes limit")]
    BytesLimitExceed(usize),

    /// Error while converting data to `PushByteBuf`, typically due to invalid length.
    #[error("pushbytes: {0}")]
    PushBytes(#[from] PushBytesError),
}

/// Wrapper result type.
pub type TxFmtResult<T> = Result<T, TxFmtError>;
