use std::time::Duration;

use bitcoin::Txid;
use darelay_l1_envelope_fmt::errors::EnvelopeBuildError;
use darelay_l1_txfmt::TxFmtError;
use darelay_resilience::Retryable;
use thiserror::Error;

use crate::commit_reveal::WriteState;

/// Errors raised while talking to the bitcoin node or building transactions.
#[derive(Debug, Error)]
pub enum BtcioError {
    /// The node could not be reached, timed out or answered with a server
    /// error.
    #[error("rpc unavailable: {0}")]
    RpcUnavailable(String),

    /// The node answered with an RPC error. Retried, since a busy wallet or
    /// a lagging index often clears up.
    #[error("rpc {method} failed with code {code}: {message}")]
    Rpc {
        /// RPC method name.
        method: String,
        /// bitcoind error code.
        code: i64,
        /// bitcoind error message.
        message: String,
    },

    /// `sendrawtransaction` rejected the transaction.
    #[error("broadcast rejected with code {code}: {message}")]
    BroadcastRejected {
        /// bitcoind error code.
        code: i64,
        /// Rejection reason.
        message: String,
    },

    /// The wallet cannot fund the transaction.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Building the taproot output failed.
    #[error("address derivation: {0}")]
    AddressDerivation(String),

    /// Script or transaction encoding failed.
    #[error("codec: {0}")]
    Codec(String),

    /// Signing the reveal failed.
    #[error("signing: {0}")]
    Signing(String),

    /// The commit transaction does not pay the reveal address.
    #[error("commit tx {txid} has no output paying the envelope address")]
    MissingCommitOutput {
        /// Commit transaction id.
        txid: Txid,
    },

    /// The transaction did not confirm in time.
    #[error("tx {txid} unconfirmed after {waited:?}")]
    ConfirmationTimeout {
        /// Transaction we waited for.
        txid: Txid,
        /// How long we waited.
        waited: Duration,
    },

    /// A write session was driven out of order.
    #[error("invalid write transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// State the session was in.
        from: WriteState,
        /// State that was requested.
        to: WriteState,
    },
}

impl BtcioError {
    pub(crate) fn rpc(method: &str, code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            method: method.to_owned(),
            code,
            message: message.into(),
        }
    }
}

impl Retryable for BtcioError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::RpcUnavailable(_) | Self::Rpc { .. })
    }
}

impl From<EnvelopeBuildError> for BtcioError {
    fn from(e: EnvelopeBuildError) -> Self {
        Self::Codec(e.to_string())
    }
}

impl From<TxFmtError> for BtcioError {
    fn from(e: TxFmtError) -> Self {
        Self::Codec(e.to_string())
    }
}

impl From<bitcoin::consensus::encode::Error> for BtcioError {
    fn from(e: bitcoin::consensus::encode::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

impl From<hex::FromHexError> for BtcioError {
    fn from(e: hex::FromHexError) -> Self {
        Self::Codec(e.to_string())
    }
}

/// Wrapper result type.
pub type BtcioResult<T> = Result<T, BtcioError>;
