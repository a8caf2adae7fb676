//! Bitcoin I/O for the relay.
//!
//! Two ways to anchor a payload are provided. [`OpReturnWriter`] funds a single
//! `OP_RETURN` transaction from the node wallet. [`CommitRevealWriter`] commits
//! to a taproot envelope and reveals it through a script-path spend. The
//! [`EnvelopeReader`] recovers payloads from either form.
//!
//! All node access goes through the [`WalletRpc`] trait. [`BitcoinRpcClient`]
//! implements it over JSON-RPC.

mod client;
pub mod commit_reveal;
mod errors;
mod fee;
mod keys;
mod op_return;
mod reader;
mod rpc;
#[cfg(test)]
mod test_utils;

pub use client::{BitcoinRpcClient, DEFAULT_RPC_TIMEOUT};
pub use commit_reveal::{CommitOutput, CommitRevealWriter, EnvelopeAddress, EnvelopeWrite, WriteSession, WriteState};
pub use errors::{BtcioError, BtcioResult};
pub use fee::{FeePolicy, MAX_INPUTS, Selection, select_utxos};
pub use keys::TaprootKeyPair;
pub use op_return::{OpReturnWriter, WALLET_UNLOCK_SECS, build_op_return_tx};
pub use reader::{EnvelopeReader, FoundPayload, read_block_payloads, read_transaction};
pub use rpc::{SignedTx, Utxo, WalletRpc, WalletTransaction};
