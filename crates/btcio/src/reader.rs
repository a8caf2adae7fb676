use std::sync::Arc;

use bitcoin::{Block, Script, Transaction, Txid};
use darelay_l1_envelope_fmt::parser::parse_envelope_payload;
use darelay_l1_txfmt::{ProtocolId, parse_op_return_payload};
use tracing::*;

use crate::errors::BtcioResult;
use crate::rpc::WalletRpc;

/// A protocol payload found on chain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FoundPayload {
    /// Transaction carrying it.
    pub txid: Txid,
    /// Payload with the protocol id removed.
    pub payload: Vec<u8>,
}

/// Extracts every payload for `protocol_id` carried by `tx`.
///
/// Looks at the tapscript revealed by input 0 (witness element 1) and at
/// every `OP_RETURN` output, in that order.
pub fn read_transaction(tx: &Transaction, protocol_id: &ProtocolId) -> Vec<Vec<u8>> {
    let revealed = tx
        .input
        .first()
        .and_then(|input| input.witness.nth(1))
        .and_then(|leaf| parse_envelope_payload(Script::from_bytes(leaf)));

    let op_returns = tx
        .output
        .iter()
        .filter(|out| out.script_pubkey.is_op_return())
        .filter_map(|out| parse_op_return_payload(&out.script_pubkey).map(<[u8]>::to_vec));

    revealed
        .into_iter()
        .chain(op_returns)
        .filter_map(|data| protocol_id.strip_from(&data).map(<[u8]>::to_vec))
        .collect()
}

/// Extracts payloads from every transaction of `block`.
pub fn read_block_payloads(block: &Block, protocol_id: &ProtocolId) -> Vec<FoundPayload> {
    block
        .txdata
        .iter()
        .flat_map(|tx| {
            let txid = tx.compute_txid();
            read_transaction(tx, protocol_id)
                .into_iter()
                .map(move |payload| FoundPayload { txid, payload })
        })
        .collect()
}

/// Reads relay payloads back from the chain.
#[derive(Debug)]
pub struct EnvelopeReader<R> {
    rpc: Arc<R>,
    protocol_id: ProtocolId,
}

impl<R: WalletRpc> EnvelopeReader<R> {
    /// Creates a reader for `protocol_id`.
    pub fn new(rpc: Arc<R>, protocol_id: ProtocolId) -> Self {
        Self { rpc, protocol_id }
    }

    /// Protocol id payloads must carry.
    pub fn protocol_id(&self) -> &ProtocolId {
        &self.protocol_id
    }

    /// Extracts payloads from one transaction.
    pub fn read_transaction(&self, tx: &Transaction) -> Vec<Vec<u8>> {
        read_transaction(tx, &self.protocol_id)
    }

    /// Decodes a serialized block, as published on the `rawblock` topic, and
    /// extracts its payloads.
    pub fn read_raw_block(&self, raw: &[u8]) -> BtcioResult<Vec<FoundPayload>> {
        let block: Block = bitcoin::consensus::deserialize(raw)?;
        Ok(read_block_payloads(&block, &self.protocol_id))
    }

    /// Fetches the block at `height` and extracts its payloads.
    pub async fn read_block(&self, height: u64) -> BtcioResult<Vec<FoundPayload>> {
        let hash = self.rpc.get_block_hash(height).await?;
        let block = self.rpc.get_block(&hash).await?;
        let found = read_block_payloads(&block, &self.protocol_id);
        debug!(%height, %hash, found = found.len(), "read block");
        Ok(found)
    }
}
