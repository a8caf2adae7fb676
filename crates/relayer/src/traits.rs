//! Seams to the chains and storage the relay writes to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use darelay_btcio::{BtcioResult, CommitRevealWriter, OpReturnWriter, WalletRpc};
use darelay_merkle::Hash32;
use tracing::*;

use crate::errors::ClientResult;
use crate::record::{SubmissionRecord, UtxoLeg};

/// Writes a payload to the UTXO chain.
#[async_trait]
pub trait UtxoAnchor: Send + Sync + 'static {
    /// Writes `payload` and reports where it landed.
    async fn anchor(&self, payload: &[u8]) -> BtcioResult<UtxoLeg>;
}

#[async_trait]
impl<R: WalletRpc> UtxoAnchor for OpReturnWriter<R> {
    async fn anchor(&self, payload: &[u8]) -> BtcioResult<UtxoLeg> {
        let txid = self.write(payload).await?;

        // Freshly broadcast, so usually unmined. The height is best effort.
        let block_height = match self.rpc().get_transaction(&txid).await {
            Ok(wtx) => wtx.blockheight,
            Err(e) => {
                debug!(%txid, %e, "could not look up write height");
                None
            }
        };

        Ok(UtxoLeg {
            tx_hash: txid.to_string(),
            block_height,
        })
    }
}

#[async_trait]
impl<R: WalletRpc> UtxoAnchor for CommitRevealWriter<R> {
    async fn anchor(&self, payload: &[u8]) -> BtcioResult<UtxoLeg> {
        let write = self.write(payload).await?;
        Ok(UtxoLeg {
            tx_hash: write.reveal_txid.to_string(),
            block_height: write.block_height,
        })
    }
}

/// Receipt of an included settlement transaction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SettlementReceipt {
    /// Transaction hash.
    pub tx_hash: String,
    /// Whether execution succeeded.
    pub status: bool,
    /// Inclusion block.
    pub block_number: u64,
    /// Gas consumed.
    pub gas_used: u64,
    /// Price paid per gas, in wei.
    pub effective_gas_price: u128,
}

impl SettlementReceipt {
    /// Total fee in wei.
    pub fn fee(&self) -> u128 {
        u128::from(self.gas_used).saturating_mul(self.effective_gas_price)
    }
}

/// A tree as stored by the settlement contract.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TreeInfo {
    /// Stored root.
    pub root: Hash32,
    /// Number of leaves stored with it.
    pub leaf_count: u64,
    /// Block it was stored in.
    pub block_number: u64,
}

/// Client for the settlement chain's merkle tree storage contract.
#[async_trait]
pub trait SettlementContract: Send + Sync + 'static {
    /// Stores a tree and waits for the transaction to be included.
    async fn store_tree(&self, root: Hash32, leaves: &[Hash32]) -> ClientResult<SettlementReceipt>;

    /// Whether `root` is already stored.
    async fn tree_exists(&self, root: Hash32) -> ClientResult<bool>;

    /// Looks up a stored tree.
    async fn tree_info(&self, root: Hash32) -> ClientResult<Option<TreeInfo>>;

    /// Every stored root.
    async fn all_roots(&self) -> ClientResult<Vec<Hash32>>;
}

/// Price of the settlement chain's native token.
#[async_trait]
pub trait PriceOracle: Send + Sync + 'static {
    /// USD per whole native token.
    async fn native_usd_price(&self) -> ClientResult<f64>;
}

/// Persistent store for submission records.
#[async_trait]
pub trait ProofStore: Send + Sync + 'static {
    /// Persists a record.
    async fn create(&self, record: &SubmissionRecord) -> ClientResult<()>;

    /// Roots of batch records created at or after `since`, oldest first.
    async fn list_since(&self, since: DateTime<Utc>) -> ClientResult<Vec<Hash32>>;

    /// Creation time of the newest super-proof record.
    async fn last_super_proof_at(&self) -> ClientResult<Option<DateTime<Utc>>>;
}
