//! Anchoring a commitment on both chains.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use darelay_l1_txfmt::ProtocolId;
use darelay_merkle::MerkleCommitment;
use darelay_resilience::{Dependency, Retrier};
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::errors::{ClientError, LegError};
use crate::record::{RecordKind, SettlementLeg, SubmissionRecord, UtxoLeg};
use crate::traits::{PriceOracle, ProofStore, SettlementContract, UtxoAnchor};

const WEI_PER_NATIVE: f64 = 1e18;

/// A submission leg.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Leg {
    /// The UTXO chain write.
    Utxo,
    /// The settlement contract call.
    Settlement,
}

/// Result of [`DualChainSubmitter::submit`].
#[derive(Clone, Debug, PartialEq)]
pub enum SubmissionOutcome {
    /// Both legs landed.
    Complete(SubmissionRecord),
    /// One leg landed. The record only carries that leg's fields.
    Partial {
        /// Record handed to the proof store.
        record: SubmissionRecord,
        /// The leg that failed.
        failed: Leg,
    },
    /// Neither leg landed and nothing was persisted.
    Failed,
}

impl SubmissionOutcome {
    /// The record made for this submission, if any.
    pub fn record(&self) -> Option<&SubmissionRecord> {
        match self {
            Self::Complete(record) | Self::Partial { record, .. } => Some(record),
            Self::Failed => None,
        }
    }

    /// Whether the leaves should go back into the aggregator.
    pub fn should_requeue(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// Writes a root to the UTXO chain and the settlement contract, then records
/// the result.
///
/// Every collaborator gets its own retrier, so an outage on one chain trips
/// only that chain's breaker.
#[derive(Clone)]
pub struct DualChainSubmitter {
    protocol_id: ProtocolId,
    utxo: Arc<dyn UtxoAnchor>,
    settlement: Arc<dyn SettlementContract>,
    oracle: Arc<dyn PriceOracle>,
    store: Arc<dyn ProofStore>,
    utxo_retrier: Retrier,
    settlement_retrier: Retrier,
    store_retrier: Retrier,
}

impl fmt::Debug for DualChainSubmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DualChainSubmitter")
            .field("protocol_id", &self.protocol_id)
            .field("utxo_retrier", &self.utxo_retrier)
            .field("settlement_retrier", &self.settlement_retrier)
            .field("store_retrier", &self.store_retrier)
            .finish_non_exhaustive()
    }
}

impl DualChainSubmitter {
    /// Creates a submitter with the preset retriers.
    pub fn new(
        protocol_id: ProtocolId,
        utxo: Arc<dyn UtxoAnchor>,
        settlement: Arc<dyn SettlementContract>,
        oracle: Arc<dyn PriceOracle>,
        store: Arc<dyn ProofStore>,
    ) -> Self {
        Self {
            protocol_id,
            utxo,
            settlement,
            oracle,
            store,
            utxo_retrier: Retrier::for_dependency(Dependency::BitcoinRpc),
            settlement_retrier: Retrier::for_dependency(Dependency::Settlement),
            store_retrier: Retrier::for_dependency(Dependency::Database),
        }
    }

    /// Replaces the retriers.
    pub fn with_retriers(mut self, utxo: Retrier, settlement: Retrier, store: Retrier) -> Self {
        self.utxo_retrier = utxo;
        self.settlement_retrier = settlement;
        self.store_retrier = store;
        self
    }

    /// Makes waits between retries abort when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.utxo_retrier = self.utxo_retrier.with_cancellation(token.clone());
        self.settlement_retrier = self.settlement_retrier.with_cancellation(token.clone());
        self.store_retrier = self.store_retrier.with_cancellation(token);
        self
    }

    /// A copy writing to a different settlement contract.
    ///
    /// The copy gets a fresh settlement breaker. The other breakers stay
    /// shared.
    pub fn with_settlement(&self, settlement: Arc<dyn SettlementContract>) -> Self {
        Self {
            settlement,
            settlement_retrier: self.settlement_retrier.with_fresh_breaker(),
            ..self.clone()
        }
    }

    /// Protocol id prefixed to every UTXO chain payload.
    pub fn protocol_id(&self) -> &ProtocolId {
        &self.protocol_id
    }

    /// The proof store records are written to.
    pub fn store(&self) -> &Arc<dyn ProofStore> {
        &self.store
    }

    /// Retrier guarding the proof store.
    pub fn store_retrier(&self) -> &Retrier {
        &self.store_retrier
    }

    /// Writes `protocol_id || root` to the UTXO chain.
    pub async fn submit_to_utxo_chain(&self, commitment: &MerkleCommitment) -> Result<UtxoLeg, LegError> {
        let payload = self.protocol_id.prefixed(commitment.root());
        let utxo = &self.utxo;
        let payload = &payload;
        let leg = self.utxo_retrier.run(move || utxo.anchor(payload)).await?;

        info!(txid = %leg.tx_hash, height = ?leg.block_height, "root written to utxo chain");
        Ok(leg)
    }

    /// Stores the tree on the settlement contract unless it is already there.
    pub async fn submit_to_settlement_chain(
        &self,
        commitment: &MerkleCommitment,
    ) -> Result<SettlementLeg, LegError> {
        let root = *commitment.root();
        let contract = &self.settlement;

        let exists = self.settlement_retrier.run(move || contract.tree_exists(root)).await?;
        if exists {
            let info = self.settlement_retrier.run(move || contract.tree_info(root)).await?;
            let block_height = info.map(|i| i.block_number).unwrap_or_default();
            info!(%block_height, "root already stored on settlement chain");
            return Ok(SettlementLeg {
                tx_hash: String::new(),
                block_height,
                gas_used: 0,
                fee: 0,
                fee_usd: None,
            });
        }

        let leaves = commitment.leaves();
        let receipt = self
            .settlement_retrier
            .run(move || async move {
                let receipt = contract.store_tree(root, leaves).await?;
                if !receipt.status {
                    return Err(ClientError::Rejected(format!("transaction {} reverted", receipt.tx_hash)));
                }
                Ok(receipt)
            })
            .await?;

        let fee = receipt.fee();
        let fee_usd = self.fee_usd(fee).await;
        info!(
            tx = %receipt.tx_hash,
            block = receipt.block_number,
            gas_used = receipt.gas_used,
            %fee,
            ?fee_usd,
            "tree stored on settlement chain"
        );

        Ok(SettlementLeg {
            tx_hash: receipt.tx_hash,
            block_height: receipt.block_number,
            gas_used: receipt.gas_used,
            fee,
            fee_usd,
        })
    }

    async fn fee_usd(&self, fee_wei: u128) -> Option<f64> {
        match self.oracle.native_usd_price().await {
            Ok(price) => Some(fee_wei as f64 / WEI_PER_NATIVE * price),
            Err(e) => {
                warn!(%e, "no native token price, fee recorded without usd value");
                None
            }
        }
    }

    /// Anchors `commitment` on both chains concurrently and persists the
    /// outcome.
    ///
    /// A record is persisted whenever at least one leg landed. A failure to
    /// persist is logged; the chain writes stand either way.
    pub async fn submit(&self, commitment: &MerkleCommitment, kind: RecordKind) -> SubmissionOutcome {
        self.submit_stamped(commitment, kind, None).await
    }

    /// Like [`Self::submit`], but the record is stamped with `as_of` instead
    /// of the time the legs finished.
    pub async fn submit_as_of(
        &self,
        commitment: &MerkleCommitment,
        kind: RecordKind,
        as_of: DateTime<Utc>,
    ) -> SubmissionOutcome {
        self.submit_stamped(commitment, kind, Some(as_of)).await
    }

    async fn submit_stamped(
        &self,
        commitment: &MerkleCommitment,
        kind: RecordKind,
        as_of: Option<DateTime<Utc>>,
    ) -> SubmissionOutcome {
        let span = info_span!("submit", root = %commitment.root_hex(), leaves = commitment.len(), ?kind);
        self.submit_inner(commitment, kind, as_of).instrument(span).await
    }

    async fn submit_inner(
        &self,
        commitment: &MerkleCommitment,
        kind: RecordKind,
        as_of: Option<DateTime<Utc>>,
    ) -> SubmissionOutcome {
        let (utxo, settlement) = tokio::join!(
            self.submit_to_utxo_chain(commitment),
            self.submit_to_settlement_chain(commitment)
        );

        let utxo = utxo.inspect_err(|e| error!(%e, "utxo leg failed")).ok();
        let settlement = settlement.inspect_err(|e| error!(%e, "settlement leg failed")).ok();

        let failed = match (&utxo, &settlement) {
            (Some(_), Some(_)) => None,
            (Some(_), None) => Some(Leg::Settlement),
            (None, Some(_)) => Some(Leg::Utxo),
            (None, None) => {
                error!("both legs failed, nothing recorded");
                return SubmissionOutcome::Failed;
            }
        };

        let created_at = as_of.unwrap_or_else(Utc::now);
        let record = SubmissionRecord::new(kind, commitment, utxo.as_ref(), settlement.as_ref(), created_at);
        self.persist(&record).await;

        match failed {
            None => SubmissionOutcome::Complete(record),
            Some(failed) => {
                warn!(?failed, "partial submission recorded");
                SubmissionOutcome::Partial { record, failed }
            }
        }
    }

    async fn persist(&self, record: &SubmissionRecord) -> bool {
        let store = &self.store;
        match self.store_retrier.run(move || store.create(record)).await {
            Ok(()) => {
                debug!(success = record.success, "submission recorded");
                true
            }
            Err(e) => {
                error!(%e, "failed to persist submission record");
                false
            }
        }
    }
}
