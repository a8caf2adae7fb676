//! Data availability relay.
//!
//! Blobs arrive over an ingest transport, are hashed into leaves and batched
//! by the [`Aggregator`]. Each closed batch becomes a [`MerkleCommitment`]
//! whose root the [`DualChainSubmitter`] anchors on the UTXO chain and on a
//! settlement contract, recording the outcome in a [`ProofStore`]. A
//! [`SuperProofJob`] periodically commits over the recorded batch roots.
//!
//! [`launch`] wires everything together and returns a [`RelayHandle`].
//!
//! [`MerkleCommitment`]: darelay_merkle::MerkleCommitment

mod aggregator;
mod config;
mod errors;
mod record;
mod runtime;
mod scheduler;
mod store;
mod submitter;
mod super_proof;
mod traits;

pub use aggregator::{Aggregator, Batch, FlushTrigger, truncate};
pub use config::{
    AnchorMode, BitcoinConfig, DEFAULT_SUPER_PROOF_HOURS, DEFAULT_SUPER_PROOF_LOOKBACK_SECS, IngestConfig,
    RelayerConfig, SuperProofConfig,
};
pub use errors::{ClientError, ClientResult, ConfigError, LegError, RelayerError, RelayerResult};
pub use record::{RecordKind, SettlementLeg, SubmissionRecord, UtxoLeg};
pub use runtime::{Collaborators, RelayHandle, RelayStatus, launch, utxo_anchor_from_config};
pub use scheduler::{FlushSignal, FlushTimer};
pub use store::InMemoryProofStore;
pub use submitter::{DualChainSubmitter, Leg, SubmissionOutcome};
pub use super_proof::{SuperProofJob, next_run_after};
pub use traits::{PriceOracle, ProofStore, SettlementContract, SettlementReceipt, TreeInfo, UtxoAnchor};
