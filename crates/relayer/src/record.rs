use chrono::{DateTime, Utc};
use darelay_merkle::{Hash32, MerkleCommitment};
use serde::{Deserialize, Serialize};

/// What a submission record commits to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// A batch of ingested blobs.
    Batch,
    /// A commitment over earlier batch roots.
    SuperProof,
}

/// Where the UTXO leg landed.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct UtxoLeg {
    /// Transaction id carrying the root.
    pub tx_hash: String,
    /// Height of its block, if known when the record was made.
    pub block_height: Option<u64>,
}

/// Where the settlement leg landed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SettlementLeg {
    /// Settlement transaction hash. Empty when the root was already stored.
    pub tx_hash: String,
    /// Block it was included in.
    pub block_height: u64,
    /// Gas consumed.
    pub gas_used: u64,
    /// `gas_used * effective_gas_price`, in wei.
    pub fee: u128,
    /// Fee in USD, if the oracle answered.
    pub fee_usd: Option<f64>,
}

/// Immutable record of one flush, as handed to the proof store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    /// Record kind.
    pub kind: RecordKind,
    /// Committed root.
    #[serde(with = "hex::serde")]
    pub merkle_root: Hash32,
    /// Leaves under the root, in order.
    #[serde(with = "hex_leaves")]
    pub leaves: Vec<Hash32>,
    /// UTXO chain transaction id.
    pub utxo_tx_hash: Option<String>,
    /// UTXO chain block height.
    pub utxo_block_height: Option<u64>,
    /// Settlement chain transaction hash.
    pub settlement_tx_hash: Option<String>,
    /// Settlement chain block height.
    pub block_height: Option<u64>,
    /// Settlement gas used.
    pub gas_used: Option<u64>,
    /// Settlement fee in wei.
    pub fee: Option<u128>,
    /// Settlement fee in USD.
    pub fee_usd: Option<f64>,
    /// Whether both legs succeeded.
    pub success: bool,
    /// When the record was made.
    pub created_at: DateTime<Utc>,
}

impl SubmissionRecord {
    /// Builds a record from whichever legs succeeded.
    pub fn new(
        kind: RecordKind,
        commitment: &MerkleCommitment,
        utxo: Option<&UtxoLeg>,
        settlement: Option<&SettlementLeg>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            merkle_root: *commitment.root(),
            leaves: commitment.leaves().to_vec(),
            utxo_tx_hash: utxo.map(|u| u.tx_hash.clone()),
            utxo_block_height: utxo.and_then(|u| u.block_height),
            settlement_tx_hash: settlement.map(|s| s.tx_hash.clone()),
            block_height: settlement.map(|s| s.block_height),
            gas_used: settlement.map(|s| s.gas_used),
            fee: settlement.map(|s| s.fee),
            fee_usd: settlement.and_then(|s| s.fee_usd),
            success: utxo.is_some() && settlement.is_some(),
            created_at,
        }
    }

    /// Root as lowercase hex.
    pub fn root_hex(&self) -> String {
        hex::encode(self.merkle_root)
    }
}

/// Serde helpers writing leaf hashes as a list of hex strings.
mod hex_leaves {
    use darelay_merkle::Hash32;
    use hex::FromHex;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(leaves: &[Hash32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(leaves.iter().map(hex::encode))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Hash32>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|s| <Hash32>::from_hex(s).map_err(D::Error::custom))
            .collect()
    }
}
