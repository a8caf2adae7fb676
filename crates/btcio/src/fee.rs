use bitcoin::Amount;
use serde::{Deserialize, Serialize};

use crate::errors::{BtcioError, BtcioResult};
use crate::rpc::Utxo;

/// Most inputs a single OP_RETURN write may spend.
pub const MAX_INPUTS: usize = 10;

/// Flat fee heuristic: `base + per_input * inputs + payload_len` sats.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeePolicy {
    /// Fixed part in sats.
    pub base: u64,
    /// Sats added per input.
    pub per_input: u64,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            base: 53,
            per_input: 68,
        }
    }
}

impl FeePolicy {
    /// Fee required for a transaction with `inputs` inputs carrying
    /// `payload_len` bytes.
    pub fn required(&self, inputs: usize, payload_len: usize) -> Amount {
        let sats = self.base + self.per_input * inputs as u64 + payload_len as u64;
        Amount::from_sat(sats)
    }
}

/// Inputs picked to fund a write.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Selection {
    /// Chosen outputs in wallet order.
    pub inputs: Vec<Utxo>,
    /// Sum of their values.
    pub total: Amount,
    /// Fee the policy requires for them.
    pub fee: Amount,
}

impl Selection {
    /// What is left after the fee.
    pub fn change(&self) -> Amount {
        self.total.checked_sub(self.fee).unwrap_or(Amount::ZERO)
    }
}

/// Greedily takes outputs in order until they cover the policy fee.
///
/// Fails with [`BtcioError::InsufficientFunds`] if [`MAX_INPUTS`] outputs or
/// the whole list are not enough.
pub fn select_utxos(utxos: &[Utxo], policy: &FeePolicy, payload_len: usize) -> BtcioResult<Selection> {
    let mut inputs = Vec::new();
    let mut total = Amount::ZERO;

    for utxo in utxos.iter().take(MAX_INPUTS) {
        inputs.push(utxo.clone());
        total += utxo.amount;

        let fee = policy.required(inputs.len(), payload_len);
        if total >= fee {
            return Ok(Selection { inputs, total, fee });
        }
    }

    let needed = policy.required(inputs.len().max(1), payload_len);
    Err(BtcioError::InsufficientFunds(format!(
        "{} across {} outputs, need at least {}",
        total,
        inputs.len(),
        needed
    )))
}
