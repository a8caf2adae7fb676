use std::sync::Arc;

use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use darelay_l1_txfmt::build_op_return_script;
use tracing::*;

use crate::errors::{BtcioError, BtcioResult};
use crate::fee::{FeePolicy, MAX_INPUTS, Selection, select_utxos};
use crate::rpc::WalletRpc;

/// How long the wallet stays unlocked for a write.
pub const WALLET_UNLOCK_SECS: u64 = 180;

/// Writes payloads to bitcoin as a single `OP_RETURN` transaction funded by
/// the node wallet.
#[derive(Debug)]
pub struct OpReturnWriter<R> {
    rpc: Arc<R>,
    network: Network,
    fee_policy: FeePolicy,
    wallet_passphrase: Option<String>,
}

impl<R: WalletRpc> OpReturnWriter<R> {
    /// Creates a writer using the default fee policy and an unlocked wallet.
    pub fn new(rpc: Arc<R>, network: Network) -> Self {
        Self {
            rpc,
            network,
            fee_policy: FeePolicy::default(),
            wallet_passphrase: None,
        }
    }

    /// Overrides the fee heuristic.
    pub fn with_fee_policy(mut self, fee_policy: FeePolicy) -> Self {
        self.fee_policy = fee_policy;
        self
    }

    /// Unlocks the wallet with `passphrase` before every write.
    pub fn with_wallet_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.wallet_passphrase = Some(passphrase.into());
        self
    }

    /// Underlying RPC client.
    pub fn rpc(&self) -> &Arc<R> {
        &self.rpc
    }

    /// Funds, signs and broadcasts one transaction carrying `payload`.
    ///
    /// UTXOs are listed fresh for every write.
    pub async fn write(&self, payload: &[u8]) -> BtcioResult<Txid> {
        let op_return = build_op_return_script(payload)?;

        if let Some(passphrase) = &self.wallet_passphrase {
            self.rpc.wallet_passphrase(passphrase, WALLET_UNLOCK_SECS).await?;
            debug!("wallet unlocked");
        }

        let utxos = self.rpc.list_unspent(1, MAX_INPUTS).await?;
        let selection = select_utxos(&utxos, &self.fee_policy, payload.len())?;
        debug!(inputs = selection.inputs.len(), total = %selection.total, fee = %selection.fee, "selected utxos");

        let change = self
            .rpc
            .get_raw_change_address()
            .await?
            .require_network(self.network)
            .map_err(|e| BtcioError::Codec(format!("change address: {e}")))?;

        let unsigned = build_op_return_tx(&selection, op_return, change.script_pubkey());
        let signed = self.rpc.sign_raw_transaction_with_wallet(&unsigned).await?;
        if !signed.complete {
            return Err(BtcioError::Signing("wallet left inputs unsigned".to_owned()));
        }

        let tx = signed.transaction()?;
        let txid = self.rpc.send_raw_transaction(&tx).await?;
        info!(%txid, payload_len = payload.len(), "op_return written");
        Ok(txid)
    }
}

/// Assembles the unsigned write transaction.
///
/// Output 0 is the `OP_RETURN`. The change output follows unless it would be
/// dust.
pub fn build_op_return_tx(selection: &Selection, op_return: ScriptBuf, change_script: ScriptBuf) -> Transaction {
    let input = selection
        .inputs
        .iter()
        .map(|utxo| TxIn {
            previous_output: OutPoint::new(utxo.txid, utxo.vout),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::default(),
        })
        .collect();

    let mut output = vec![TxOut {
        value: Amount::ZERO,
        script_pubkey: op_return,
    }];

    let change = selection.change();
    if change >= change_script.minimal_non_dust() {
        output.push(TxOut {
            value: change,
            script_pubkey: change_script,
        });
    } else {
        debug!(%change, "dropping dust change");
    }

    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input,
        output,
    }
}
