//! Two-phase envelope writes.
//!
//! The commit pays a taproot output whose single leaf is the envelope script.
//! The reveal spends that output through the script path, which puts the
//! payload in the witness.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::Message;
use bitcoin::sighash::{Prevouts, SighashCache};
use bitcoin::taproot::{self, LeafVersion, TapLeafHash, TaprootBuilder, TaprootSpendInfo};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, Network, OutPoint, ScriptBuf, Sequence, TapSighashType, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use darelay_l1_envelope_fmt::builder::build_envelope_script;
use darelay_resilience::Retryable;
use tokio::time::Instant;
use tracing::*;

use crate::errors::{BtcioError, BtcioResult};
use crate::keys::TaprootKeyPair;
use crate::rpc::{WalletRpc, WalletTransaction};

/// Amount locked in the commit output.
pub const DEFAULT_COMMIT_AMOUNT: Amount = Amount::from_sat(100_000);

/// Value of the reveal output.
pub const REVEAL_AMOUNT: Amount = Amount::from_sat(1_000);

/// Interval between confirmation polls.
pub const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// How long to wait for a confirmation.
pub const DEFAULT_CONFIRMATION_DEADLINE: Duration = Duration::from_secs(600);

/// Progress of one envelope write.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteState {
    /// Nothing done yet.
    Idle,
    /// The envelope address is derived and the wallet picked its funding.
    UtxoSelected,
    /// The commit transaction is in the mempool.
    CommitBroadcast,
    /// The reveal is built and signed.
    RevealSigned,
    /// The reveal is in the mempool.
    RevealBroadcast,
    /// The reveal has confirmed.
    Confirmed,
    /// The write was abandoned.
    Failed,
}

impl WriteState {
    /// Whether `next` directly follows `self`.
    pub fn can_transition_to(self, next: WriteState) -> bool {
        use WriteState::*;
        matches!(
            (self, next),
            (Idle, UtxoSelected)
                | (UtxoSelected, CommitBroadcast)
                | (CommitBroadcast, RevealSigned)
                | (RevealSigned, RevealBroadcast)
                | (RevealBroadcast, Confirmed)
        ) || (next == Failed && !self.is_terminal())
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, WriteState::Confirmed | WriteState::Failed)
    }
}

/// Tracks a write through [`WriteState`] and rejects out-of-order steps.
#[derive(Debug)]
pub struct WriteSession {
    state: WriteState,
}

impl Default for WriteSession {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteSession {
    /// Starts in [`WriteState::Idle`].
    pub fn new() -> Self {
        Self {
            state: WriteState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> WriteState {
        self.state
    }

    /// Moves to `next` if that is a legal step.
    pub fn advance(&mut self, next: WriteState) -> BtcioResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(BtcioError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        trace!(from = ?self.state, to = ?next, "write session transition");
        self.state = next;
        Ok(())
    }

    /// Marks the session failed. Has no effect once terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = WriteState::Failed;
        }
    }
}

/// Taproot output committing to one envelope.
#[derive(Clone, Debug)]
pub struct EnvelopeAddress {
    address: Address,
    script: ScriptBuf,
    spend_info: TaprootSpendInfo,
}

impl EnvelopeAddress {
    /// Bech32m address to commit to.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// The envelope leaf script.
    pub fn leaf_script(&self) -> &ScriptBuf {
        &self.script
    }

    /// Taproot spend data for the script path.
    pub fn spend_info(&self) -> &TaprootSpendInfo {
        &self.spend_info
    }
}

/// Commit output recorded for the reveal.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommitOutput {
    /// Outpoint funding the envelope.
    pub outpoint: OutPoint,
    /// Its value.
    pub amount: Amount,
    /// Its script pubkey.
    pub script_pubkey: ScriptBuf,
}

/// Outcome of a full commit/reveal write.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnvelopeWrite {
    /// Commit transaction.
    pub commit_txid: Txid,
    /// Reveal transaction carrying the payload.
    pub reveal_txid: Txid,
    /// Height the reveal confirmed at, when known.
    pub block_height: Option<u64>,
}

/// Chain-side progress of a write that failed after its commit went out.
#[derive(Clone, Debug)]
struct PendingWrite {
    commit: CommitOutput,
    reveal_txid: Option<Txid>,
}

/// Builds, signs and broadcasts commit/reveal pairs.
///
/// A [`write`](Self::write) that fails with a retryable error after its commit
/// was broadcast is remembered by payload. Writing the same payload again
/// resumes from the recorded commit or reveal instead of funding a new one.
#[derive(Debug)]
pub struct CommitRevealWriter<R> {
    rpc: Arc<R>,
    keys: Arc<TaprootKeyPair>,
    network: Network,
    commit_amount: Amount,
    poll_interval: Duration,
    deadline: Duration,
    pending: Mutex<HashMap<Vec<u8>, PendingWrite>>,
}

impl<R: WalletRpc> CommitRevealWriter<R> {
    /// Creates a writer with the default commit amount and deadline.
    pub fn new(rpc: Arc<R>, keys: Arc<TaprootKeyPair>, network: Network) -> Self {
        Self {
            rpc,
            keys,
            network,
            commit_amount: DEFAULT_COMMIT_AMOUNT,
            poll_interval: CONFIRMATION_POLL_INTERVAL,
            deadline: DEFAULT_CONFIRMATION_DEADLINE,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the commit amount.
    pub fn with_commit_amount(mut self, amount: Amount) -> Self {
        self.commit_amount = amount;
        self
    }

    /// Overrides how long [`Self::await_confirmation`] waits.
    pub fn with_confirmation_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Derives the taproot address committing to `payload`.
    pub fn derive_address(&self, payload: &[u8]) -> BtcioResult<EnvelopeAddress> {
        let signing = self.keys.signing_pubkey().serialize();
        let script = build_envelope_script(payload, &signing)?;

        let spend_info = TaprootBuilder::new()
            .add_leaf(0, script.clone())
            .map_err(|e| BtcioError::AddressDerivation(e.to_string()))?
            .finalize(self.keys.secp(), self.keys.internal_key())
            .map_err(|_| BtcioError::AddressDerivation("incomplete taproot tree".to_owned()))?;

        let address = Address::p2tr_tweaked(spend_info.output_key(), self.network);
        Ok(EnvelopeAddress {
            address,
            script,
            spend_info,
        })
    }

    /// Pays `amount` to the envelope address from the wallet and records the
    /// funding output.
    pub async fn commit(&self, envelope: &EnvelopeAddress, amount: Amount) -> BtcioResult<CommitOutput> {
        let txid = self.rpc.send_to_address(envelope.address(), amount).await?;
        let tx = self.rpc.get_raw_transaction(&txid).await?;

        let script_pubkey = envelope.address().script_pubkey();
        let vout = tx
            .output
            .iter()
            .position(|out| out.script_pubkey == script_pubkey && out.value == amount)
            .ok_or(BtcioError::MissingCommitOutput { txid })?;
        let vout = u32::try_from(vout).map_err(|_| BtcioError::MissingCommitOutput { txid })?;

        info!(%txid, %vout, %amount, "commit broadcast");
        Ok(CommitOutput {
            outpoint: OutPoint::new(txid, vout),
            amount,
            script_pubkey,
        })
    }

    /// Builds and signs the script-path spend of `commit`.
    pub fn sign_reveal(&self, envelope: &EnvelopeAddress, commit: &CommitOutput) -> BtcioResult<Transaction> {
        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: commit.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::default(),
            }],
            output: vec![TxOut {
                value: REVEAL_AMOUNT,
                script_pubkey: envelope.address().script_pubkey(),
            }],
        };

        let prevouts = [TxOut {
            value: commit.amount,
            script_pubkey: commit.script_pubkey.clone(),
        }];
        let leaf_hash = TapLeafHash::from_script(envelope.leaf_script(), LeafVersion::TapScript);
        let sighash = SighashCache::new(&tx)
            .taproot_script_spend_signature_hash(0, &Prevouts::All(&prevouts), leaf_hash, TapSighashType::Default)
            .map_err(|e| BtcioError::Signing(e.to_string()))?;

        let msg = Message::from_digest(sighash.to_byte_array());
        let signature = taproot::Signature {
            signature: self.keys.sign_schnorr(&msg),
            sighash_type: TapSighashType::Default,
        };

        let control_block = envelope
            .spend_info()
            .control_block(&(envelope.leaf_script().clone(), LeafVersion::TapScript))
            .ok_or_else(|| BtcioError::Signing("leaf missing from taproot tree".to_owned()))?;

        let mut witness = Witness::new();
        witness.push(signature.to_vec());
        witness.push(envelope.leaf_script().as_bytes());
        witness.push(control_block.serialize());
        tx.input[0].witness = witness;

        Ok(tx)
    }

    /// Signs and broadcasts the reveal of `commit`.
    pub async fn reveal(&self, envelope: &EnvelopeAddress, commit: &CommitOutput) -> BtcioResult<Txid> {
        let tx = self.sign_reveal(envelope, commit)?;
        let txid = self.rpc.send_raw_transaction(&tx).await?;
        info!(%txid, commit = %commit.outpoint, "reveal broadcast");
        Ok(txid)
    }

    /// Polls the wallet until `txid` has a confirmation or the deadline
    /// passes.
    ///
    /// Transient RPC failures while polling are logged and polled through.
    pub async fn await_confirmation(&self, txid: &Txid) -> BtcioResult<WalletTransaction> {
        let start = Instant::now();
        loop {
            match self.rpc.get_transaction(txid).await {
                Ok(wtx) if wtx.is_confirmed() => {
                    debug!(%txid, confirmations = wtx.confirmations, "tx confirmed");
                    return Ok(wtx);
                }
                Ok(wtx) => trace!(%txid, confirmations = wtx.confirmations, "tx not yet confirmed"),
                Err(e @ BtcioError::RpcUnavailable(_)) => warn!(%txid, %e, "confirmation poll failed"),
                Err(e) => return Err(e),
            }

            let waited = start.elapsed();
            if waited >= self.deadline {
                return Err(BtcioError::ConfirmationTimeout { txid: *txid, waited });
            }
            tokio::time::sleep(self.poll_interval.min(self.deadline - waited)).await;
        }
    }

    /// Runs a full write: derive, commit, reveal and wait for the reveal to
    /// confirm.
    pub async fn write(&self, payload: &[u8]) -> BtcioResult<EnvelopeWrite> {
        let mut session = WriteSession::new();
        let res = self.drive(&mut session, payload).await;
        match &res {
            Ok(_) => {
                self.pending().remove(payload);
            }
            Err(e) => {
                warn!(state = ?session.state(), %e, "envelope write failed");
                session.fail();
                if !e.is_retryable() {
                    self.pending().remove(payload);
                }
            }
        }
        res
    }

    /// Number of writes waiting to be resumed.
    pub fn pending_writes(&self) -> usize {
        self.pending().len()
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<Vec<u8>, PendingWrite>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remember(&self, payload: &[u8], write: PendingWrite) {
        self.pending().insert(payload.to_vec(), write);
    }

    async fn drive(&self, session: &mut WriteSession, payload: &[u8]) -> BtcioResult<EnvelopeWrite> {
        let envelope = self.derive_address(payload)?;
        session.advance(WriteState::UtxoSelected)?;

        let resumed = self.pending().get(payload).cloned();
        let commit = match &resumed {
            Some(prev) => {
                info!(commit = %prev.commit.outpoint, "resuming write from earlier commit");
                prev.commit.clone()
            }
            None => {
                let commit = self.commit(&envelope, self.commit_amount).await?;
                self.remember(payload, PendingWrite {
                    commit: commit.clone(),
                    reveal_txid: None,
                });
                commit
            }
        };
        session.advance(WriteState::CommitBroadcast)?;

        let reveal = self.sign_reveal(&envelope, &commit)?;
        session.advance(WriteState::RevealSigned)?;

        let reveal_txid = match resumed.and_then(|prev| prev.reveal_txid) {
            Some(txid) => txid,
            None => {
                let txid = self.rpc.send_raw_transaction(&reveal).await?;
                info!(reveal_txid = %txid, commit = %commit.outpoint, "reveal broadcast");
                self.remember(payload, PendingWrite {
                    commit: commit.clone(),
                    reveal_txid: Some(txid),
                });
                txid
            }
        };
        session.advance(WriteState::RevealBroadcast)?;

        let confirmed = self.await_confirmation(&reveal_txid).await?;
        session.advance(WriteState::Confirmed)?;

        Ok(EnvelopeWrite {
            commit_txid: commit.outpoint.txid,
            reveal_txid,
            block_height: confirmed.blockheight,
        })
    }
}
