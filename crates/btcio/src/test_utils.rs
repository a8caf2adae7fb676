//! Scripted in-memory wallet for unit tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::address::NetworkUnchecked;
use bitcoin::block::{Header, Version as BlockVersion};
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Keypair, Secp256k1, SecretKey};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, Block, BlockHash, CompactTarget, Network, OutPoint, ScriptBuf, Sequence, Transaction,
    TxIn, TxMerkleNode, TxOut, Txid, Witness,
};

use crate::errors::{BtcioError, BtcioResult};
use crate::keys::TaprootKeyPair;
use crate::rpc::{SignedTx, Utxo, WalletRpc, WalletTransaction};

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub(crate) utxos: Vec<Utxo>,
    pub(crate) unlocked_with: Option<String>,
    pub(crate) broadcast: Vec<Transaction>,
    pub(crate) reject_broadcast: Option<(i64, String)>,
    pub(crate) incomplete_sign: bool,
    pub(crate) commit_vout: u32,
    pub(crate) commit_misdirect: bool,
    pub(crate) commits: u32,
    pub(crate) unavailable_broadcasts: u32,
    pub(crate) txs: HashMap<Txid, Transaction>,
    pub(crate) confirmations: HashMap<Txid, i64>,
    pub(crate) unavailable_polls: u32,
    pub(crate) blocks: Vec<Block>,
}

#[derive(Debug, Default)]
pub(crate) struct MockWallet {
    state: Mutex<MockState>,
}

impl MockWallet {
    pub(crate) fn with_utxos(utxos: Vec<Utxo>) -> Self {
        let wallet = Self::default();
        wallet.state().utxos = utxos;
        wallet
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

pub(crate) fn utxo(n: u8, sats: u64) -> Utxo {
    Utxo {
        txid: Txid::from_byte_array([n; 32]),
        vout: 0,
        amount: Amount::from_sat(sats),
    }
}

pub(crate) fn test_keys() -> TaprootKeyPair {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(&[7u8; 32]).unwrap();
    TaprootKeyPair::from_keypair(secp.clone(), Keypair::from_secret_key(&secp, &sk))
}

pub(crate) fn change_address() -> Address {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(&[3u8; 32]).unwrap();
    let (xonly, _) = Keypair::from_secret_key(&secp, &sk).x_only_public_key();
    Address::p2tr(&secp, xonly, None, Network::Regtest)
}

pub(crate) fn block_with(nonce: u32, txdata: Vec<Transaction>) -> Block {
    Block {
        header: Header {
            version: BlockVersion::ONE,
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root: TxMerkleNode::all_zeros(),
            time: 0,
            bits: CompactTarget::from_consensus(0x207fffff),
            nonce,
        },
        txdata,
    }
}

fn funding_tx(address: &Address, amount: Amount, vout: u32) -> Transaction {
    let mut output: Vec<TxOut> = (0..vout)
        .map(|_| TxOut {
            value: Amount::from_sat(5_000),
            script_pubkey: change_address().script_pubkey(),
        })
        .collect();
    output.push(TxOut {
        value: amount,
        script_pubkey: address.script_pubkey(),
    });

    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(Txid::from_byte_array([0xee; 32]), 0),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::default(),
        }],
        output,
    }
}

#[async_trait]
impl WalletRpc for MockWallet {
    async fn wallet_passphrase(&self, passphrase: &str, _timeout_secs: u64) -> BtcioResult<()> {
        self.state().unlocked_with = Some(passphrase.to_owned());
        Ok(())
    }

    async fn list_unspent(&self, _min_conf: u32, max_count: usize) -> BtcioResult<Vec<Utxo>> {
        Ok(self.state().utxos.iter().take(max_count).cloned().collect())
    }

    async fn get_raw_change_address(&self) -> BtcioResult<Address<NetworkUnchecked>> {
        Ok(change_address().as_unchecked().clone())
    }

    async fn send_to_address(&self, address: &Address, amount: Amount) -> BtcioResult<Txid> {
        let mut state = self.state();
        state.commits += 1;
        let tx = if state.commit_misdirect {
            funding_tx(&change_address(), amount, state.commit_vout)
        } else {
            funding_tx(address, amount, state.commit_vout)
        };
        let txid = tx.compute_txid();
        state.txs.insert(txid, tx);
        Ok(txid)
    }

    async fn sign_raw_transaction_with_wallet(&self, tx: &Transaction) -> BtcioResult<SignedTx> {
        Ok(SignedTx {
            hex: serialize_hex(tx),
            complete: !self.state().incomplete_sign,
        })
    }

    async fn send_raw_transaction(&self, tx: &Transaction) -> BtcioResult<Txid> {
        let mut state = self.state();
        if let Some((code, message)) = state.reject_broadcast.clone() {
            return Err(BtcioError::BroadcastRejected { code, message });
        }
        if state.unavailable_broadcasts > 0 {
            state.unavailable_broadcasts -= 1;
            return Err(BtcioError::RpcUnavailable("connection reset".into()));
        }
        let txid = tx.compute_txid();
        state.broadcast.push(tx.clone());
        state.txs.insert(txid, tx.clone());
        Ok(txid)
    }

    async fn get_transaction(&self, txid: &Txid) -> BtcioResult<WalletTransaction> {
        let mut state = self.state();
        if state.unavailable_polls > 0 {
            state.unavailable_polls -= 1;
            return Err(BtcioError::RpcUnavailable("connection refused".into()));
        }
        let confirmations = state.confirmations.get(txid).copied().unwrap_or(0);
        Ok(WalletTransaction {
            txid: *txid,
            confirmations,
            blockhash: None,
            blockheight: (confirmations > 0).then_some(100),
        })
    }

    async fn get_raw_transaction(&self, txid: &Txid) -> BtcioResult<Transaction> {
        self.state()
            .txs
            .get(txid)
            .cloned()
            .ok_or_else(|| BtcioError::rpc("getrawtransaction", -5, "No such mempool or blockchain transaction"))
    }

    async fn get_block_hash(&self, height: u64) -> BtcioResult<BlockHash> {
        let state = self.state();
        usize::try_from(height)
            .ok()
            .and_then(|h| state.blocks.get(h))
            .map(|b| b.block_hash())
            .ok_or_else(|| BtcioError::rpc("getblockhash", -8, "Block height out of range"))
    }

    async fn get_block(&self, hash: &BlockHash) -> BtcioResult<Block> {
        self.state()
            .blocks
            .iter()
            .find(|b| b.block_hash() == *hash)
            .cloned()
            .ok_or_else(|| BtcioError::rpc("getblock", -5, "Block not found"))
    }
}
