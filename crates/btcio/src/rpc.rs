//! Wallet RPC surface used by the writers and the reader.

use async_trait::async_trait;
use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Amount, Block, BlockHash, Transaction, Txid};
use serde::Deserialize;

use crate::errors::BtcioResult;

/// A spendable wallet output as reported by `listunspent`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Utxo {
    /// Funding transaction.
    pub txid: Txid,
    /// Output index.
    pub vout: u32,
    /// Output value.
    #[serde(with = "bitcoin::amount::serde::as_btc")]
    pub amount: Amount,
}

/// Result of `signrawtransactionwithwallet`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct SignedTx {
    /// Hex-encoded signed transaction.
    pub hex: String,
    /// Whether every input is fully signed.
    pub complete: bool,
}

impl SignedTx {
    /// Decodes the signed transaction.
    pub fn transaction(&self) -> BtcioResult<Transaction> {
        let raw = hex::decode(&self.hex)?;
        Ok(bitcoin::consensus::deserialize(&raw)?)
    }
}

/// Subset of `gettransaction` the relay cares about.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct WalletTransaction {
    /// Transaction id.
    pub txid: Txid,
    /// Confirmations, negative when conflicted.
    pub confirmations: i64,
    /// Block containing the transaction, once mined.
    #[serde(default)]
    pub blockhash: Option<BlockHash>,
    /// Height of that block.
    #[serde(default)]
    pub blockheight: Option<u64>,
}

impl WalletTransaction {
    /// Whether the transaction has at least one confirmation.
    pub fn is_confirmed(&self) -> bool {
        self.confirmations >= 1
    }
}

/// Wallet and chain calls against a bitcoin node.
///
/// Implementations never cache UTXOs: every call goes to the node.
#[async_trait]
pub trait WalletRpc: Send + Sync + 'static {
    /// Unlocks the wallet for `timeout_secs`.
    async fn wallet_passphrase(&self, passphrase: &str, timeout_secs: u64) -> BtcioResult<()>;

    /// Lists spendable outputs with at least `min_conf` confirmations,
    /// returning at most `max_count` of them.
    async fn list_unspent(&self, min_conf: u32, max_count: usize) -> BtcioResult<Vec<Utxo>>;

    /// Returns a fresh change address from the wallet.
    async fn get_raw_change_address(&self) -> BtcioResult<Address<NetworkUnchecked>>;

    /// Pays `amount` to `address` from the wallet.
    async fn send_to_address(&self, address: &Address, amount: Amount) -> BtcioResult<Txid>;

    /// Signs every wallet-owned input of `tx`.
    async fn sign_raw_transaction_with_wallet(&self, tx: &Transaction) -> BtcioResult<SignedTx>;

    /// Broadcasts a fully signed transaction.
    async fn send_raw_transaction(&self, tx: &Transaction) -> BtcioResult<Txid>;

    /// Looks up a wallet transaction.
    async fn get_transaction(&self, txid: &Txid) -> BtcioResult<WalletTransaction>;

    /// Fetches any transaction known to the node.
    async fn get_raw_transaction(&self, txid: &Txid) -> BtcioResult<Transaction>;

    /// Hash of the block at `height` on the active chain.
    async fn get_block_hash(&self, height: u64) -> BtcioResult<BlockHash>;

    /// Fetches a full block.
    async fn get_block(&self, hash: &BlockHash) -> BtcioResult<Block>;
}
