//! JSON-RPC 1.0 client for bitcoind.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::address::NetworkUnchecked;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::{Address, Amount, Block, BlockHash, Transaction, Txid};
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::*;

use crate::errors::{BtcioError, BtcioResult};
use crate::rpc::{SignedTx, Utxo, WalletRpc, WalletTransaction};

/// Default per-request timeout.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

const RPC_WALLET_INSUFFICIENT_FUNDS: i64 = -6;
const RPC_VERIFY_ERROR: i64 = -25;
const RPC_VERIFY_REJECTED: i64 = -26;
const RPC_VERIFY_ALREADY_IN_CHAIN: i64 = -27;
const RPC_IN_WARMUP: i64 = -28;

/// `listunspent` upper confirmation bound, as bitcoin-cli defaults it.
const MAX_CONFIRMATIONS: u32 = 9_999_999;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Client for a bitcoind wallet over HTTP with basic auth.
pub struct BitcoinRpcClient {
    client: reqwest::Client,
    url: String,
    user: String,
    password: String,
    next_id: AtomicU64,
}

impl fmt::Debug for BitcoinRpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitcoinRpcClient")
            .field("url", &self.url)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl BitcoinRpcClient {
    /// Creates a client for `url` with the given credentials.
    pub fn new(
        url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> BtcioResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BtcioError::RpcUnavailable(format!("http client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
            user: user.into(),
            password: password.into(),
            next_id: AtomicU64::new(0),
        })
    }

    /// Node URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Performs one JSON-RPC call.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> BtcioResult<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });
        trace!(%method, %id, "bitcoin rpc call");

        let resp = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| BtcioError::RpcUnavailable(format!("{method}: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| BtcioError::RpcUnavailable(format!("{method}: {e}")))?;

        decode_response(method, status, &text)
    }
}

fn decode_response<T: DeserializeOwned>(method: &str, status: StatusCode, body: &str) -> BtcioResult<T> {
    match serde_json::from_str::<RpcResponse>(body) {
        // bitcoind reports RPC errors with a 500, so the envelope wins over
        // the status code.
        Ok(RpcResponse { error: Some(err), .. }) => Err(classify_rpc_error(method, err.code, err.message)),
        Ok(resp) if status.is_success() => serde_json::from_value(resp.result)
            .map_err(|e| BtcioError::Codec(format!("{method} result: {e}"))),
        _ if status.is_server_error() => Err(BtcioError::RpcUnavailable(format!("{method}: http {status}"))),
        _ => {
            let snippet: String = body.chars().take(200).collect();
            Err(BtcioError::rpc(method, i64::from(status.as_u16()), snippet))
        }
    }
}

fn classify_rpc_error(method: &str, code: i64, message: String) -> BtcioError {
    match code {
        RPC_IN_WARMUP => BtcioError::RpcUnavailable(format!("{method}: {message}")),
        RPC_WALLET_INSUFFICIENT_FUNDS => BtcioError::InsufficientFunds(message),
        RPC_VERIFY_ERROR | RPC_VERIFY_REJECTED | RPC_VERIFY_ALREADY_IN_CHAIN
            if method == "sendrawtransaction" =>
        {
            BtcioError::BroadcastRejected { code, message }
        }
        _ => BtcioError::rpc(method, code, message),
    }
}

fn decode_hex<T: bitcoin::consensus::Decodable>(hex_str: &str) -> BtcioResult<T> {
    let raw = hex::decode(hex_str)?;
    Ok(bitcoin::consensus::deserialize(&raw)?)
}

#[async_trait]
impl WalletRpc for BitcoinRpcClient {
    async fn wallet_passphrase(&self, passphrase: &str, timeout_secs: u64) -> BtcioResult<()> {
        self.call("walletpassphrase", json!([passphrase, timeout_secs]))
            .await
    }

    async fn list_unspent(&self, min_conf: u32, max_count: usize) -> BtcioResult<Vec<Utxo>> {
        self.call(
            "listunspent",
            json!([min_conf, MAX_CONFIRMATIONS, [], true, { "maximumCount": max_count }]),
        )
        .await
    }

    async fn get_raw_change_address(&self) -> BtcioResult<Address<NetworkUnchecked>> {
        self.call("getrawchangeaddress", json!([])).await
    }

    async fn send_to_address(&self, address: &Address, amount: Amount) -> BtcioResult<Txid> {
        self.call(
            "sendtoaddress",
            json!([address.to_string(), amount.to_btc()]),
        )
        .await
    }

    async fn sign_raw_transaction_with_wallet(&self, tx: &Transaction) -> BtcioResult<SignedTx> {
        self.call("signrawtransactionwithwallet", json!([serialize_hex(tx)]))
            .await
    }

    async fn send_raw_transaction(&self, tx: &Transaction) -> BtcioResult<Txid> {
        self.call("sendrawtransaction", json!([serialize_hex(tx)]))
            .await
    }

    async fn get_transaction(&self, txid: &Txid) -> BtcioResult<WalletTransaction> {
        self.call("gettransaction", json!([txid.to_string()]))
            .await
    }

    async fn get_raw_transaction(&self, txid: &Txid) -> BtcioResult<Transaction> {
        let hex_str: String = self
            .call("getrawtransaction", json!([txid.to_string(), false]))
            .await?;
        decode_hex(&hex_str)
    }

    async fn get_block_hash(&self, height: u64) -> BtcioResult<BlockHash> {
        self.call("getblockhash", json!([height])).await
    }

    async fn get_block(&self, hash: &BlockHash) -> BtcioResult<Block> {
        let hex_str: String = self
            .call("getblock", json!([hash.to_string(), 0]))
            .await?;
        decode_hex(&hex_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_result() {
        let body = r#"{"result":"00000000000000000000000000000000000000000000000000000000000000aa","error":null,"id":1}"#;
        let hash: BlockHash = decode_response("getblockhash", StatusCode::OK, body).unwrap();
        assert!(hash.to_string().ends_with("aa"));
    }

    #[test]
    fn null_result_is_unit() {
        let body = r#"{"result":null,"error":null,"id":2}"#;
        let res: BtcioResult<()> = decode_response("walletpassphrase", StatusCode::OK, body);
        assert!(res.is_ok());
    }

    #[test]
    fn classifies_errors() {
        let rejected = r#"{"result":null,"error":{"code":-26,"message":"min relay fee not met"},"id":3}"#;
        let err = decode_response::<Txid>("sendrawtransaction", StatusCode::INTERNAL_SERVER_ERROR, rejected)
            .unwrap_err();
        assert!(matches!(err, BtcioError::BroadcastRejected { code: -26, .. }));

        // Same code from another method is an ordinary rpc error.
        let err = decode_response::<Txid>("testmempoolaccept", StatusCode::INTERNAL_SERVER_ERROR, rejected)
            .unwrap_err();
        assert!(matches!(err, BtcioError::Rpc { code: -26, .. }));

        let warmup = r#"{"result":null,"error":{"code":-28,"message":"Loading block index..."},"id":4}"#;
        let err = decode_response::<u64>("getblockcount", StatusCode::INTERNAL_SERVER_ERROR, warmup).unwrap_err();
        assert!(matches!(err, BtcioError::RpcUnavailable(_)));

        let funds = r#"{"result":null,"error":{"code":-6,"message":"Insufficient funds"},"id":5}"#;
        let err = decode_response::<Txid>("sendtoaddress", StatusCode::INTERNAL_SERVER_ERROR, funds).unwrap_err();
        assert!(matches!(err, BtcioError::InsufficientFunds(_)));
    }

    #[test]
    fn bare_status_codes() {
        let err = decode_response::<u64>("getblockcount", StatusCode::BAD_GATEWAY, "").unwrap_err();
        assert!(matches!(err, BtcioError::RpcUnavailable(_)));

        let err = decode_response::<u64>("getblockcount", StatusCode::UNAUTHORIZED, "").unwrap_err();
        assert!(matches!(err, BtcioError::Rpc { code: 401, .. }));
    }
}
