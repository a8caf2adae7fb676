//! Relay configuration.
//!
//! Every field has a default so partial files deserialize. Loading the file is
//! left to the embedding binary.

use std::time::Duration;

use bitcoin::Network;
use darelay_btcio::{DEFAULT_RPC_TIMEOUT, FeePolicy};
use darelay_l1_txfmt::ProtocolId;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// UTC hours the super-proof job runs at by default.
pub const DEFAULT_SUPER_PROOF_HOURS: [u32; 6] = [0, 4, 8, 12, 16, 20];

/// Default look-back when no super proof was recorded yet.
pub const DEFAULT_SUPER_PROOF_LOOKBACK_SECS: u64 = 84_600;

/// How payloads are written to the UTXO chain.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorMode {
    /// Single `OP_RETURN` transaction.
    #[default]
    OpReturn,

    /// Taproot commit followed by a script-path reveal.
    Envelope,
}

/// Bitcoin node access.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitcoinConfig {
    /// JSON-RPC URL, including the wallet path if needed.
    pub url: String,
    /// RPC user.
    pub user: String,
    /// RPC password.
    pub password: String,
    /// Passphrase to unlock the wallet with before each write.
    pub wallet_passphrase: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Fee heuristic for `OP_RETURN` writes.
    pub fee_policy: FeePolicy,
    /// Write method.
    pub anchor: AnchorMode,
}

impl Default for BitcoinConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:18443".to_owned(),
            user: String::new(),
            password: String::new(),
            wallet_passphrase: None,
            timeout_secs: DEFAULT_RPC_TIMEOUT.as_secs(),
            fee_policy: FeePolicy::default(),
            anchor: AnchorMode::default(),
        }
    }
}

impl BitcoinConfig {
    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Ingest endpoints.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Publisher to subscribe to.
    pub endpoint: String,
    /// Topic filter.
    pub topic: String,
    /// Optional request/reply endpoint to bind.
    pub reply_endpoint: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            endpoint: "tcp://127.0.0.1:28332".to_owned(),
            topic: "rawblock".to_owned(),
            reply_endpoint: None,
        }
    }
}

/// Periodic super-proof job.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuperProofConfig {
    /// Whether the job runs.
    pub enabled: bool,
    /// UTC hours to run at.
    pub hours: Vec<u32>,
    /// Look-back window in seconds when there is no previous super proof.
    pub lookback_secs: u64,
}

impl Default for SuperProofConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hours: DEFAULT_SUPER_PROOF_HOURS.to_vec(),
            lookback_secs: DEFAULT_SUPER_PROOF_LOOKBACK_SECS,
        }
    }
}

/// Top-level relay configuration.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayerConfig {
    /// Prefix marking relay payloads on chain.
    pub protocol_id: ProtocolId,
    /// Bitcoin network.
    pub network: Network,
    /// WIF secret for envelope writes.
    pub signing_key_wif: Option<String>,
    /// Bitcoin node.
    pub bitcoin: BitcoinConfig,
    /// Ingest endpoints.
    pub ingest: IngestConfig,
    /// Flush after every this many messages.
    pub write_interval_blocks: u64,
    /// Flush at every aligned interval of this many seconds.
    pub write_interval_secs: u64,
    /// Flush timer resolution in seconds.
    pub flush_tick_secs: u64,
    /// Super-proof job.
    pub super_proof: SuperProofConfig,
    /// Time in-flight submissions get to finish on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            protocol_id: ProtocolId::default(),
            network: Network::Regtest,
            signing_key_wif: None,
            bitcoin: BitcoinConfig::default(),
            ingest: IngestConfig::default(),
            write_interval_blocks: 1,
            write_interval_secs: 600,
            flush_tick_secs: 10,
            super_proof: SuperProofConfig::default(),
            shutdown_grace_secs: 30,
        }
    }
}

impl RelayerConfig {
    /// Checks the config for values the relay cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bitcoin.url.is_empty() {
            return Err(ConfigError::Empty("bitcoin.url"));
        }
        if self.ingest.endpoint.is_empty() {
            return Err(ConfigError::Empty("ingest.endpoint"));
        }
        if self.ingest.reply_endpoint.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::Empty("ingest.reply_endpoint"));
        }

        let positive = [
            ("write_interval_blocks", self.write_interval_blocks),
            ("write_interval_secs", self.write_interval_secs),
            ("flush_tick_secs", self.flush_tick_secs),
            ("bitcoin.timeout_secs", self.bitcoin.timeout_secs),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero(*name));
        }

        if let Some(hour) = self.super_proof.hours.iter().find(|h| **h >= 24) {
            return Err(ConfigError::BadHour(*hour));
        }

        // Round-trip through the parser to catch ids built by hand.
        self.protocol_id
            .as_str()
            .ok_or_else(|| ConfigError::ProtocolId("not ascii".to_owned()))?
            .parse::<ProtocolId>()
            .map_err(|e| ConfigError::ProtocolId(e.to_string()))?;

        if self.bitcoin.anchor == AnchorMode::Envelope && self.signing_key_wif.is_none() {
            return Err(ConfigError::SigningKey("envelope writes need signing_key_wif".to_owned()));
        }

        Ok(())
    }

    /// Interval flush period.
    pub fn write_interval(&self) -> Duration {
        Duration::from_secs(self.write_interval_secs)
    }

    /// Flush timer period.
    pub fn flush_tick(&self) -> Duration {
        Duration::from_secs(self.flush_tick_secs)
    }

    /// Shutdown grace period.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
