//! Scripted collaborators shared by the relayer integration tests.

#![allow(dead_code, unreachable_pub)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use darelay_btcio::{BtcioError, BtcioResult};
use darelay_merkle::Hash32;
use darelay_relayer::{
    ClientError, ClientResult, Collaborators, DualChainSubmitter, InMemoryProofStore, PriceOracle,
    SettlementContract, SettlementReceipt, TreeInfo, UtxoAnchor, UtxoLeg,
};
use darelay_resilience::{BreakerConfig, CircuitBreaker, Retrier, RetryPolicy};

pub const GAS_USED: u64 = 50_000;
pub const GAS_PRICE: u128 = 2_000_000_000;

#[derive(Debug, Default)]
pub struct MockAnchor {
    pub payloads: Mutex<Vec<Vec<u8>>>,
    /// Calls left that fail with a terminal error.
    pub reject: AtomicU32,
    /// Calls left that fail with a transient error.
    pub unavailable: AtomicU32,
    /// Calls never return while set.
    pub stall: AtomicBool,
}

impl MockAnchor {
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().unwrap().clone()
    }
}

fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl UtxoAnchor for MockAnchor {
    async fn anchor(&self, payload: &[u8]) -> BtcioResult<UtxoLeg> {
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if take(&self.unavailable) {
            return Err(BtcioError::RpcUnavailable("node down".to_owned()));
        }
        if take(&self.reject) {
            return Err(BtcioError::InsufficientFunds("empty wallet".to_owned()));
        }
        let mut payloads = self.payloads.lock().unwrap();
        payloads.push(payload.to_vec());
        Ok(UtxoLeg {
            tx_hash: format!("{:064x}", payloads.len()),
            block_height: Some(100),
        })
    }
}

#[derive(Debug, Default)]
pub struct MockSettlement {
    pub stored: Mutex<Vec<(Hash32, Vec<Hash32>)>>,
    pub existing: Mutex<HashSet<Hash32>>,
    pub reject: AtomicU32,
    pub unavailable: AtomicU32,
    pub revert: AtomicU32,
}

impl MockSettlement {
    pub fn stored(&self) -> Vec<(Hash32, Vec<Hash32>)> {
        self.stored.lock().unwrap().clone()
    }
}

#[async_trait]
impl SettlementContract for MockSettlement {
    async fn store_tree(&self, root: Hash32, leaves: &[Hash32]) -> ClientResult<SettlementReceipt> {
        if take(&self.unavailable) {
            return Err(ClientError::Unavailable("rpc timeout".to_owned()));
        }
        if take(&self.reject) {
            return Err(ClientError::Rejected("nonce too low".to_owned()));
        }
        let status = !take(&self.revert);
        let mut stored = self.stored.lock().unwrap();
        if status {
            stored.push((root, leaves.to_vec()));
            self.existing.lock().unwrap().insert(root);
        }
        Ok(SettlementReceipt {
            tx_hash: format!("0x{}", hex::encode(root)),
            status,
            block_number: 7,
            gas_used: GAS_USED,
            effective_gas_price: GAS_PRICE,
        })
    }

    async fn tree_exists(&self, root: Hash32) -> ClientResult<bool> {
        Ok(self.existing.lock().unwrap().contains(&root))
    }

    async fn tree_info(&self, root: Hash32) -> ClientResult<Option<TreeInfo>> {
        let exists = self.existing.lock().unwrap().contains(&root);
        Ok(exists.then(|| TreeInfo {
            root,
            leaf_count: 0,
            block_number: 5,
        }))
    }

    async fn all_roots(&self) -> ClientResult<Vec<Hash32>> {
        Ok(self.stored().into_iter().map(|(root, _)| root).collect())
    }
}

#[derive(Debug)]
pub struct MockOracle(pub Option<f64>);

#[async_trait]
impl PriceOracle for MockOracle {
    async fn native_usd_price(&self) -> ClientResult<f64> {
        self.0.ok_or_else(|| ClientError::Unavailable("price feed down".to_owned()))
    }
}

#[derive(Debug)]
pub struct Harness {
    pub anchor: Arc<MockAnchor>,
    pub settlement: Arc<MockSettlement>,
    pub super_settlement: Arc<MockSettlement>,
    pub store: Arc<InMemoryProofStore>,
    pub oracle: Arc<MockOracle>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            anchor: Arc::default(),
            settlement: Arc::default(),
            super_settlement: Arc::default(),
            store: Arc::default(),
            oracle: Arc::new(MockOracle(Some(2_000.0))),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            utxo: self.anchor.clone(),
            settlement: self.settlement.clone(),
            super_proof_settlement: Some(self.super_settlement.clone()),
            oracle: self.oracle.clone(),
            store: self.store.clone(),
        }
    }

    /// Submitter whose retries wait a millisecond.
    pub fn submitter(&self) -> DualChainSubmitter {
        let c = self.collaborators();
        DualChainSubmitter::new(Default::default(), c.utxo, c.settlement, c.oracle, c.store)
            .with_retriers(fast_retrier(), fast_retrier(), fast_retrier())
    }
}

pub fn fast_retrier() -> Retrier {
    let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(1), 1.0);
    let breaker = CircuitBreaker::new("test", BreakerConfig::new(100, Duration::from_secs(60)));
    Retrier::new(policy, Arc::new(breaker))
}
