use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use darelay_merkle::Hash32;

use crate::errors::ClientResult;
use crate::record::{RecordKind, SubmissionRecord};
use crate::traits::ProofStore;

/// Proof store keeping records in memory.
#[derive(Debug, Default)]
pub struct InMemoryProofStore {
    records: Mutex<Vec<SubmissionRecord>>,
}

impl InMemoryProofStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn records_mut(&self) -> MutexGuard<'_, Vec<SubmissionRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copies of every record, in insertion order.
    pub fn records(&self) -> Vec<SubmissionRecord> {
        self.records_mut().clone()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records_mut().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records_mut().is_empty()
    }
}

#[async_trait]
impl ProofStore for InMemoryProofStore {
    async fn create(&self, record: &SubmissionRecord) -> ClientResult<()> {
        self.records_mut().push(record.clone());
        Ok(())
    }

    async fn list_since(&self, since: DateTime<Utc>) -> ClientResult<Vec<Hash32>> {
        let mut batches: Vec<_> = self
            .records_mut()
            .iter()
            .filter(|r| r.kind == RecordKind::Batch && r.created_at >= since)
            .map(|r| (r.created_at, r.merkle_root))
            .collect();
        batches.sort_by_key(|(at, _)| *at);
        Ok(batches.into_iter().map(|(_, root)| root).collect())
    }

    async fn last_super_proof_at(&self) -> ClientResult<Option<DateTime<Utc>>> {
        Ok(self
            .records_mut()
            .iter()
            .filter(|r| r.kind == RecordKind::SuperProof)
            .map(|r| r.created_at)
            .max())
    }
}
