//! Periodic commitment over recently anchored batch roots.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use chrono::{DateTime, Days, TimeDelta, Utc};
use darelay_ingest::panic_message;
use darelay_merkle::MerkleCommitment;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::errors::ClientError;
use crate::record::RecordKind;
use crate::submitter::{DualChainSubmitter, SubmissionOutcome};

/// First run time strictly after `now` at one of the UTC `hours`.
///
/// Returns `None` if `hours` holds no valid hour of the day.
pub fn next_run_after(now: DateTime<Utc>, hours: &[u32]) -> Option<DateTime<Utc>> {
    let mut hours: Vec<u32> = hours.iter().copied().filter(|h| *h < 24).collect();
    hours.sort_unstable();

    let today = now.date_naive();
    for day in [today, today.checked_add_days(Days::new(1))?] {
        for hour in &hours {
            let at = day.and_hms_opt(*hour, 0, 0)?.and_utc();
            if at > now {
                return Some(at);
            }
        }
    }
    None
}

/// Commits the batch roots recorded since the previous super proof and
/// anchors the result on both chains.
#[derive(Debug)]
pub struct SuperProofJob {
    submitter: DualChainSubmitter,
    hours: Vec<u32>,
    lookback: Duration,
}

impl SuperProofJob {
    /// Creates a job. `submitter` should already point at the super-proof
    /// settlement contract.
    pub fn new(submitter: DualChainSubmitter, hours: Vec<u32>, lookback: Duration) -> Self {
        Self {
            submitter,
            hours,
            lookback,
        }
    }

    /// Builds and submits one super proof as of `now`.
    ///
    /// The record is stamped with `now`, so batches recorded while the
    /// submission runs fall into the next super proof. Returns `Ok(None)` when
    /// there was nothing to commit.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<Option<SubmissionOutcome>, ClientError> {
        let store = self.submitter.store();
        let retrier = self.submitter.store_retrier();

        let last = retrier
            .run(move || store.last_super_proof_at())
            .await
            .map_err(|e| ClientError::Unavailable(e.to_string()))?;
        let since = last.unwrap_or_else(|| {
            TimeDelta::from_std(self.lookback)
                .ok()
                .and_then(|d| now.checked_sub_signed(d))
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        });

        let roots = retrier
            .run(move || store.list_since(since))
            .await
            .map_err(|e| ClientError::Unavailable(e.to_string()))?;
        if roots.is_empty() {
            info!(%since, "no new batch roots for a super proof");
            return Ok(None);
        }

        let commitment = MerkleCommitment::from_leaves(roots);
        info!(%since, roots = commitment.len(), root = %commitment.root_hex(), "built super proof");
        let outcome = self
            .submitter
            .submit_as_of(&commitment, RecordKind::SuperProof, now)
            .await;
        Ok(Some(outcome))
    }

    /// Runs at every scheduled hour until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            let now = Utc::now();
            let Some(next) = next_run_after(now, &self.hours) else {
                warn!(hours = ?self.hours, "no valid super proof hours, job stopped");
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            debug!(%next, ?wait, "next super proof scheduled");

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            let run = AssertUnwindSafe(self.run_once(Utc::now())).catch_unwind();
            match run.instrument(info_span!("super_proof")).await {
                Ok(Ok(Some(SubmissionOutcome::Failed))) => error!("super proof was not anchored"),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!(%e, "super proof skipped"),
                Err(panic) => error!(info = %panic_message(&*panic), "super proof panicked"),
            }
        }

        debug!("super proof job stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(date: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(date).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn next_run_table() {
        let hours = [0, 4, 8, 12, 16, 20];
        let cases = [
            ("2024-05-01T03:59:59Z", "2024-05-01T04:00:00Z"),
            ("2024-05-01T04:00:00Z", "2024-05-01T08:00:00Z"),
            ("2024-05-01T20:30:00Z", "2024-05-02T00:00:00Z"),
            ("2024-12-31T23:00:00Z", "2025-01-01T00:00:00Z"),
        ];
        for (now, want) in cases {
            assert_eq!(next_run_after(at(now), &hours), Some(at(want)), "now={now}");
        }
    }

    #[test]
    fn unsorted_and_invalid_hours() {
        let now = at("2024-05-01T10:00:00Z");
        assert_eq!(next_run_after(now, &[30, 12, 6]), Some(at("2024-05-01T12:00:00Z")));
        assert_eq!(next_run_after(now, &[24]), None);
        assert_eq!(next_run_after(now, &[]), None);
    }
}
