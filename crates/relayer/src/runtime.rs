//! Wiring of the relay tasks.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use darelay_btcio::{BitcoinRpcClient, CommitRevealWriter, OpReturnWriter, TaprootKeyPair};
use darelay_ingest::{Connector, IngestChannel, IngestMessage, IngestResult, error_ack, panic_message};
use darelay_merkle::{MerkleHasher, Sha256Hasher};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::{self, JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::aggregator::{Aggregator, Batch};
use crate::config::{AnchorMode, RelayerConfig};
use crate::errors::{ConfigError, RelayerResult};
use crate::record::RecordKind;
use crate::scheduler::{FlushSignal, FlushTimer};
use crate::submitter::{DualChainSubmitter, SubmissionOutcome};
use crate::super_proof::SuperProofJob;
use crate::traits::{PriceOracle, ProofStore, SettlementContract, UtxoAnchor};

/// Blobs buffered between the ingest tasks and the main loop.
const BLOB_QUEUE: usize = 1024;

/// The remote services a relay writes to.
#[derive(Clone)]
pub struct Collaborators {
    /// UTXO chain writer.
    pub utxo: Arc<dyn UtxoAnchor>,
    /// Contract batch roots are stored in.
    pub settlement: Arc<dyn SettlementContract>,
    /// Contract super proofs are stored in. Falls back to `settlement`.
    pub super_proof_settlement: Option<Arc<dyn SettlementContract>>,
    /// Native token price source.
    pub oracle: Arc<dyn PriceOracle>,
    /// Submission record store.
    pub store: Arc<dyn ProofStore>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("super_proof_settlement", &self.super_proof_settlement.is_some())
            .finish_non_exhaustive()
    }
}

/// Builds the UTXO chain writer selected by `config.bitcoin.anchor`.
pub fn utxo_anchor_from_config(config: &RelayerConfig) -> RelayerResult<Arc<dyn UtxoAnchor>> {
    let btc = &config.bitcoin;
    let rpc = Arc::new(BitcoinRpcClient::new(&btc.url, &btc.user, &btc.password, btc.timeout())?);

    let anchor: Arc<dyn UtxoAnchor> = match btc.anchor {
        AnchorMode::OpReturn => {
            let mut writer = OpReturnWriter::new(rpc, config.network).with_fee_policy(btc.fee_policy);
            if let Some(passphrase) = &btc.wallet_passphrase {
                writer = writer.with_wallet_passphrase(passphrase.clone());
            }
            Arc::new(writer)
        }
        AnchorMode::Envelope => {
            let wif = config
                .signing_key_wif
                .as_deref()
                .ok_or_else(|| ConfigError::SigningKey("envelope writes need signing_key_wif".to_owned()))?;
            let keys = TaprootKeyPair::from_wif(wif).map_err(|e| ConfigError::SigningKey(e.to_string()))?;
            Arc::new(CommitRevealWriter::new(rpc, Arc::new(keys), config.network))
        }
    };
    Ok(anchor)
}

/// Counters published by a running relay.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct RelayStatus {
    /// Blobs aggregated.
    pub received: u64,
    /// Batches handed to the submitter.
    pub batches: u64,
    /// Batches anchored on both chains.
    pub complete: u64,
    /// Batches anchored on one chain.
    pub partial: u64,
    /// Batches that failed and were requeued.
    pub failed: u64,
    /// Leaves waiting for the next flush.
    pub pending: usize,
    /// Submissions in flight.
    pub in_flight: usize,
    /// Leaves still unanchored when the relay stopped.
    pub dropped: usize,
}

/// Handle to a running relay.
#[derive(Debug)]
pub struct RelayHandle {
    shutdown: CancellationToken,
    status_rx: watch::Receiver<RelayStatus>,
    main: JoinHandle<()>,
    tasks: JoinSet<()>,
}

impl RelayHandle {
    /// Latest published status.
    pub fn status(&self) -> RelayStatus {
        self.status_rx.borrow().clone()
    }

    /// A receiver that sees every status update.
    pub fn subscribe_status(&self) -> watch::Receiver<RelayStatus> {
        self.status_rx.clone()
    }

    /// Token that stops the relay when cancelled.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Stops intake, waits for in-flight submissions within the grace period
    /// and joins every task.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        let res = match self.main.await {
            Ok(()) => Ok(()),
            Err(e) => Err(anyhow::anyhow!("relay loop failed: {}", join_error_message(e))),
        };
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                warn!(err = %join_error_message(e), "relay task failed");
            }
        }
        info!("relay stopped");
        res
    }
}

fn join_error_message(e: JoinError) -> String {
    if e.is_panic() {
        panic_message(&*e.into_panic())
    } else {
        e.to_string()
    }
}

/// What an ingest channel connects as.
#[derive(Clone, Debug)]
enum IngestRole {
    Subscribe { endpoint: String, topic: String },
    Reply { endpoint: String },
}

impl IngestRole {
    async fn connect<C: Connector>(&self, channel: &IngestChannel<C>) -> IngestResult<()> {
        match self {
            Self::Subscribe { endpoint, topic } => channel.subscribe(endpoint, topic.as_bytes()).await,
            Self::Reply { endpoint } => channel.reply(endpoint).await,
        }
    }

    fn acknowledges(&self) -> bool {
        matches!(self, Self::Reply { .. })
    }
}

/// Starts the relay.
///
/// The config is validated and every ingest transport is connected before
/// this returns, so startup failures surface here. Cancelling `shutdown` (or
/// calling [`RelayHandle::shutdown`]) stops the relay.
pub async fn launch<C: Connector>(
    config: RelayerConfig,
    connector: Arc<C>,
    collaborators: Collaborators,
    shutdown: CancellationToken,
) -> RelayerResult<RelayHandle> {
    config.validate()?;

    // Retries inside in-flight submissions only stop once the grace period
    // is over.
    let hard_stop = CancellationToken::new();
    let submitter = DualChainSubmitter::new(
        config.protocol_id.clone(),
        collaborators.utxo.clone(),
        collaborators.settlement.clone(),
        collaborators.oracle.clone(),
        collaborators.store.clone(),
    )
    .with_cancellation(hard_stop.clone());

    let mut roles = vec![IngestRole::Subscribe {
        endpoint: config.ingest.endpoint.clone(),
        topic: config.ingest.topic.clone(),
    }];
    if let Some(endpoint) = &config.ingest.reply_endpoint {
        roles.push(IngestRole::Reply {
            endpoint: endpoint.clone(),
        });
    }

    let mut channels = Vec::with_capacity(roles.len());
    for role in roles {
        let channel = IngestChannel::new(connector.clone(), shutdown.clone());
        role.connect(&channel).await?;
        channels.push((Arc::new(channel), role));
    }

    let mut tasks = JoinSet::new();
    let (blob_tx, blob_rx) = mpsc::channel(BLOB_QUEUE);
    for (channel, role) in channels {
        let span = info_span!("ingest", ?role);
        tasks.spawn(ingest_task(channel, role, blob_tx.clone(), shutdown.clone()).instrument(span));
    }
    drop(blob_tx);

    let (timer, flush_rx) = FlushTimer::new(config.flush_tick());
    tasks.spawn(timer.run(shutdown.clone()));

    if config.super_proof.enabled {
        let contract = collaborators
            .super_proof_settlement
            .clone()
            .unwrap_or_else(|| collaborators.settlement.clone());
        let job = SuperProofJob::new(
            submitter.with_settlement(contract),
            config.super_proof.hours.clone(),
            Duration::from_secs(config.super_proof.lookback_secs),
        );
        tasks.spawn(job.run(shutdown.clone()));
    }

    let (status_tx, status_rx) = watch::channel(RelayStatus::default());
    let relay = RelayLoop {
        aggregator: Aggregator::new(config.write_interval_blocks, config.write_interval(), Utc::now()),
        submitter,
        submissions: JoinSet::new(),
        in_flight: HashMap::new(),
        status: RelayStatus::default(),
        status_tx,
        grace: config.shutdown_grace(),
        hard_stop,
    };
    let main = tokio::spawn(relay.run(blob_rx, flush_rx, shutdown.clone()).instrument(info_span!("relay")));

    info!(
        protocol_id = %config.protocol_id,
        endpoint = %config.ingest.endpoint,
        count_modulus = config.write_interval_blocks,
        interval = ?config.write_interval(),
        "relay started"
    );
    Ok(RelayHandle {
        shutdown,
        status_rx,
        main,
        tasks,
    })
}

/// Receives messages from one transport and forwards their payloads.
///
/// A transport failure tears the transport down and reconnects it. If that
/// fails the whole relay is stopped.
async fn ingest_task<C: Connector>(
    channel: Arc<IngestChannel<C>>,
    role: IngestRole,
    blobs: mpsc::Sender<Vec<u8>>,
    shutdown: CancellationToken,
) {
    loop {
        let msg = match channel.recv().await {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(e) => {
                warn!(%e, "ingest transport failed, reconnecting");
                channel.reset().await;
                if let Err(e) = role.connect(&channel).await {
                    error!(%e, "ingest reconnect failed, stopping relay");
                    shutdown.cancel();
                    break;
                }
                continue;
            }
        };

        let seq = msg.sequence_number();
        let leaf = Sha256Hasher::hash_leaf(msg.payload());
        let tx = blobs.clone();
        let res = channel.process(msg, move |msg| forward(msg, tx)).await;

        if let Err(e) = &res {
            warn!(?seq, %e, "ingest message not handled");
        }
        if role.acknowledges() {
            let ack = match &res {
                Ok(()) => hex::encode(leaf).into_bytes(),
                Err(e) => error_ack(e),
            };
            if let Err(e) = channel.acknowledge(ack).await {
                warn!(%e, "failed to acknowledge ingest request");
            }
        }
    }

    channel.close().await;
    debug!("ingest task stopped");
}

async fn forward(msg: IngestMessage, blobs: mpsc::Sender<Vec<u8>>) -> anyhow::Result<()> {
    trace!(topic = %msg.topic_lossy(), len = msg.payload().len(), "ingest message");
    blobs
        .send(msg.into_payload())
        .await
        .map_err(|_| anyhow::anyhow!("relay loop is gone"))
}

type SubmissionResult = Result<SubmissionOutcome, String>;

/// Owns the aggregator and spawns submissions for closed batches.
struct RelayLoop {
    aggregator: Aggregator,
    submitter: DualChainSubmitter,
    submissions: JoinSet<SubmissionResult>,
    in_flight: HashMap<task::Id, Batch>,
    status: RelayStatus,
    status_tx: watch::Sender<RelayStatus>,
    grace: Duration,
    hard_stop: CancellationToken,
}

impl RelayLoop {
    async fn run(
        mut self,
        mut blobs: mpsc::Receiver<Vec<u8>>,
        mut flushes: mpsc::Receiver<FlushSignal>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(joined) = self.submissions.join_next_with_id() => self.finish(joined),
                blob = blobs.recv() => {
                    let Some(blob) = blob else {
                        warn!("every ingest task stopped");
                        break;
                    };
                    self.accept(&blob);
                }
                Some(FlushSignal) = flushes.recv() => {
                    if let Some(batch) = self.aggregator.check_interval(Utc::now()) {
                        self.spawn(batch);
                    }
                }
            }
            self.publish();
        }

        // Blobs already queued were acknowledged to their senders, so they go
        // out with the final batch.
        blobs.close();
        while let Ok(blob) = blobs.try_recv() {
            self.accept(&blob);
        }
        if let Some(batch) = self.aggregator.flush_remaining() {
            info!(seq = batch.seq, leaves = batch.leaves.len(), "flushing pending leaves before shutdown");
            self.spawn(batch);
        }
        self.publish();

        self.drain().await;
        self.status.dropped = self.aggregator.pending();
        if self.status.dropped > 0 {
            warn!(dropped = self.status.dropped, "leaves left unanchored at shutdown");
        }
        self.publish();
    }

    fn accept(&mut self, blob: &[u8]) {
        self.status.received += 1;
        for batch in self.aggregator.aggregate(blob, Utc::now()) {
            self.spawn(batch);
        }
    }

    fn spawn(&mut self, batch: Batch) {
        let submitter = self.submitter.clone();
        let commitment = batch.commitment();
        let span = info_span!("batch", seq = batch.seq, leaves = batch.leaves.len(), trigger = ?batch.trigger);
        self.status.batches += 1;

        let handle = self.submissions.spawn(
            async move {
                AssertUnwindSafe(submitter.submit(&commitment, RecordKind::Batch))
                    .catch_unwind()
                    .await
                    .map_err(|panic| panic_message(&*panic))
            }
            .instrument(span),
        );
        self.in_flight.insert(handle.id(), batch);
    }

    fn finish(&mut self, joined: Result<(task::Id, SubmissionResult), JoinError>) {
        let (id, res) = match joined {
            Ok(v) => v,
            Err(e) => (e.id(), Err(join_error_message(e))),
        };
        let Some(batch) = self.in_flight.remove(&id) else {
            warn!(%id, "finished submission has no batch");
            return;
        };

        match res {
            Ok(SubmissionOutcome::Complete(_)) => self.status.complete += 1,
            Ok(SubmissionOutcome::Partial { .. }) => self.status.partial += 1,
            Ok(SubmissionOutcome::Failed) => {
                self.status.failed += 1;
                self.aggregator.requeue(batch.leaves);
            }
            Err(info) => {
                error!(seq = batch.seq, %info, "submission lost, requeueing");
                self.status.failed += 1;
                self.aggregator.requeue(batch.leaves);
            }
        }
    }

    /// Waits for in-flight submissions, aborting whatever is left once the
    /// grace period runs out.
    async fn drain(&mut self) {
        if self.submissions.is_empty() {
            return;
        }
        info!(in_flight = self.submissions.len(), grace = ?self.grace, "waiting for in-flight submissions");

        let deadline = tokio::time::sleep(self.grace);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                joined = self.submissions.join_next_with_id() => match joined {
                    Some(joined) => self.finish(joined),
                    None => break,
                },
                _ = &mut deadline => {
                    warn!(remaining = self.submissions.len(), "grace period over, aborting submissions");
                    self.hard_stop.cancel();
                    self.submissions.abort_all();
                    while let Some(joined) = self.submissions.join_next_with_id().await {
                        self.finish(joined);
                    }
                    break;
                }
            }
        }
    }

    fn publish(&mut self) {
        self.status.pending = self.aggregator.pending();
        self.status.in_flight = self.submissions.len();
        self.status_tx.send_replace(self.status.clone());
    }
}
