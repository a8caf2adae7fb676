mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use darelay_ingest::{ChannelConnector, Frames};
use darelay_merkle::{MerkleCommitment, MerkleHasher, Sha256Hasher};
use darelay_relayer::{ConfigError, RelayHandle, RelayStatus, RelayerConfig, RelayerError, launch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use common::Harness;

const ENDPOINT: &str = "inproc://blocks";
const REQUESTS: &str = "inproc://requests";

fn config() -> RelayerConfig {
    let mut config = RelayerConfig::default();
    config.ingest.endpoint = ENDPOINT.to_owned();
    config.write_interval_blocks = 2;
    config.super_proof.enabled = false;
    config
}

fn frames(payload: &[u8], seq: u32) -> Frames {
    vec![b"rawblock".to_vec(), payload.to_vec(), seq.to_le_bytes().to_vec()]
}

async fn wait_for(handle: &RelayHandle, f: impl FnMut(&RelayStatus) -> bool) -> RelayStatus {
    let mut rx = handle.subscribe_status();
    let status = timeout(Duration::from_secs(5), rx.wait_for(f))
        .await
        .expect("status not reached in time")
        .expect("relay stopped");
    status.clone()
}

#[tokio::test]
async fn relays_blobs_to_both_chains() {
    let h = Harness::new();
    let connector = Arc::new(ChannelConnector::new());
    let handle = launch(config(), connector.clone(), h.collaborators(), CancellationToken::new())
        .await
        .unwrap();

    let publisher = connector.publisher(ENDPOINT);
    assert_eq!(publisher.publish(frames(b"one", 0)), 1);
    publisher.publish(frames(b"two", 1));

    let status = wait_for(&handle, |s| s.complete == 1).await;
    assert_eq!(status.received, 2);
    assert_eq!(status.batches, 1);
    assert_eq!(status.pending, 0);

    let expected = MerkleCommitment::from_blobs([b"one", b"two"]);
    assert_eq!(h.settlement.stored(), vec![(*expected.root(), expected.leaves().to_vec())]);
    let payloads = h.anchor.payloads();
    assert_eq!(&payloads[0][4..], expected.root());

    let records = h.store.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].success);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn malformed_and_foreign_messages_are_skipped() {
    let h = Harness::new();
    let connector = Arc::new(ChannelConnector::new());
    let handle = launch(config(), connector.clone(), h.collaborators(), CancellationToken::new())
        .await
        .unwrap();

    let publisher = connector.publisher(ENDPOINT);
    publisher.publish(vec![b"rawblock".to_vec(), b"no sequence".to_vec()]);
    publisher.publish(vec![b"hashblock".to_vec(), b"other".to_vec(), vec![0; 4]]);
    publisher.publish(frames(b"one", 0));
    publisher.publish(frames(b"two", 1));

    let status = wait_for(&handle, |s| s.complete == 1).await;
    assert_eq!(status.received, 2);
    assert_eq!(h.settlement.stored()[0].1.len(), 2);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_batch_is_requeued() {
    let h = Harness::new();
    h.anchor.reject.store(1, Ordering::SeqCst);
    h.settlement.reject.store(1, Ordering::SeqCst);

    let connector = Arc::new(ChannelConnector::new());
    let handle = launch(config(), connector.clone(), h.collaborators(), CancellationToken::new())
        .await
        .unwrap();

    let publisher = connector.publisher(ENDPOINT);
    publisher.publish(frames(b"a", 0));
    publisher.publish(frames(b"b", 1));
    let status = wait_for(&handle, |s| s.failed == 1 && s.in_flight == 0).await;
    assert_eq!(status.pending, 2);
    assert!(h.store.is_empty());

    publisher.publish(frames(b"c", 2));
    publisher.publish(frames(b"d", 3));
    wait_for(&handle, |s| s.complete == 1).await;

    let expected = MerkleCommitment::from_blobs([b"a", b"b", b"c", b"d"]);
    assert_eq!(h.settlement.stored(), vec![(*expected.root(), expected.leaves().to_vec())]);
    assert_eq!(h.store.len(), 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn reply_endpoint_acknowledges_with_leaf_hash() {
    let h = Harness::new();
    let mut config = config();
    config.ingest.reply_endpoint = Some(REQUESTS.to_owned());

    let connector = Arc::new(ChannelConnector::new());
    let handle = launch(config, connector.clone(), h.collaborators(), CancellationToken::new())
        .await
        .unwrap();

    let requester = connector.requester(REQUESTS).unwrap();
    let ack = requester.request(frames(b"blob", 0)).await.unwrap();
    assert_eq!(ack, vec![hex::encode(Sha256Hasher::hash_leaf(b"blob")).into_bytes()]);

    wait_for(&handle, |s| s.received == 1).await;
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn cancelling_the_token_stops_the_relay() {
    let h = Harness::new();
    let connector = Arc::new(ChannelConnector::new());
    let token = CancellationToken::new();
    let handle = launch(config(), connector.clone(), h.collaborators(), token.clone())
        .await
        .unwrap();

    connector.publisher(ENDPOINT).publish(frames(b"only", 0));
    wait_for(&handle, |s| s.received == 1).await;

    let status_rx = handle.subscribe_status();
    token.cancel();
    timeout(Duration::from_secs(5), handle.shutdown()).await.unwrap().unwrap();

    // Below the count modulus, so the leaf went out with the shutdown flush.
    let status = status_rx.borrow().clone();
    assert_eq!(status.batches, 1);
    assert_eq!(status.dropped, 0);
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn pending_leaves_are_flushed_on_shutdown() {
    let h = Harness::new();
    let mut config = config();
    config.write_interval_blocks = 10;

    let connector = Arc::new(ChannelConnector::new());
    let handle = launch(config, connector.clone(), h.collaborators(), CancellationToken::new())
        .await
        .unwrap();

    let publisher = connector.publisher(ENDPOINT);
    for (seq, blob) in [b"a", b"b", b"c"].into_iter().enumerate() {
        publisher.publish(frames(blob, seq as u32));
    }
    wait_for(&handle, |s| s.received == 3).await;
    assert!(h.settlement.stored().is_empty());

    let status_rx = handle.subscribe_status();
    handle.shutdown().await.unwrap();

    let expected = MerkleCommitment::from_blobs([b"a", b"b", b"c"]);
    assert_eq!(h.settlement.stored(), vec![(*expected.root(), expected.leaves().to_vec())]);
    let status = status_rx.borrow().clone();
    assert_eq!(status.complete, 1);
    assert_eq!(status.pending, 0);
    assert_eq!(status.dropped, 0);
}

#[tokio::test]
async fn aborted_submission_is_reported_as_dropped() {
    let h = Harness::new();
    h.anchor.stall.store(true, Ordering::SeqCst);
    let mut config = config();
    config.shutdown_grace_secs = 1;

    let connector = Arc::new(ChannelConnector::new());
    let handle = launch(config, connector.clone(), h.collaborators(), CancellationToken::new())
        .await
        .unwrap();

    let publisher = connector.publisher(ENDPOINT);
    publisher.publish(frames(b"a", 0));
    publisher.publish(frames(b"b", 1));
    wait_for(&handle, |s| s.in_flight == 1).await;

    let status_rx = handle.subscribe_status();
    timeout(Duration::from_secs(5), handle.shutdown()).await.unwrap().unwrap();

    // The aborted batch went back to the aggregator and is accounted for.
    let status = status_rx.borrow().clone();
    assert_eq!(status.failed, 1);
    assert_eq!(status.in_flight, 0);
    assert_eq!(status.dropped, 2);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn invalid_config_fails_launch() {
    let h = Harness::new();
    let mut config = config();
    config.write_interval_blocks = 0;

    let err = launch(config, Arc::new(ChannelConnector::new()), h.collaborators(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RelayerError::Config(ConfigError::Zero("write_interval_blocks"))));
}
