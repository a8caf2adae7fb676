//! In-process transports over tokio channels.
//!
//! Publishers and subscribers meet on a named endpoint backed by a broadcast
//! channel. Reply endpoints are bound by [`Connector::reply`] and reached
//! through a [`ChannelRequester`], which waits for the one-part
//! acknowledgement of each request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::*;

use crate::errors::{IngestError, IngestResult};
use crate::message::Frames;
use crate::transport::{Connector, Transport};

const BROADCAST_CAPACITY: usize = 1024;
const REQUEST_CAPACITY: usize = 64;

#[derive(Debug)]
struct Request {
    frames: Frames,
    reply: oneshot::Sender<Frames>,
}

#[derive(Debug, Default)]
struct Registry {
    topics: HashMap<String, broadcast::Sender<Frames>>,
    replies: HashMap<String, mpsc::Sender<Request>>,
}

/// Connector for in-process endpoints.
#[derive(Clone, Debug, Default)]
pub struct ChannelConnector {
    registry: Arc<Mutex<Registry>>,
}

impl ChannelConnector {
    /// Creates a connector with no endpoints.
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn topic_sender(&self, endpoint: &str) -> broadcast::Sender<Frames> {
        self.registry()
            .topics
            .entry(endpoint.to_owned())
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .clone()
    }

    /// Returns a publisher for `endpoint`, creating the endpoint if needed.
    pub fn publisher(&self, endpoint: &str) -> ChannelPublisher {
        ChannelPublisher {
            tx: self.topic_sender(endpoint),
        }
    }

    /// Returns a requester for a reply endpoint bound earlier with
    /// [`Connector::reply`].
    pub fn requester(&self, endpoint: &str) -> IngestResult<ChannelRequester> {
        let tx = self
            .registry()
            .replies
            .get(endpoint)
            .cloned()
            .ok_or_else(|| IngestError::connect(endpoint, "no reply endpoint bound"))?;
        Ok(ChannelRequester { tx })
    }
}

/// Publishing half of an in-process pub/sub endpoint.
#[derive(Clone, Debug)]
pub struct ChannelPublisher {
    tx: broadcast::Sender<Frames>,
}

impl ChannelPublisher {
    /// Publishes a frame to every current subscriber, returning how many
    /// received it.
    pub fn publish(&self, frames: Frames) -> usize {
        self.tx.send(frames).unwrap_or(0)
    }
}

/// Requesting half of an in-process reply endpoint.
#[derive(Clone, Debug)]
pub struct ChannelRequester {
    tx: mpsc::Sender<Request>,
}

impl ChannelRequester {
    /// Sends a request and waits for its acknowledgement.
    pub async fn request(&self, frames: Frames) -> IngestResult<Frames> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request { frames, reply })
            .await
            .map_err(|_| IngestError::Transport("reply endpoint gone".to_owned()))?;
        rx.await
            .map_err(|_| IngestError::Transport("request dropped without reply".to_owned()))
    }
}

/// Transport produced by [`ChannelConnector`].
#[derive(Debug)]
pub struct ChannelTransport {
    kind: TransportKind,
}

#[derive(Debug)]
enum TransportKind {
    Sub {
        rx: broadcast::Receiver<Frames>,
        topic: Vec<u8>,
    },
    Rep {
        rx: mpsc::Receiver<Request>,
        pending: Option<oneshot::Sender<Frames>>,
    },
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn recv_frames(&mut self) -> IngestResult<Option<Frames>> {
        match &mut self.kind {
            TransportKind::Sub { rx, topic } => loop {
                match rx.recv().await {
                    Ok(frames) => {
                        let matches = topic.is_empty()
                            || frames
                                .first()
                                .is_some_and(|t| t.starts_with(topic.as_slice()));
                        if matches {
                            return Ok(Some(frames));
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%skipped, "subscriber lagged, frames dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(None),
                }
            },
            TransportKind::Rep { rx, pending } => match rx.recv().await {
                Some(req) => {
                    *pending = Some(req.reply);
                    Ok(Some(req.frames))
                }
                None => Ok(None),
            },
        }
    }

    async fn send_frames(&mut self, frames: Frames) -> IngestResult<()> {
        match &mut self.kind {
            TransportKind::Sub { .. } => Err(IngestError::Unsupported("send on subscriber")),
            TransportKind::Rep { pending, .. } => {
                let reply = pending.take().ok_or(IngestError::NoPendingRequest)?;
                reply
                    .send(frames)
                    .map_err(|_| IngestError::Transport("requester went away".to_owned()))
            }
        }
    }

    fn expects_reply(&self) -> bool {
        matches!(self.kind, TransportKind::Rep { .. })
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    type Transport = ChannelTransport;

    async fn subscribe(&self, endpoint: &str, topic: &[u8]) -> IngestResult<ChannelTransport> {
        Ok(ChannelTransport {
            kind: TransportKind::Sub {
                rx: self.topic_sender(endpoint).subscribe(),
                topic: topic.to_vec(),
            },
        })
    }

    async fn reply(&self, endpoint: &str) -> IngestResult<ChannelTransport> {
        let mut registry = self.registry();
        if registry.replies.get(endpoint).is_some_and(|tx| !tx.is_closed()) {
            return Err(IngestError::connect(endpoint, "address already in use"));
        }
        let (tx, rx) = mpsc::channel(REQUEST_CAPACITY);
        registry.replies.insert(endpoint.to_owned(), tx);
        Ok(ChannelTransport {
            kind: TransportKind::Rep { rx, pending: None },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_filters_by_topic() {
        let conn = ChannelConnector::new();
        let mut sub = conn.subscribe("inproc://blocks", b"raw").await.unwrap();
        let publisher = conn.publisher("inproc://blocks");

        publisher.publish(vec![b"hashblock".to_vec(), b"x".to_vec(), b"1".to_vec()]);
        publisher.publish(vec![b"rawblock".to_vec(), b"y".to_vec(), b"2".to_vec()]);

        let frames = sub.recv_frames().await.unwrap().unwrap();
        assert_eq!(frames[0], b"rawblock");
        assert!(sub.send_frames(vec![]).await.is_err());
    }

    #[tokio::test]
    async fn reply_round_trip() {
        let conn = ChannelConnector::new();
        let mut rep = conn.reply("inproc://rep").await.unwrap();
        assert!(conn.reply("inproc://rep").await.is_err());

        let requester = conn.requester("inproc://rep").unwrap();
        let req = tokio::spawn(async move { requester.request(vec![b"ping".to_vec()]).await });

        let frames = rep.recv_frames().await.unwrap().unwrap();
        assert_eq!(frames, vec![b"ping".to_vec()]);
        rep.send_frames(vec![b"ack".to_vec()]).await.unwrap();
        assert!(matches!(
            rep.send_frames(vec![b"ack".to_vec()]).await,
            Err(IngestError::NoPendingRequest)
        ));

        assert_eq!(req.await.unwrap().unwrap(), vec![b"ack".to_vec()]);
    }

    #[tokio::test]
    async fn requester_needs_bound_endpoint() {
        let conn = ChannelConnector::new();
        assert!(conn.requester("inproc://nowhere").is_err());
    }
}
