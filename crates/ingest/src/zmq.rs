//! ZeroMQ transports, as published by bitcoind's `-zmqpub*` options.

use async_trait::async_trait;
use tracing::*;
use zeromq::{RepSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

use crate::errors::{IngestError, IngestResult};
use crate::message::Frames;
use crate::transport::{Connector, Transport};

/// Connector creating ZeroMQ SUB and REP sockets.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZmqConnector;

impl ZmqConnector {
    /// Creates the connector.
    pub fn new() -> Self {
        Self
    }
}

/// Transport produced by [`ZmqConnector`].
pub struct ZmqTransport {
    socket: ZmqSocket,
}

enum ZmqSocket {
    Sub(SubSocket),
    Rep(RepSocket),
}

impl std::fmt::Debug for ZmqTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.socket {
            ZmqSocket::Sub(_) => "sub",
            ZmqSocket::Rep(_) => "rep",
        };
        f.debug_struct("ZmqTransport").field("kind", &kind).finish()
    }
}

fn into_frames(msg: ZmqMessage) -> Frames {
    msg.into_vec().into_iter().map(|part| part.to_vec()).collect()
}

fn into_message(frames: Frames) -> IngestResult<ZmqMessage> {
    let mut parts = frames.into_iter();
    let first = parts
        .next()
        .ok_or_else(|| IngestError::Transport("cannot send an empty message".to_owned()))?;
    let mut msg = ZmqMessage::from(first);
    for part in parts {
        msg.push_back(part.into());
    }
    Ok(msg)
}

fn transport_err(e: zeromq::ZmqError) -> IngestError {
    IngestError::Transport(e.to_string())
}

#[async_trait]
impl Transport for ZmqTransport {
    async fn recv_frames(&mut self) -> IngestResult<Option<Frames>> {
        let res = match &mut self.socket {
            ZmqSocket::Sub(sock) => sock.recv().await,
            ZmqSocket::Rep(sock) => sock.recv().await,
        };
        match res {
            Ok(msg) => Ok(Some(into_frames(msg))),
            Err(zeromq::ZmqError::NoMessage) => {
                debug!("zmq socket has no more peers");
                Ok(None)
            }
            Err(e) => Err(transport_err(e)),
        }
    }

    async fn send_frames(&mut self, frames: Frames) -> IngestResult<()> {
        match &mut self.socket {
            ZmqSocket::Sub(_) => Err(IngestError::Unsupported("send on subscriber")),
            ZmqSocket::Rep(sock) => sock.send(into_message(frames)?).await.map_err(transport_err),
        }
    }

    fn expects_reply(&self) -> bool {
        matches!(self.socket, ZmqSocket::Rep(_))
    }
}

#[async_trait]
impl Connector for ZmqConnector {
    type Transport = ZmqTransport;

    async fn subscribe(&self, endpoint: &str, topic: &[u8]) -> IngestResult<ZmqTransport> {
        let topic = std::str::from_utf8(topic)
            .map_err(|_| IngestError::connect(endpoint, "topic is not valid utf-8"))?;

        let mut sock = SubSocket::new();
        sock.connect(endpoint)
            .await
            .map_err(|e| IngestError::connect(endpoint, e))?;
        sock.subscribe(topic)
            .await
            .map_err(|e| IngestError::connect(endpoint, e))?;

        debug!(%endpoint, %topic, "zmq subscriber connected");
        Ok(ZmqTransport {
            socket: ZmqSocket::Sub(sock),
        })
    }

    async fn reply(&self, endpoint: &str) -> IngestResult<ZmqTransport> {
        let mut sock = RepSocket::new();
        let bound = sock
            .bind(endpoint)
            .await
            .map_err(|e| IngestError::connect(endpoint, e))?;

        debug!(%endpoint, %bound, "zmq reply socket bound");
        Ok(ZmqTransport {
            socket: ZmqSocket::Rep(sock),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_convert_both_ways() {
        let frames = vec![b"rawblock".to_vec(), vec![1, 2, 3], vec![0, 0, 0, 0]];
        let msg = into_message(frames.clone()).unwrap();
        assert_eq!(into_frames(msg), frames);
    }

    #[test]
    fn empty_send_rejected() {
        assert!(into_message(Vec::new()).is_err());
    }
}
