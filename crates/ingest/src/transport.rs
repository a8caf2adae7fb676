use async_trait::async_trait;

use crate::errors::IngestResult;
use crate::message::Frames;

/// An established message transport.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Waits for the next multipart frame.
    ///
    /// Returns `Ok(None)` once the peer has gone away for good.
    async fn recv_frames(&mut self) -> IngestResult<Option<Frames>>;

    /// Sends a multipart frame. Only reply transports support this.
    async fn send_frames(&mut self, frames: Frames) -> IngestResult<()>;

    /// Whether every received frame must be answered with
    /// [`Self::send_frames`] before the next one arrives.
    fn expects_reply(&self) -> bool;
}

/// Creates transports for an [`crate::IngestChannel`].
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Transport produced by this connector.
    type Transport: Transport;

    /// Connects a subscriber to `endpoint` receiving frames whose first part
    /// starts with `topic`. An empty topic receives everything.
    async fn subscribe(&self, endpoint: &str, topic: &[u8]) -> IngestResult<Self::Transport>;

    /// Binds a reply transport on `endpoint`.
    async fn reply(&self, endpoint: &str) -> IngestResult<Self::Transport>;
}
