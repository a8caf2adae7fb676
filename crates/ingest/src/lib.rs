//! Framed message intake for the relay.
//!
//! An [`IngestChannel`] owns one transport obtained from a [`Connector`]. It
//! validates incoming `[topic, payload, sequence]` frames and runs handlers
//! with a timeout and panic containment, so a bad message or a misbehaving
//! handler never takes the intake loop down.
//!
//! Two connectors are provided: [`ChannelConnector`], an in-process transport
//! over tokio channels, and (with the `zmq` feature) a ZeroMQ connector.

mod channel;
mod errors;
mod local;
mod message;
mod panic;
mod transport;
#[cfg(feature = "zmq")]
mod zmq;

pub use channel::{DEFAULT_HANDLER_TIMEOUT, ERROR_ACK_PREFIX, IngestChannel, error_ack, validate};
pub use errors::{IngestError, IngestResult, ProcessError};
pub use local::{ChannelConnector, ChannelPublisher, ChannelRequester, ChannelTransport};
pub use message::{Frames, IngestMessage, MalformedMessage};
pub use panic::panic_message;
pub use transport::{Connector, Transport};
#[cfg(feature = "zmq")]
pub use zmq::{ZmqConnector, ZmqTransport};
