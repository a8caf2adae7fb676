//! Protocol identifier and `OP_RETURN` commitment format used by the relay.
//!
//! Every payload the relay writes to L1 starts with a short configured
//! [`ProtocolId`] so readers can tell the relay's outputs apart from unrelated
//! chain data. The single-phase path carries the prefixed payload in a single
//! `OP_RETURN` push:
//!
//! ```text
//! OP_RETURN <protocol_id || payload>
//! ```

mod error;
mod op_return;
mod protocol_id;
#[cfg(feature = "serde")]
mod serde;

pub use error::{TxFmtError, TxFmtResult};
pub use op_return::{MAX_OP_RETURN_PAYLOAD, build_op_return_script, parse_op_return_payload};
pub use protocol_id::{DEFAULT_PROTOCOL_ID, InvalidProtocolId, MAX_PROTOCOL_ID_LEN, ProtocolId};
