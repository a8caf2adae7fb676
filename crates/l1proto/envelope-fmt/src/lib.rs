//! Tapscript envelope format used by the relay to carry payloads on L1.
//!
//! An envelope is a taproot leaf script that wraps a payload inside an
//! unexecuted branch and then commits to a signing key:
//!
//! ```text
//! OP_FALSE
//! OP_IF
//!   <chunk_0>
//!   ...
//!   <chunk_n>
//! OP_ENDIF
//! <pubkey>
//! OP_CHECKSIG
//! ```
//!
//! Chunks are at most 520 bytes each and at most 10 of them are accepted when
//! parsing, which caps a single envelope at [`MAX_ENVELOPE_PAYLOAD`] bytes.
//!
//! Parsing is positional and strict: any script that deviates from the template
//! above yields `None`. Most scripts seen on chain are not envelopes, so a
//! mismatch is not an error.
//!
//! # Examples
//!
//! ```
//! use darelay_l1_envelope_fmt::{builder::build_envelope_script, parser::parse_envelope_payload};
//!
//! let pubkey = [0x02; 32];
//! let script = build_envelope_script(b"rollhello", &pubkey).unwrap();
//! assert_eq!(parse_envelope_payload(&script).as_deref(), Some(&b"rollhello"[..]));
//! ```

use bitcoin::constants::MAX_SCRIPT_ELEMENT_SIZE;

/// Tapscript envelope builder utilities.
pub mod builder;

/// Error types for envelope operations.
pub mod errors;

/// Positional envelope parser.
pub mod parser;

/// Maximum number of payload pushes accepted inside the `OP_IF` branch.
pub const MAX_ENVELOPE_CHUNKS: usize = 10;

/// Largest payload that can round-trip through an envelope.
pub const MAX_ENVELOPE_PAYLOAD: usize = MAX_ENVELOPE_CHUNKS * MAX_SCRIPT_ELEMENT_SIZE;
