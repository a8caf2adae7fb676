use bitcoin::{
    ScriptBuf,
    blockdata::script,
    constants::MAX_SCRIPT_ELEMENT_SIZE,
    opcodes::{
        OP_FALSE,
        all::{OP_CHECKSIG, OP_ENDIF, OP_IF},
    },
    script::PushBytesBuf,
};

use crate::{MAX_ENVELOPE_PAYLOAD, errors::EnvelopeBuildError};

/// Builds the envelope leaf script for `payload`, locked to `pubkey`.
///
/// Creates a script with the structure
/// `OP_FALSE OP_IF <payload_chunks> OP_ENDIF <pubkey> OP_CHECKSIG`. The payload
/// is split in order into chunks of up to [`MAX_SCRIPT_ELEMENT_SIZE`] bytes,
/// without padding. For taproot spends `pubkey` is the 32-byte x-only key.
///
/// # Errors
///
/// Returns [`EnvelopeBuildError::PayloadTooLarge`] if the payload is longer than
/// [`MAX_ENVELOPE_PAYLOAD`], or a conversion error if a chunk or the pubkey
/// cannot be pushed.
pub fn build_envelope_script(payload: &[u8], pubkey: &[u8]) -> Result<ScriptBuf, EnvelopeBuildError> {
    if payload.len() > MAX_ENVELOPE_PAYLOAD {
        return Err(EnvelopeBuildError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_ENVELOPE_PAYLOAD,
        });
    }

    let pubkey_bytes = PushBytesBuf::try_from(pubkey.to_vec())
        .map_err(|_| EnvelopeBuildError::PubkeyConversion)?;

    let builder = push_envelope(script::Builder::new(), payload)?;
    Ok(builder
        .push_slice(pubkey_bytes)
        .push_opcode(OP_CHECKSIG)
        .into_script())
}

/// Extends `builder` with `OP_FALSE OP_IF <payload_chunks> OP_ENDIF`.
fn push_envelope(
    mut builder: script::Builder,
    payload: &[u8],
) -> Result<script::Builder, EnvelopeBuildError> {
    builder = builder.push_opcode(OP_FALSE).push_opcode(OP_IF);

    for chunk in payload.chunks(MAX_SCRIPT_ELEMENT_SIZE) {
        let push_bytes = PushBytesBuf::try_from(chunk.to_vec()).map_err(|_| {
            EnvelopeBuildError::PayloadChunkConversion {
                chunk_size: chunk.len(),
            }
        })?;
        builder = builder.push_slice(push_bytes);
    }

    Ok(builder.push_opcode(OP_ENDIF))
}
