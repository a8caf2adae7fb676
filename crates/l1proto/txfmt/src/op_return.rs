//! Single-push `OP_RETURN` commitments.

use bitcoin::{
    Script, ScriptBuf, opcodes::all::OP_RETURN, script::Instruction, script::PushBytesBuf,
};

use crate::error::{TxFmtError, TxFmtResult};

/// Largest payload relayed by default `OP_RETURN` standardness policy.
pub const MAX_OP_RETURN_PAYLOAD: usize = 80;

/// Builds `OP_RETURN <payload>` with the payload in a single push.
///
/// # Errors
///
/// Returns [`TxFmtError::BytesLimitExceed`] if the payload is larger than
/// [`MAX_OP_RETURN_PAYLOAD`].
pub fn build_op_return_script(payload: &[u8]) -> TxFmtResult<ScriptBuf> {
    if payload.len() > MAX_OP_RETURN_PAYLOAD {
        return Err(TxFmtError::BytesLimitExceed(MAX_OP_RETURN_PAYLOAD));
    }

    let pushbytes = PushBytesBuf::try_from(payload.to_vec())?;
    Ok(ScriptBuf::builder()
        .push_opcode(OP_RETURN)
        .push_slice(pushbytes)
        .into_script())
}

/// Extracts the single operand following `OP_RETURN`.
///
/// Returns `None` for any other script shape, including an `OP_RETURN` with no
/// operand or with more than one.
pub fn parse_op_return_payload(script: &Script) -> Option<&[u8]> {
    let mut instrs = script.instructions();
    match instrs.next() {
        Some(Ok(Instruction::Op(op))) if op == OP_RETURN => {}
        _ => return None,
    }

    let data = match instrs.next() {
        Some(Ok(Instruction::PushBytes(d))) => d,
        _ => return None,
    };

    if instrs.next().is_some() {
        return None;
    }

    Some(data.as_bytes())
}
