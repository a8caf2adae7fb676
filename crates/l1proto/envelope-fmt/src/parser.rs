use std::iter::Peekable;

use bitcoin::{
    Opcode, Script,
    opcodes::all::{OP_CHECKSIG, OP_ENDIF, OP_IF},
    script::{Instruction, Instructions},
};

use crate::MAX_ENVELOPE_CHUNKS;

/// One positional step of the envelope template.
#[derive(Clone, Copy, Debug)]
enum Step {
    /// `OP_FALSE`, which the instruction iterator reports as an empty push.
    False,

    /// A specific opcode.
    Op(Opcode),

    /// Between `min` and `max` data pushes, concatenated into one capture.
    Pushes { min: usize, max: usize },
}

const ENVELOPE_TEMPLATE: [Step; 6] = [
    Step::False,
    Step::Op(OP_IF),
    Step::Pushes {
        min: 0,
        max: MAX_ENVELOPE_CHUNKS,
    },
    Step::Op(OP_ENDIF),
    Step::Pushes { min: 1, max: 1 },
    Step::Op(OP_CHECKSIG),
];

/// Payload and key recovered from an envelope script.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Envelope {
    /// Concatenated bytes of the `OP_IF` branch.
    pub payload: Vec<u8>,

    /// Key pushed before `OP_CHECKSIG`.
    pub pubkey: Vec<u8>,
}

/// Parses a full envelope leaf script.
///
/// Returns `None` when the script does not follow the envelope template
/// exactly, including when extra instructions trail the final `OP_CHECKSIG`.
pub fn parse_envelope(script: &Script) -> Option<Envelope> {
    let mut instructions = script.instructions().peekable();
    let mut captures = Vec::with_capacity(2);

    for step in ENVELOPE_TEMPLATE {
        match step {
            Step::False => match instructions.next()? {
                Ok(Instruction::PushBytes(bytes)) if bytes.is_empty() => {}
                _ => return None,
            },
            Step::Op(expected) => match instructions.next()? {
                Ok(Instruction::Op(op)) if op == expected => {}
                _ => return None,
            },
            Step::Pushes { min, max } => {
                let (data, count) = take_pushes(&mut instructions, max);
                if count < min {
                    return None;
                }
                captures.push(data);
            }
        }
    }

    if instructions.next().is_some() {
        return None;
    }

    let [payload, pubkey]: [Vec<u8>; 2] = captures.try_into().ok()?;
    Some(Envelope { payload, pubkey })
}

/// Parses an envelope leaf script and returns only the raw payload.
///
/// The payload is returned as-is. Checking for a protocol prefix is left to
/// the caller.
pub fn parse_envelope_payload(script: &Script) -> Option<Vec<u8>> {
    parse_envelope(script).map(|env| env.payload)
}

/// Greedily consumes up to `max` consecutive pushes.
fn take_pushes(instructions: &mut Peekable<Instructions<'_>>, max: usize) -> (Vec<u8>, usize) {
    let mut data = Vec::new();
    let mut count = 0;
    while count < max {
        let Some(Ok(Instruction::PushBytes(bytes))) = instructions.peek() else {
            break;
        };
        data.extend_from_slice(bytes.as_bytes());
        instructions.next();
        count += 1;
    }
    (data, count)
}
