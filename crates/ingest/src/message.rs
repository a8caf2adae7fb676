use thiserror::Error;

/// Raw multipart frames as received from a transport.
pub type Frames = Vec<Vec<u8>>;

/// Number of parts in a well-formed message.
const MESSAGE_PARTS: usize = 3;

/// Why a multipart frame was rejected.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum MalformedMessage {
    /// The frame did not have exactly three parts.
    #[error("expected 3 parts, got {0}")]
    PartCount(usize),

    /// A part was empty.
    #[error("part {0} is empty")]
    EmptyPart(usize),
}

/// A validated `[topic, payload, sequence]` message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IngestMessage {
    topic: Vec<u8>,
    payload: Vec<u8>,
    sequence: Vec<u8>,
}

impl IngestMessage {
    /// Validates raw frames into a message.
    pub fn from_frames(frames: Frames) -> Result<Self, MalformedMessage> {
        if frames.len() != MESSAGE_PARTS {
            return Err(MalformedMessage::PartCount(frames.len()));
        }
        if let Some(idx) = frames.iter().position(|p| p.is_empty()) {
            return Err(MalformedMessage::EmptyPart(idx));
        }

        let mut it = frames.into_iter();
        match (it.next(), it.next(), it.next()) {
            (Some(topic), Some(payload), Some(sequence)) => Ok(Self {
                topic,
                payload,
                sequence,
            }),
            _ => Err(MalformedMessage::PartCount(0)),
        }
    }

    /// Topic bytes.
    pub fn topic(&self) -> &[u8] {
        &self.topic
    }

    /// Topic as a string, lossily decoded.
    pub fn topic_lossy(&self) -> String {
        String::from_utf8_lossy(&self.topic).into_owned()
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Raw sequence bytes.
    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    /// Sequence number when encoded as 4 little-endian bytes, as bitcoind
    /// publishes it.
    pub fn sequence_number(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.sequence.as_slice().try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    /// Consumes the message and returns the payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(parts: &[&[u8]]) -> Frames {
        parts.iter().map(|p| p.to_vec()).collect()
    }

    #[test]
    fn accepts_three_non_empty_parts() {
        let msg = IngestMessage::from_frames(frames(&[b"rawblock", b"data", &[5, 0, 0, 0]])).unwrap();
        assert_eq!(msg.topic(), b"rawblock");
        assert_eq!(msg.payload(), b"data");
        assert_eq!(msg.sequence_number(), Some(5));
    }

    #[test]
    fn rejects_malformed() {
        let cases: Vec<(Frames, MalformedMessage)> = vec![
            (frames(&[]), MalformedMessage::PartCount(0)),
            (frames(&[b"t", b"p"]), MalformedMessage::PartCount(2)),
            (frames(&[b"t", b"p", b"s", b"x"]), MalformedMessage::PartCount(4)),
            (frames(&[b"t", b"", b"s"]), MalformedMessage::EmptyPart(1)),
            (frames(&[b"", b"p", b"s"]), MalformedMessage::EmptyPart(0)),
        ];

        for (input, expected) in cases {
            assert_eq!(IngestMessage::from_frames(input), Err(expected));
        }
    }

    #[test]
    fn non_le_u32_sequence() {
        let msg = IngestMessage::from_frames(frames(&[b"t", b"p", b"seq-7"])).unwrap();
        assert_eq!(msg.sequence_number(), None);
        assert_eq!(msg.sequence(), b"seq-7");
    }
}
