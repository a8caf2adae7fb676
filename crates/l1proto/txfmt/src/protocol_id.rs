use std::fmt;
use std::str;

/// Longest accepted protocol identifier, in bytes.
pub const MAX_PROTOCOL_ID_LEN: usize = 16;

/// Identifier used when none is configured.
pub const DEFAULT_PROTOCOL_ID: &[u8] = b"roll";

/// Short byte prefix marking payloads written by this relay.
///
/// Any non-empty byte string up to [`MAX_PROTOCOL_ID_LEN`] bytes is accepted
/// programmatically. The string form used in config files must be ASCII.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProtocolId(Vec<u8>);

impl ProtocolId {
    /// Creates a new identifier from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, InvalidProtocolId> {
        let bytes = bytes.into();
        match bytes.len() {
            0 => Err(InvalidProtocolId::Empty),
            n if n > MAX_PROTOCOL_ID_LEN => Err(InvalidProtocolId::TooLong(n)),
            _ => Ok(Self(bytes)),
        }
    }

    /// Returns the identifier bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the identifier as a string slice if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        str::from_utf8(&self.0).ok()
    }

    /// Returns `payload` prefixed with this identifier.
    pub fn prefixed(&self, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.0.len() + payload.len());
        buf.extend_from_slice(&self.0);
        buf.extend_from_slice(payload);
        buf
    }

    /// Returns the bytes after the identifier, or `None` if `data` does not
    /// start with it.
    pub fn strip_from<'d>(&self, data: &'d [u8]) -> Option<&'d [u8]> {
        data.strip_prefix(self.0.as_slice())
    }
}

impl Default for ProtocolId {
    fn default() -> Self {
        Self(DEFAULT_PROTOCOL_ID.to_vec())
    }
}

impl AsRef<[u8]> for ProtocolId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(s) => write!(f, "{s}"),
            None => write!(f, "{:?}", self.0),
        }
    }
}

impl str::FromStr for ProtocolId {
    type Err = InvalidProtocolId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.is_ascii() {
            return Err(InvalidProtocolId::NotAscii);
        }
        Self::new(s.as_bytes())
    }
}

/// Error type for invalid protocol identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidProtocolId {
    /// The identifier has no bytes.
    Empty,
    /// The identifier is longer than [`MAX_PROTOCOL_ID_LEN`].
    TooLong(usize),
    /// The input string contains non-ASCII characters.
    NotAscii,
}

impl fmt::Display for InvalidProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "protocol id must not be empty"),
            Self::TooLong(len) => write!(
                f,
                "protocol id is {len} bytes, at most {MAX_PROTOCOL_ID_LEN} allowed"
            ),
            Self::NotAscii => write!(f, "protocol id must be ASCII"),
        }
    }
}

impl std::error::Error for InvalidProtocolId {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str() {
        let id: ProtocolId = "roll".parse().unwrap();
        assert_eq!(id.as_bytes(), b"roll");
        assert_eq!(id, ProtocolId::default());
    }

    #[test]
    fn test_from_str_invalid() {
        assert_eq!("".parse::<ProtocolId>(), Err(InvalidProtocolId::Empty));
        assert_eq!(
            "a".repeat(17).parse::<ProtocolId>(),
            Err(InvalidProtocolId::TooLong(17))
        );
        assert_eq!("rol\u{e9}".parse::<ProtocolId>(), Err(InvalidProtocolId::NotAscii));
    }

    #[test]
    fn test_prefix_and_strip() {
        let id = ProtocolId::new(*b"roll").unwrap();
        let data = id.prefixed(b"hello");
        assert_eq!(data, b"rollhello");
        assert_eq!(id.strip_from(&data), Some(&b"hello"[..]));
        assert_eq!(id.strip_from(b"rolxhello"), None);
        assert_eq!(id.strip_from(b"ro"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(ProtocolId::default().to_string(), "roll");
        let raw = ProtocolId::new(vec![0xff, 0x00]).unwrap();
        assert_eq!(raw.to_string(), "[255, 0]");
    }
}
