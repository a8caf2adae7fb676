use std::str::FromStr;

use serde::de;
use serde::{Deserialize, Serialize};

use crate::ProtocolId;

impl Serialize for ProtocolId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match (s.is_human_readable(), self.as_str()) {
            (true, Some(text)) => s.serialize_str(text),
            _ => s.serialize_bytes(self.as_bytes()),
        }
    }
}

impl<'de> Deserialize<'de> for ProtocolId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl<'de> de::Visitor<'de> for IdVisitor {
            type Value = ProtocolId;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "a short ASCII string or byte string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ProtocolId, E> {
                ProtocolId::from_str(v).map_err(E::custom)
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<ProtocolId, E> {
                ProtocolId::new(v).map_err(E::custom)
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<ProtocolId, A::Error> {
                let mut bytes = Vec::new();
                while let Some(b) = seq.next_element::<u8>()? {
                    bytes.push(b);
                }
                ProtocolId::new(bytes).map_err(de::Error::custom)
            }
        }

        if d.is_human_readable() {
            d.deserialize_any(IdVisitor)
        } else {
            d.deserialize_bytes(IdVisitor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_readable_roundtrip() {
        let id = ProtocolId::default();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"roll\"");
        let back: ProtocolId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn test_non_utf8_as_byte_array() {
        let id = ProtocolId::new(vec![0xff, 0xfe]).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "[255,254]");
        let back: ProtocolId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn test_human_readable_invalid() {
        assert!(serde_json::from_str::<ProtocolId>("\"\"").is_err());
        assert!(serde_json::from_str::<ProtocolId>("\"abcdefghijklmnopq\"").is_err());
    }
}
