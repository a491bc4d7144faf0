//! The slave-to-master handshake frame.

use serde::{Deserialize, Serialize};

use super::record::WireError;

/// First frame a slave sends after connecting:
/// `{"type":"handshake","slaveId":"<id>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeFrame {
    /// Frame discriminator; always `"handshake"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The connecting slave's assigned identifier.
    pub slave_id: String,
}

impl HandshakeFrame {
    /// Frame discriminator value.
    pub const KIND: &'static str = "handshake";

    /// Builds a handshake frame for the given slave id.
    pub fn new(slave_id: impl Into<String>) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            slave_id: slave_id.into(),
        }
    }

    /// Encodes the frame as a single JSON line (without the terminator).
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Encode`] if JSON serialization fails.
    pub fn encode_line(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Encode)
    }

    /// Decodes and validates one received line.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Decode`] on malformed JSON and
    /// [`WireError::UnexpectedFrame`] when the discriminator is not
    /// `"handshake"`.
    pub fn decode_line(line: &str) -> Result<Self, WireError> {
        let frame: Self = serde_json::from_str(line).map_err(WireError::Decode)?;
        if frame.kind != Self::KIND {
            return Err(WireError::UnexpectedFrame { kind: frame.kind });
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_exact_wire_shape() {
        let frame = HandshakeFrame::new("slave-7");
        assert_eq!(
            frame.encode_line().unwrap(),
            r#"{"type":"handshake","slaveId":"slave-7"}"#
        );
    }

    #[test]
    fn decode_round_trip() {
        let line = r#"{"type":"handshake","slaveId":"s-1"}"#;
        let frame = HandshakeFrame::decode_line(line).unwrap();
        assert_eq!(frame.slave_id, "s-1");
    }

    #[test]
    fn rejects_wrong_discriminator() {
        let line = r#"{"type":"hello","slaveId":"s-1"}"#;
        let err = HandshakeFrame::decode_line(line).unwrap_err();
        assert!(matches!(err, WireError::UnexpectedFrame { kind } if kind == "hello"));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            HandshakeFrame::decode_line("not json"),
            Err(WireError::Decode(_))
        ));
    }
}
