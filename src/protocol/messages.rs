// ABOUTME: Signalling message type definitions and serialization
// ABOUTME: Speaking state, media sink preference and negotiated connection data

use crate::protocol::encryption::SECRET_KEY_LEN;
use serde::{Deserialize, Serialize};

/// Messages a session sends to the remote peer over the signalling channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SignalMessage {
    /// Speaking state change
    #[serde(rename = "voice/speaking")]
    Speaking(Speaking),

    /// Preferred media the peer should route to this sink
    #[serde(rename = "voice/media_sink_wants")]
    MediaSinkWants(MediaSinkWants),
}

/// Speaking state payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Speaking {
    /// Whether audio is currently being sent
    pub speaking: bool,
    /// Source the state applies to
    pub ssrc: u32,
    /// Reported delay, always zero for sends
    pub delay: u32,
}

/// Media sink preference payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSinkWants {
    /// Share of streams the sink wants (0-100)
    pub any: u8,
}

impl SignalMessage {
    /// Speaking message for the given source
    pub fn speaking(speaking: bool, ssrc: u32) -> Self {
        SignalMessage::Speaking(Speaking {
            speaking,
            ssrc,
            delay: 0,
        })
    }

    /// Announce that this sink wants all media
    pub fn media_sink_wants_all() -> Self {
        SignalMessage::MediaSinkWants(MediaSinkWants { any: 100 })
    }

    /// Serialize to the JSON wire form
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Parameters negotiated by the signalling handshake
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionData {
    /// Negotiated encryption mode string
    pub mode: String,
    /// Session secret key
    pub secret_key: [u8; SECRET_KEY_LEN],
    /// Synchronization source assigned to this sender
    pub ssrc: u32,
    /// Starting sequence number
    #[serde(default)]
    pub sequence: u16,
    /// Starting timestamp
    #[serde(default)]
    pub timestamp: u32,
    /// Starting lite-mode nonce
    #[serde(default)]
    pub nonce: u32,
}

impl ConnectionData {
    /// Create connection data with counters starting at zero
    pub fn new(mode: impl Into<String>, secret_key: [u8; SECRET_KEY_LEN], ssrc: u32) -> Self {
        Self {
            mode: mode.into(),
            secret_key,
            ssrc,
            sequence: 0,
            timestamp: 0,
            nonce: 0,
        }
    }

    /// Parse the JSON form delivered by the signalling layer
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl std::fmt::Debug for ConnectionData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionData")
            .field("mode", &self.mode)
            .field("secret_key", &"[REDACTED]")
            .field("ssrc", &self.ssrc)
            .field("sequence", &self.sequence)
            .field("timestamp", &self.timestamp)
            .field("nonce", &self.nonce)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_speaking_serialization() {
        let msg = SignalMessage::speaking(true, 1234);
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"voice/speaking\""));
        assert!(json.contains("\"ssrc\":1234"));

        let parsed: SignalMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_connection_data_defaults_counters() {
        let key: Vec<String> = (0..32).map(|i| i.to_string()).collect();
        let json = format!(
            r#"{{"mode":"xchacha20_poly1305_lite","secret_key":[{}],"ssrc":99}}"#,
            key.join(",")
        );

        let data = ConnectionData::from_json(&json).unwrap();
        assert_eq!(data.mode, "xchacha20_poly1305_lite");
        assert_eq!(data.ssrc, 99);
        assert_eq!(data.secret_key[31], 31);
        assert_eq!(data.sequence, 0);
        assert_eq!(data.nonce, 0);
    }

    #[test]
    fn test_connection_data_parse_error() {
        let err = ConnectionData::from_json(r#"{"mode":"x","secret_key":[1,2],"ssrc":1}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }
}
