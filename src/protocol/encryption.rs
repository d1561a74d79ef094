// ABOUTME: Encryption mode negotiation and per-connection counter state
// ABOUTME: Sequence, timestamp and nonce all wrap instead of overflowing

use crate::protocol::messages::ConnectionData;
use std::fmt;

/// Length of the session secret key in bytes
pub const SECRET_KEY_LEN: usize = 32;

/// How the AEAD nonce is built for each packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionMode {
    /// No encryption negotiated yet; nothing may be sent
    None,
    /// 4-byte incrementing counter appended after the ciphertext
    Lite,
    /// 24 random bytes appended after the ciphertext
    Suffix,
    /// The packet header itself is the nonce
    Default,
}

impl EncryptionMode {
    /// Parse a negotiated mode string
    ///
    /// Unrecognized strings select [`EncryptionMode::Default`] rather than
    /// failing, so a peer advertising a newer name still gets header nonces.
    pub fn from_negotiated(mode: &str) -> Self {
        match mode {
            "none" => EncryptionMode::None,
            "xchacha20_poly1305_lite" => EncryptionMode::Lite,
            "xchacha20_poly1305_suffix" => EncryptionMode::Suffix,
            "xchacha20_poly1305" => EncryptionMode::Default,
            other => {
                log::debug!("Unknown encryption mode '{}', using default", other);
                EncryptionMode::Default
            }
        }
    }

    /// Convert to protocol string
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionMode::None => "none",
            EncryptionMode::Lite => "xchacha20_poly1305_lite",
            EncryptionMode::Suffix => "xchacha20_poly1305_suffix",
            EncryptionMode::Default => "xchacha20_poly1305",
        }
    }

    /// Number of bytes appended after the ciphertext
    pub fn suffix_len(&self) -> usize {
        match self {
            EncryptionMode::None | EncryptionMode::Default => 0,
            EncryptionMode::Lite => 4,
            EncryptionMode::Suffix => 24,
        }
    }
}

/// Counter snapshot exchanged with an engine that encrypts on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecretBoxCounters {
    /// RTP sequence number
    pub sequence: u16,
    /// RTP timestamp
    pub timestamp: u32,
    /// Lite-mode nonce counter
    pub nonce: u32,
}

/// Per-connection key material and packet counters
#[derive(Clone)]
pub struct EncryptionState {
    secret_key: [u8; SECRET_KEY_LEN],
    /// Synchronization source written into every header
    pub ssrc: u32,
    /// Last sequence number sent
    pub sequence: u16,
    /// Last timestamp sent
    pub timestamp: u32,
    /// Last lite-mode nonce used
    pub nonce: u32,
    /// Negotiated mode
    pub mode: EncryptionMode,
}

impl EncryptionState {
    /// Create a new state with explicit starting counters at zero
    pub fn new(secret_key: [u8; SECRET_KEY_LEN], ssrc: u32, mode: EncryptionMode) -> Self {
        Self {
            secret_key,
            ssrc,
            sequence: 0,
            timestamp: 0,
            nonce: 0,
            mode,
        }
    }

    /// Build the state a session negotiated
    pub fn from_connection_data(data: &ConnectionData) -> Self {
        Self {
            secret_key: data.secret_key,
            ssrc: data.ssrc,
            sequence: data.sequence,
            timestamp: data.timestamp,
            nonce: data.nonce,
            mode: EncryptionMode::from_negotiated(&data.mode),
        }
    }

    /// Placeholder state used before a session has negotiated anything
    pub fn unnegotiated() -> Self {
        Self::new([0u8; SECRET_KEY_LEN], 0, EncryptionMode::None)
    }

    /// The session secret key
    pub fn secret_key(&self) -> &[u8; SECRET_KEY_LEN] {
        &self.secret_key
    }

    /// Advance sequence and timestamp for the next packet
    #[inline]
    pub fn advance(&mut self, frame_size: u32) {
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(frame_size);
    }

    /// Advance and return the lite-mode nonce counter
    #[inline]
    pub fn next_nonce(&mut self) -> u32 {
        self.nonce = self.nonce.wrapping_add(1);
        self.nonce
    }

    /// Snapshot the counters
    pub fn counters(&self) -> SecretBoxCounters {
        SecretBoxCounters {
            sequence: self.sequence,
            timestamp: self.timestamp,
            nonce: self.nonce,
        }
    }

    /// Overwrite the counters from a snapshot
    pub fn set_counters(&mut self, counters: SecretBoxCounters) {
        self.sequence = counters.sequence;
        self.timestamp = counters.timestamp;
        self.nonce = counters.nonce;
    }
}

impl fmt::Debug for EncryptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionState")
            .field("secret_key", &"[REDACTED]")
            .field("ssrc", &self.ssrc)
            .field("sequence", &self.sequence)
            .field("timestamp", &self.timestamp)
            .field("nonce", &self.nonce)
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!(EncryptionMode::from_negotiated("none"), EncryptionMode::None);
        assert_eq!(
            EncryptionMode::from_negotiated("xchacha20_poly1305_lite"),
            EncryptionMode::Lite
        );
        assert_eq!(
            EncryptionMode::from_negotiated("xchacha20_poly1305_suffix"),
            EncryptionMode::Suffix
        );
        assert_eq!(
            EncryptionMode::from_negotiated("xchacha20_poly1305"),
            EncryptionMode::Default
        );
    }

    #[test]
    fn test_unknown_mode_falls_back_to_default() {
        assert_eq!(
            EncryptionMode::from_negotiated("aead_aes256_gcm_rtpsize"),
            EncryptionMode::Default
        );
        assert_eq!(EncryptionMode::from_negotiated(""), EncryptionMode::Default);
    }

    #[test]
    fn test_sequence_wraps() {
        let mut state = EncryptionState::new([0; 32], 1, EncryptionMode::Default);
        state.sequence = u16::MAX;
        state.advance(960);
        assert_eq!(state.sequence, 0);

        let start = state.sequence;
        for _ in 0..65536u32 {
            state.advance(960);
        }
        assert_eq!(state.sequence, start);
    }

    #[test]
    fn test_timestamp_wraps() {
        let mut state = EncryptionState::new([0; 32], 1, EncryptionMode::Default);
        state.timestamp = u32::MAX;
        state.advance(1);
        assert_eq!(state.timestamp, 0);

        state.timestamp = u32::MAX - 100;
        state.advance(960);
        assert_eq!(state.timestamp, 859);
    }

    #[test]
    fn test_nonce_wraps() {
        let mut state = EncryptionState::new([0; 32], 1, EncryptionMode::Lite);
        state.nonce = u32::MAX;
        assert_eq!(state.next_nonce(), 0);
        assert_eq!(state.next_nonce(), 1);
    }

    #[test]
    fn test_counters_roundtrip_and_redaction() {
        let mut state = EncryptionState::new([7; 32], 42, EncryptionMode::Lite);
        state.set_counters(SecretBoxCounters {
            sequence: 10,
            timestamp: 9600,
            nonce: 3,
        });
        assert_eq!(state.counters().sequence, 10);
        assert_eq!(state.counters().timestamp, 9600);
        assert_eq!(state.counters().nonce, 3);

        let debug = format!("{:?}", state);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("7, 7"));
    }
}
