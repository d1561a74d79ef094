// ABOUTME: Voice packet codec: 12-byte header plus AEAD-sealed payload
// ABOUTME: Each session owns one codec and its reusable scratch buffer

use crate::error::Error;
use crate::protocol::encryption::{EncryptionMode, EncryptionState};
use bytes::{BufMut, BytesMut};
use chacha20poly1305::aead::{Aead, AeadCore, AeadInPlace, KeyInit, OsRng};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};

/// Header length in bytes
pub const HEADER_LEN: usize = 12;

/// AEAD nonce length in bytes
pub const NONCE_LEN: usize = 24;

/// AEAD authentication tag length in bytes
pub const TAG_LEN: usize = 16;

/// First two header bytes (version/flags, payload type)
pub const HEADER_MARKER: [u8; 2] = [0x80, 0x78];

/// Payload of a silence/keepalive frame
pub const SILENCE_FRAME: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Room for a 20ms stereo frame at high bitrate plus framing
const INITIAL_BUFFER_CAPACITY: usize = 1500;

/// Builds encrypted voice packets for one session
///
/// Counters are advanced before every packet, so the first packet carries
/// `sequence + 1` relative to the state the codec was created with.
pub struct PacketCodec {
    state: EncryptionState,
    cipher: XChaCha20Poly1305,
    buffer: BytesMut,
}

impl PacketCodec {
    /// Create a codec from negotiated encryption state
    pub fn new(state: EncryptionState) -> Self {
        let cipher = XChaCha20Poly1305::new(Key::from_slice(state.secret_key()));
        Self {
            state,
            cipher,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Current encryption state
    pub fn state(&self) -> &EncryptionState {
        &self.state
    }

    /// Mutable encryption state, for counter sync with an external encryptor
    pub fn state_mut(&mut self) -> &mut EncryptionState {
        &mut self.state
    }

    /// Negotiated mode
    pub fn mode(&self) -> EncryptionMode {
        self.state.mode
    }

    /// Whether this codec can produce packets at all
    pub fn can_send(&self) -> bool {
        self.state.mode != EncryptionMode::None
    }

    /// Frame and encrypt one payload
    ///
    /// The returned slice borrows the codec's scratch buffer and is only
    /// valid until the next call.
    pub fn encode(&mut self, payload: &[u8], frame_size: u32) -> crate::Result<&[u8]> {
        let mode = self.state.mode;
        if mode == EncryptionMode::None {
            return Err(Error::Unsupported(
                "no encryption mode negotiated".to_string(),
            ));
        }

        self.state.advance(frame_size);

        self.buffer.clear();
        self.buffer
            .reserve(HEADER_LEN + payload.len() + TAG_LEN + mode.suffix_len());
        self.buffer.put_slice(&HEADER_MARKER);
        self.buffer.put_u16(self.state.sequence);
        self.buffer.put_u32(self.state.timestamp);
        self.buffer.put_u32(self.state.ssrc);

        let mut nonce = [0u8; NONCE_LEN];
        match mode {
            EncryptionMode::Default => {
                nonce[..HEADER_LEN].copy_from_slice(&self.buffer[..HEADER_LEN]);
            }
            EncryptionMode::Lite => {
                let counter = self.state.next_nonce();
                nonce[..4].copy_from_slice(&counter.to_be_bytes());
            }
            EncryptionMode::Suffix => {
                nonce.copy_from_slice(&XChaCha20Poly1305::generate_nonce(&mut OsRng));
            }
            EncryptionMode::None => {}
        }

        self.buffer.put_slice(payload);
        let tag = self
            .cipher
            .encrypt_in_place_detached(
                XNonce::from_slice(&nonce),
                b"",
                &mut self.buffer[HEADER_LEN..],
            )
            .map_err(|_| Error::Internal("packet encryption failed".to_string()))?;
        self.buffer.put_slice(&tag);

        match mode {
            EncryptionMode::Lite => self.buffer.put_slice(&nonce[..4]),
            EncryptionMode::Suffix => self.buffer.put_slice(&nonce),
            _ => {}
        }

        Ok(&self.buffer[..])
    }

    /// Decrypt a packet produced with this codec's key and mode
    pub fn open(&self, packet: &[u8]) -> crate::Result<Vec<u8>> {
        let suffix_len = self.state.mode.suffix_len();
        if packet.len() < HEADER_LEN + TAG_LEN + suffix_len {
            return Err(Error::Parse(format!(
                "packet too short: {} bytes",
                packet.len()
            )));
        }

        let mut nonce = [0u8; NONCE_LEN];
        let body_end = packet.len() - suffix_len;
        match self.state.mode {
            EncryptionMode::Default => nonce[..HEADER_LEN].copy_from_slice(&packet[..HEADER_LEN]),
            EncryptionMode::Lite => nonce[..4].copy_from_slice(&packet[body_end..]),
            EncryptionMode::Suffix => nonce.copy_from_slice(&packet[body_end..]),
            EncryptionMode::None => {
                return Err(Error::Unsupported(
                    "no encryption mode negotiated".to_string(),
                ))
            }
        }

        self.cipher
            .decrypt(XNonce::from_slice(&nonce), &packet[HEADER_LEN..body_end])
            .map_err(|_| Error::Parse("packet authentication failed".to_string()))
    }
}

impl std::fmt::Debug for PacketCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketCodec")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
