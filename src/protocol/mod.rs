// ABOUTME: Wire protocol for voice packets and signalling payloads
// ABOUTME: Header layout, AEAD framing, encryption counters, JSON messages

/// Per-connection encryption mode, key and counters
pub mod encryption;
/// Signalling payloads exchanged with the remote peer
pub mod messages;
/// Voice packet header and AEAD framing
pub mod packet;

pub use encryption::{EncryptionMode, EncryptionState, SecretBoxCounters};
pub use messages::{ConnectionData, SignalMessage};
pub use packet::{PacketCodec, HEADER_LEN, SILENCE_FRAME};
