// ABOUTME: Main library entry point for voxcast
// ABOUTME: Exports the player, session state machine and packet codec

//! # voxcast
//!
//! Streams decoded audio frames to a real-time voice transport as encrypted,
//! sequenced datagrams, and tracks the lifecycle of the voice sessions that
//! receive them.
//!
//! ## Features
//!
//! - **Player**: actor that owns a decode engine, selects streams, retries
//!   transient failures and fans frames out to subscribed sessions
//! - **Session**: readiness/reconnect/timeout state machine for one peer
//! - **Protocol**: 12-byte voice header, AEAD framing and signalling messages
//!
//! ## Example: Streaming a test tone
//!
//! ```no_run
//! use std::sync::Arc;
//! use voxcast::player::{Player, Stream, ToneEngineFactory, Track};
//! use voxcast::PlayerConfig;
//!
//! #[tokio::main]
//! async fn main() -> voxcast::Result<()> {
//!     let factory = Arc::new(ToneEngineFactory::new(440.0));
//!     let player = Player::spawn(PlayerConfig::default(), factory);
//!
//!     let stream = Stream::audio("tone://a4", "pcm", Some(1536));
//!     let track = Arc::new(Track::with_streams("tone", "A4", "voxcast", vec![stream]));
//!     player.play(track)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Command-line arguments and logging setup for the binary
pub mod cli;
/// Player and session configuration
pub mod config;
/// Playback orchestration: tracks, engines, subscriptions, keepalive
pub mod player;
/// Wire format: packet header, encryption state and signalling messages
pub mod protocol;
/// Voice session state machine and transport contracts
pub mod session;

pub use config::{PlayerConfig, SessionConfig};
pub use player::{Player, PlayerEvent, PlayerHandle, Track};
pub use protocol::encryption::{EncryptionMode, EncryptionState};
pub use protocol::packet::PacketCodec;
pub use session::{Session, SessionRegistry, SessionStatus};

/// Result type for voxcast operations
pub type Result<T> = std::result::Result<T, error::Error>;

/// Error types for voxcast
pub mod error {
    use thiserror::Error;

    /// Error types for voxcast operations
    #[derive(Error, Debug)]
    pub enum Error {
        /// Transport or I/O failure
        #[error("Network error: {0}")]
        Network(String),

        /// Malformed response or continuation data
        #[error("Parse error: {0}")]
        Parse(String),

        /// No viable stream could be found for a track
        #[error("Unplayable: {0}")]
        Unplayable(String),

        /// Operation is not valid in the current mode
        #[error("Unsupported: {0}")]
        Unsupported(String),

        /// Invariant violation or missing required field
        #[error("Internal error: {0}")]
        Internal(String),

        /// Arbitrary cause with a user-facing summary
        #[error("{message}")]
        Generic {
            /// User-facing summary
            message: String,
            /// Underlying cause
            #[source]
            source: Box<dyn std::error::Error + Send + Sync>,
        },

        /// A playback control was issued without an active decode engine
        #[error("Not playing")]
        NotPlaying,

        /// A control value was out of range
        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        /// An operation did not complete in time
        #[error("Timed out: {0}")]
        Timeout(String),

        /// The session was destroyed
        #[error("Session destroyed")]
        SessionDestroyed,

        /// The session is not ready to carry packets
        #[error("Session not ready")]
        SessionNotReady,

        /// The player actor has shut down
        #[error("Player closed")]
        PlayerClosed,
    }

    impl Error {
        /// Wrap an arbitrary error with a user-facing summary
        pub fn generic(
            message: impl Into<String>,
            source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
        ) -> Self {
            Error::Generic {
                message: message.into(),
                source: source.into(),
            }
        }
    }

    impl From<std::io::Error> for Error {
        fn from(err: std::io::Error) -> Self {
            Error::Network(err.to_string())
        }
    }

    impl From<serde_json::Error> for Error {
        fn from(err: serde_json::Error) -> Self {
            Error::Parse(err.to_string())
        }
    }
}
