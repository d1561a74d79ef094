// ABOUTME: Decode engine contract used by the player
// ABOUTME: Engines report frames and lifecycle events through a generation-tagged emitter

use crate::error::Error;
use crate::player::actor::PlayerMessage;
use crate::protocol::encryption::{EncryptionMode, SecretBoxCounters, SECRET_KEY_LEN};
use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;

/// Equalizer band count accepted by engines
pub const EQUALIZER_BANDS: usize = 15;

/// Lowest accepted equalizer gain
pub const EQUALIZER_MIN_GAIN: f32 = -0.25;

/// Highest accepted equalizer gain
pub const EQUALIZER_MAX_GAIN: f32 = 1.0;

/// Accepted encoder bitrate range in bits per second
pub const BITRATE_RANGE: std::ops::RangeInclusive<u32> = 500..=512_000;

/// Something the engine reports back to its player
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The engine opened its input and is about to produce frames
    Ready,
    /// One encoded frame; only the first `length` bytes are valid
    Packet {
        /// Encoded frame bytes
        frame: Bytes,
        /// Valid prefix of `frame`
        length: usize,
        /// Samples per channel covered by the frame
        frame_size: u32,
    },
    /// Input exhausted
    Finish,
    /// Playback failed
    Error {
        /// Description from the engine
        message: String,
        /// Engine specific error code
        code: i32,
        /// Whether retrying from the current position may succeed
        retryable: bool,
    },
    /// Diagnostic text
    Debug(String),
}

/// Emitter handed to an engine at creation
///
/// Tagged with the engine's generation so events from a replaced engine are
/// discarded by the player.
#[derive(Clone)]
pub struct EngineEvents {
    generation: u64,
    mailbox: mpsc::WeakUnboundedSender<PlayerMessage>,
}

impl EngineEvents {
    pub(crate) fn new(generation: u64, mailbox: mpsc::WeakUnboundedSender<PlayerMessage>) -> Self {
        Self {
            generation,
            mailbox,
        }
    }

    /// Deliver an event; returns false once the player is gone
    pub fn emit(&self, event: EngineEvent) -> bool {
        match self.mailbox.upgrade() {
            Some(mailbox) => mailbox
                .send(PlayerMessage::Engine {
                    generation: self.generation,
                    event,
                })
                .is_ok(),
            None => false,
        }
    }

    /// Generation this emitter belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Debug for EngineEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineEvents")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Options fixed when an engine is created
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// Engine encrypts and sends packets itself
    pub external_encryption: bool,
}

/// Creates decode engines for a player
pub trait EngineFactory: Send + Sync {
    /// Create an engine reporting through `events`
    fn create(
        &self,
        options: EngineOptions,
        events: EngineEvents,
    ) -> crate::Result<Box<dyn DecodeEngine>>;
}

/// Media decoding and effects pipeline producing opus frames
///
/// The external-encryption hooks are only called when the engine was
/// created with [`EngineOptions::external_encryption`]; engines without that
/// capability keep the default implementations.
pub trait DecodeEngine: Send {
    /// Configure the output format
    fn set_output(&mut self, channels: u8, sample_rate: u32, bitrate: u32) -> crate::Result<()>;

    /// Set the media input
    fn set_url(&mut self, url: &str, is_file: bool) -> crate::Result<()>;

    /// Begin producing frames
    fn start(&mut self) -> crate::Result<()>;

    /// Stop and release resources; no further events are emitted
    fn stop(&mut self);

    /// Pause or resume frame production
    fn pause(&mut self, paused: bool) -> crate::Result<()>;

    /// Jump to `position`
    fn seek(&mut self, position: Duration) -> crate::Result<()>;

    /// Output gain, 1.0 is unity
    fn set_volume(&mut self, volume: f32) -> crate::Result<()>;

    /// Encoder bitrate in bits per second
    fn set_bitrate(&mut self, bitrate: u32) -> crate::Result<()>;

    /// Playback rate (pitch follows)
    fn set_rate(&mut self, rate: f32) -> crate::Result<()>;

    /// Playback tempo (pitch preserved)
    fn set_tempo(&mut self, tempo: f32) -> crate::Result<()>;

    /// Tremolo effect
    fn set_tremolo(&mut self, depth: f32, frequency: f32) -> crate::Result<()>;

    /// Per-band equalizer gains
    fn set_equalizer(&mut self, gains: &[f32]) -> crate::Result<()>;

    /// Current playback position
    fn time(&self) -> Duration;

    /// Media duration, when known
    fn duration(&self) -> Option<Duration>;

    /// Frames dropped so far
    fn frames_dropped(&self) -> u64;

    /// Frames produced so far
    fn total_frames(&self) -> u64;

    /// Install the session key for external encryption
    fn set_secret_box(
        &mut self,
        _secret_key: &[u8; SECRET_KEY_LEN],
        _mode: EncryptionMode,
        _ssrc: u32,
    ) -> crate::Result<()> {
        Err(unsupported())
    }

    /// Overwrite the engine's packet counters
    fn update_secret_box(&mut self, _counters: SecretBoxCounters) -> crate::Result<()> {
        Err(unsupported())
    }

    /// Read the engine's packet counters
    fn secret_box(&self) -> crate::Result<SecretBoxCounters> {
        Err(unsupported())
    }

    /// Send packets directly to `remote`, or stop sending with `None`
    fn pipe(&mut self, _remote: Option<SocketAddr>) -> crate::Result<()> {
        Err(unsupported())
    }
}

fn unsupported() -> Error {
    Error::Unsupported("engine does not support external encryption".to_string())
}

/// A playback control request
#[derive(Debug, Clone, PartialEq)]
pub enum EngineControl {
    /// Pause or resume
    Pause(bool),
    /// Seek to a position
    Seek(Duration),
    /// Output gain
    Volume(f32),
    /// Encoder bitrate
    Bitrate(u32),
    /// Playback rate
    Rate(f32),
    /// Playback tempo
    Tempo(f32),
    /// Tremolo depth and frequency
    Tremolo {
        /// Depth in [0, 1]
        depth: f32,
        /// Frequency in Hz
        frequency: f32,
    },
    /// Equalizer band gains
    Equalizer(Vec<f32>),
}

impl EngineControl {
    /// Reject out-of-range arguments before they reach an engine
    pub fn validate(&self) -> crate::Result<()> {
        match self {
            EngineControl::Pause(_) | EngineControl::Seek(_) => Ok(()),
            EngineControl::Volume(volume) => {
                if volume.is_finite() && *volume >= 0.0 {
                    Ok(())
                } else {
                    Err(invalid(format!("volume {volume} must be finite and >= 0")))
                }
            }
            EngineControl::Bitrate(bitrate) => {
                if BITRATE_RANGE.contains(bitrate) {
                    Ok(())
                } else {
                    Err(invalid(format!(
                        "bitrate {} outside {}..={}",
                        bitrate,
                        BITRATE_RANGE.start(),
                        BITRATE_RANGE.end()
                    )))
                }
            }
            EngineControl::Rate(value) | EngineControl::Tempo(value) => {
                if value.is_finite() && *value > 0.0 {
                    Ok(())
                } else {
                    Err(invalid(format!("speed {value} must be positive")))
                }
            }
            EngineControl::Tremolo { depth, frequency } => {
                if !(0.0..=1.0).contains(depth) {
                    return Err(invalid(format!("tremolo depth {depth} outside 0..=1")));
                }
                if !frequency.is_finite() || *frequency <= 0.0 {
                    return Err(invalid(format!(
                        "tremolo frequency {frequency} must be positive"
                    )));
                }
                Ok(())
            }
            EngineControl::Equalizer(gains) => {
                if gains.len() > EQUALIZER_BANDS {
                    return Err(invalid(format!(
                        "{} equalizer bands, at most {} supported",
                        gains.len(),
                        EQUALIZER_BANDS
                    )));
                }
                match gains
                    .iter()
                    .find(|gain| !(EQUALIZER_MIN_GAIN..=EQUALIZER_MAX_GAIN).contains(*gain))
                {
                    Some(gain) => Err(invalid(format!(
                        "equalizer gain {gain} outside {EQUALIZER_MIN_GAIN}..={EQUALIZER_MAX_GAIN}"
                    ))),
                    None => Ok(()),
                }
            }
        }
    }

    /// Whether the request leaves the stream without frames for a while
    pub fn interrupts_audio(&self) -> bool {
        matches!(self, EngineControl::Pause(true) | EngineControl::Seek(_))
    }
}

fn invalid(message: String) -> Error {
    Error::InvalidArgument(message)
}

/// Snapshot of the current playback
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackStatus {
    /// Playback position
    pub position: Duration,
    /// Media duration, when known
    pub duration: Option<Duration>,
    /// Frames dropped by the engine
    pub frames_dropped: u64,
    /// Frames produced by the engine
    pub total_frames: u64,
    /// Whether playback is paused
    pub paused: bool,
    /// Volume last requested by the caller
    pub volume: f32,
}
