// ABOUTME: Player and session configuration
// ABOUTME: Builder-style knobs for output format, retry window, keepalive and timeouts

use std::time::Duration;

/// Output channel count expected by voice transports
pub const DEFAULT_CHANNELS: u8 = 2;

/// Output sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Default encoder bitrate in bits per second
pub const DEFAULT_BITRATE: u32 = 128_000;

/// Samples per channel in one 20ms frame at 48kHz
pub const FRAME_SIZE: u32 = 960;

/// Player configuration
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Output channel count
    pub channels: u8,
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// Encoder bitrate in bits per second
    pub bitrate: u32,
    /// Let the decode engine encrypt and send packets itself
    pub external_encryption: bool,
    /// Scale volume by the selected stream's loudness hint
    pub normalize_volume: bool,
    /// A second error inside this window is fatal
    pub retry_window: Duration,
    /// Padding frames sent after the stream goes idle
    pub keepalive_frames: u8,
    /// Spacing between padding frames
    pub keepalive_interval: Duration,
}

impl PlayerConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the encoder bitrate
    pub fn bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// Delegate encryption and sending to the decode engine
    pub fn external_encryption(mut self, enabled: bool) -> Self {
        self.external_encryption = enabled;
        self
    }

    /// Enable loudness normalization
    pub fn normalize_volume(mut self, enabled: bool) -> Self {
        self.normalize_volume = enabled;
        self
    }

    /// Set the retry window
    pub fn retry_window(mut self, window: Duration) -> Self {
        self.retry_window = window;
        self
    }

    /// Set keepalive frame count and spacing
    pub fn keepalive(mut self, frames: u8, interval: Duration) -> Self {
        self.keepalive_frames = frames;
        self.keepalive_interval = interval;
        self
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            channels: DEFAULT_CHANNELS,
            sample_rate: DEFAULT_SAMPLE_RATE,
            bitrate: DEFAULT_BITRATE,
            external_encryption: false,
            normalize_volume: false,
            retry_window: Duration::from_secs(5 * 60),
            keepalive_frames: 5,
            keepalive_interval: Duration::from_millis(20),
        }
    }
}

/// Session configuration
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// How long `await_ready` waits before giving up
    pub ready_timeout: Duration,
    /// Automatic reconnects before the session is destroyed
    pub max_reconnect_attempts: u32,
    /// Delay unit; attempt `n` waits `n * reconnect_backoff`
    pub reconnect_backoff: Duration,
}

impl SessionConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the readiness timeout
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Set the reconnect policy
    pub fn reconnect(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self.reconnect_backoff = backoff;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(15),
            max_reconnect_attempts: 5,
            reconnect_backoff: Duration::from_secs(5),
        }
    }
}
