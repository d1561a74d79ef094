// ABOUTME: CLI argument parsing and setup helpers for the voxcast binary
// ABOUTME: Turns command-line flags into connection data and player/session configs

use crate::config::{PlayerConfig, SessionConfig};
use crate::error::Error;
use crate::protocol::encryption::SECRET_KEY_LEN;
use crate::protocol::messages::ConnectionData;
use base64::Engine as _;
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Arguments for streaming a test tone to a voice endpoint
///
/// Use with `#[command(flatten)]` in a binary's Args struct.
#[derive(Args, Debug, Clone)]
pub struct StreamArgs {
    /// Remote voice endpoint to send packets to
    #[arg(short, long)]
    pub remote: SocketAddr,

    /// Local address to bind the UDP socket to
    #[arg(short, long, default_value = "0.0.0.0:0")]
    pub bind: SocketAddr,

    /// Session secret key, base64 encoded (32 bytes). Required unless --connection is given.
    #[arg(short, long, required_unless_present = "connection")]
    pub key: Option<String>,

    /// Synchronization source written into every packet
    #[arg(long, default_value = "1")]
    pub ssrc: u32,

    /// Negotiated encryption mode
    #[arg(short, long, default_value = "xchacha20_poly1305_lite")]
    pub mode: String,

    /// JSON file with connection data (overrides --key, --ssrc and --mode)
    #[arg(long)]
    pub connection: Option<PathBuf>,

    /// Test tone frequency in Hz
    #[arg(short, long, default_value = "440.0")]
    pub frequency: f64,

    /// How many seconds of tone to send
    #[arg(short, long, default_value = "5")]
    pub seconds: u64,

    /// Encoder bitrate in bits per second
    #[arg(long, default_value = "128000")]
    pub bitrate: u32,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl StreamArgs {
    /// Initialize tracing based on verbosity flag
    pub fn init_tracing(&self) {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let filter = if self.verbose {
            "voxcast=debug"
        } else {
            "voxcast=info"
        };

        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| filter.into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    /// Log startup information
    pub fn log_startup_info(&self) {
        tracing::info!("voxcast v{}", env!("CARGO_PKG_VERSION"));
        tracing::info!("Bind: {}", self.bind);
        tracing::info!("Remote: {}", self.remote);
        tracing::info!(
            "Audio: {} Hz test tone for {}s at {} bps",
            self.frequency,
            self.seconds,
            self.bitrate
        );
    }

    /// Connection parameters from --connection, or from --key/--ssrc/--mode
    pub fn connection_data(&self) -> crate::Result<ConnectionData> {
        if let Some(path) = &self.connection {
            let json = std::fs::read_to_string(path)?;
            return ConnectionData::from_json(&json);
        }

        let key = self
            .key
            .as_deref()
            .ok_or_else(|| Error::InvalidArgument("a secret key is required".to_string()))?;
        Ok(ConnectionData::new(
            self.mode.clone(),
            decode_key(key)?,
            self.ssrc,
        ))
    }

    /// Build PlayerConfig from these args
    pub fn build_player_config(&self) -> PlayerConfig {
        PlayerConfig::new().bitrate(self.bitrate)
    }

    /// Build SessionConfig from these args
    pub fn build_session_config(&self) -> SessionConfig {
        SessionConfig::new()
    }

    /// How long the tone plays
    pub fn tone_duration(&self) -> Duration {
        Duration::from_secs(self.seconds)
    }
}

/// Decode a base64 secret key
pub fn decode_key(encoded: &str) -> crate::Result<[u8; SECRET_KEY_LEN]> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::Parse(format!("secret key is not valid base64: {e}")))?;

    bytes.try_into().map_err(|bytes: Vec<u8>| {
        Error::InvalidArgument(format!(
            "secret key must be {} bytes, got {}",
            SECRET_KEY_LEN,
            bytes.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> StreamArgs {
        StreamArgs {
            remote: "127.0.0.1:50000".parse().unwrap(),
            bind: "0.0.0.0:0".parse().unwrap(),
            key: Some(base64::engine::general_purpose::STANDARD.encode([7u8; 32])),
            ssrc: 42,
            mode: "xchacha20_poly1305_lite".to_string(),
            connection: None,
            frequency: 440.0,
            seconds: 5,
            bitrate: 96_000,
            verbose: false,
        }
    }

    #[test]
    fn test_connection_data_from_flags() {
        let data = args().connection_data().unwrap();
        assert_eq!(data.secret_key, [7u8; 32]);
        assert_eq!(data.ssrc, 42);
        assert_eq!(data.mode, "xchacha20_poly1305_lite");
    }

    #[test]
    fn test_short_key_rejected() {
        let encoded = base64::engine::general_purpose::STANDARD.encode([1u8; 16]);
        assert!(matches!(
            decode_key(&encoded),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(decode_key("not base64!"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_build_config() {
        let args = args();
        assert_eq!(args.build_player_config().bitrate, 96_000);
        assert_eq!(args.tone_duration(), Duration::from_secs(5));
        assert_eq!(
            args.build_session_config().ready_timeout,
            Duration::from_secs(15)
        );
    }
}
