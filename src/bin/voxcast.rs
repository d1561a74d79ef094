// ABOUTME: voxcast binary
// ABOUTME: Streams an encrypted test tone to a voice endpoint over UDP

use clap::Parser;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use voxcast::cli::StreamArgs;
use voxcast::player::{Player, PlayerEvent, Stream, ToneEngineFactory, Track};
use voxcast::protocol::SignalMessage;
use voxcast::session::{Signaller, UdpTransport};
use voxcast::SessionRegistry;

#[derive(Parser, Debug)]
#[command(name = "voxcast")]
#[command(
    author,
    version,
    about = "Stream an encrypted test tone to a voice endpoint",
    long_about = None
)]
struct Args {
    #[command(flatten)]
    stream: StreamArgs,
}

/// Signaller that logs messages instead of sending them
///
/// The binary has no signalling connection; the endpoint is assumed to be
/// configured already.
struct LogSignaller;

impl Signaller for LogSignaller {
    fn send(&self, message: &SignalMessage) -> voxcast::Result<()> {
        tracing::info!("Signal: {}", message.to_json()?);
        Ok(())
    }

    fn reconnect(&self) -> voxcast::Result<()> {
        Err(voxcast::error::Error::Unsupported(
            "no signalling channel to reconnect".to_string(),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    args.stream.init_tracing();
    args.stream.log_startup_info();

    let connection = args.stream.connection_data()?;
    let transport = Arc::new(UdpTransport::bind(args.stream.bind, args.stream.remote).await?);
    tracing::info!("Sending from {}", transport.local_addr()?);

    let registry = SessionRegistry::new();
    let session = registry.create(
        "voxcast",
        transport,
        Arc::new(LogSignaller),
        args.stream.build_session_config(),
    );
    session.set_connection_data(connection);
    session.mark_connecting();
    session.mark_ready()?;
    session.await_ready().await?;

    let factory = Arc::new(
        ToneEngineFactory::new(args.stream.frequency).with_duration(args.stream.tone_duration()),
    );
    let player = Player::spawn(args.stream.build_player_config(), factory);
    let mut events = player.events();
    player.subscribe(&session).await?;

    let stream = Stream::audio(format!("tone://{}", args.stream.frequency), "pcm", None);
    let track = Arc::new(Track::with_streams(
        "tone",
        format!("{} Hz test tone", args.stream.frequency),
        "voxcast",
        vec![stream],
    ));
    player.play(track)?;

    tracing::info!("Press Ctrl+C to stop");

    let mut packets: u64 = 0;
    let result: Result<(), Box<dyn std::error::Error + Send + Sync>> = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(PlayerEvent::Ready) => tracing::info!("Playback started"),
                Ok(PlayerEvent::Packet { .. }) => {
                    packets += 1;
                    if packets % 250 == 0 {
                        tracing::info!("Sent {} packets", packets);
                    }
                }
                Ok(PlayerEvent::Finish) => {
                    tracing::info!("Playback finished after {} packets", packets);
                    break Ok(());
                }
                Ok(PlayerEvent::Error { error, fatal: true }) => {
                    tracing::error!("Playback failed: {}", error);
                    break Err(error.to_string().into());
                }
                Ok(PlayerEvent::Error { error, fatal: false }) => {
                    tracing::warn!("Recovering from: {}", error);
                }
                Ok(PlayerEvent::Debug(message)) => tracing::debug!("{}", message),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event receiver lagged by {}", skipped);
                }
                Err(RecvError::Closed) => break Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                player.stop().await?;
                break Ok(());
            }
        }
    };

    // Let the trailing silence frames go out
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;

    player.shutdown();
    registry.destroy_all();
    result
}
