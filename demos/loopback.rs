// ABOUTME: Loopback demo streaming a tone to a local UDP receiver
// ABOUTME: Decrypts every datagram it receives and prints what arrived

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use voxcast::player::{Player, PlayerEvent, Stream, ToneEngineFactory, Track};
use voxcast::protocol::{ConnectionData, SignalMessage};
use voxcast::session::{Signaller, UdpTransport};
use voxcast::{EncryptionState, PacketCodec, PlayerConfig, SessionConfig, SessionRegistry};

/// Stream a test tone to ourselves and check every packet decrypts
#[derive(Parser, Debug)]
#[command(name = "loopback")]
struct Args {
    /// Negotiated encryption mode
    #[arg(short, long, default_value = "xchacha20_poly1305_lite")]
    mode: String,

    /// Seconds of tone
    #[arg(short, long, default_value = "2")]
    seconds: u64,
}

struct PrintSignaller;

impl Signaller for PrintSignaller {
    fn send(&self, message: &SignalMessage) -> voxcast::Result<()> {
        println!("signal: {}", message.to_json()?);
        Ok(())
    }

    fn reconnect(&self) -> voxcast::Result<()> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    let args = Args::parse();

    let receiver = UdpSocket::bind("127.0.0.1:0").await?;
    let transport =
        Arc::new(UdpTransport::bind("127.0.0.1:0".parse()?, receiver.local_addr()?).await?);
    println!("Streaming {} -> {}", transport.local_addr()?, receiver.local_addr()?);

    let connection = ConnectionData::new(args.mode.clone(), [42; 32], 1234);
    let codec = PacketCodec::new(EncryptionState::from_connection_data(&connection));

    let registry = SessionRegistry::new();
    let session = registry.create(
        "loopback",
        transport,
        Arc::new(PrintSignaller),
        SessionConfig::default(),
    );
    session.set_connection_data(connection);
    session.mark_connecting();
    session.mark_ready()?;

    let factory = Arc::new(
        ToneEngineFactory::new(440.0).with_duration(Duration::from_secs(args.seconds)),
    );
    let player = Player::spawn(PlayerConfig::default(), factory);
    let mut events = player.events();
    player.subscribe(&session).await?;
    player.play(Arc::new(Track::with_streams(
        "tone",
        "A4",
        "loopback",
        vec![Stream::audio("tone://a4", "pcm", None)],
    )))?;

    let receive = tokio::spawn(async move {
        let mut buf = vec![0u8; 8192];
        let (mut frames, mut silence) = (0u32, 0u32);
        // Stops once nothing arrives for a second
        while let Ok(Ok(len)) =
            tokio::time::timeout(Duration::from_secs(1), receiver.recv(&mut buf)).await
        {
            match codec.open(&buf[..len]) {
                Ok(payload) if payload == voxcast::protocol::SILENCE_FRAME => silence += 1,
                Ok(_) => frames += 1,
                Err(e) => println!("undecryptable packet: {}", e),
            }
        }
        (frames, silence)
    });

    loop {
        match events.recv().await? {
            PlayerEvent::Finish => break,
            PlayerEvent::Error { error, fatal } => {
                println!("error: {}", error);
                if fatal {
                    break;
                }
            }
            _ => {}
        }
    }

    let (frames, silence) = receive.await?;
    println!("Received {} audio frames and {} silence frames", frames, silence);

    player.shutdown();
    session.destroy();
    Ok(())
}
