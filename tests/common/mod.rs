// ABOUTME: Shared fixtures for integration tests
// ABOUTME: Recording transports, signallers, scripted decode engines and gated stream sources
#![allow(dead_code)]

use bytes::Bytes;
use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use voxcast::error::Error;
use voxcast::player::{
    DecodeEngine, EngineEvent, EngineEvents, EngineFactory, EngineOptions, PlayerEvent, Stream,
    StreamSet, StreamSource, Track,
};
use voxcast::protocol::encryption::{SecretBoxCounters, SECRET_KEY_LEN};
use voxcast::protocol::{ConnectionData, SignalMessage};
use voxcast::session::{Signaller, VoiceTransport};
use voxcast::{EncryptionMode, EncryptionState, PacketCodec, Session, SessionConfig};

pub const SECRET_KEY: [u8; SECRET_KEY_LEN] = [9; SECRET_KEY_LEN];

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Transport recording every packet with the (virtual) time it was sent
pub struct MockTransport {
    sent: Mutex<Vec<(Instant, Vec<u8>)>>,
    pub closes: AtomicUsize,
    remote: SocketAddr,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            remote: "127.0.0.1:50000".parse().unwrap(),
        }
    }

    pub fn sent(&self) -> Vec<(Instant, Vec<u8>)> {
        self.sent.lock().clone()
    }

    pub fn packets(&self) -> Vec<Vec<u8>> {
        self.sent.lock().iter().map(|(_, p)| p.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl VoiceTransport for MockTransport {
    fn send(&self, packet: &[u8]) -> io::Result<usize> {
        self.sent.lock().push((Instant::now(), packet.to_vec()));
        Ok(packet.len())
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Signaller recording messages and reconnect requests
#[derive(Default)]
pub struct MockSignaller {
    messages: Mutex<Vec<SignalMessage>>,
    pub reconnects: AtomicUsize,
    pub fail_reconnect: AtomicBool,
}

impl MockSignaller {
    pub fn messages(&self) -> Vec<SignalMessage> {
        self.messages.lock().clone()
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }
}

impl Signaller for MockSignaller {
    fn send(&self, message: &SignalMessage) -> voxcast::Result<()> {
        self.messages.lock().push(message.clone());
        Ok(())
    }

    fn reconnect(&self) -> voxcast::Result<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        if self.fail_reconnect.load(Ordering::SeqCst) {
            return Err(Error::Network("gateway unreachable".to_string()));
        }
        Ok(())
    }
}

pub fn connection(mode: &str, ssrc: u32) -> ConnectionData {
    ConnectionData::new(mode, SECRET_KEY, ssrc)
}

/// Codec matching what the player builds for `connection(mode, ssrc)`
pub fn receiver_codec(mode: &str, ssrc: u32) -> PacketCodec {
    PacketCodec::new(EncryptionState::from_connection_data(&connection(mode, ssrc)))
}

pub fn session(
    id: &str,
    config: SessionConfig,
) -> (Session, Arc<MockTransport>, Arc<MockSignaller>) {
    let transport = Arc::new(MockTransport::new());
    let signaller = Arc::new(MockSignaller::default());
    let session = Session::new(id, transport.clone(), signaller.clone(), config);
    (session, transport, signaller)
}

pub fn ready_session(
    id: &str,
    mode: &str,
    ssrc: u32,
) -> (Session, Arc<MockTransport>, Arc<MockSignaller>) {
    let (session, transport, signaller) = session(id, SessionConfig::default());
    session.set_connection_data(connection(mode, ssrc));
    session.mark_connecting();
    session.mark_ready().unwrap();
    (session, transport, signaller)
}

pub fn track(id: &str, streams: Vec<Stream>) -> Arc<Track> {
    Arc::new(Track::with_streams(id, format!("Track {id}"), "tester", streams))
}

pub fn opus_track(id: &str) -> Arc<Track> {
    track(
        id,
        vec![Stream::audio(
            format!("https://cdn.test/{id}.webm"),
            "opus",
            Some(128),
        )],
    )
}

/// Let spawned tasks run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        settle().await;
    }
    panic!("timed out waiting for {what}");
}

/// Wait for the first event accepted by `accept`
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<PlayerEvent>,
    mut accept: impl FnMut(&PlayerEvent) -> bool,
) -> PlayerEvent {
    loop {
        match events.recv().await {
            Ok(event) if accept(&event) => return event,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => panic!("player event channel closed"),
        }
    }
}

/// Whether an accepted event arrives within `window`
pub async fn event_within(
    events: &mut broadcast::Receiver<PlayerEvent>,
    window: Duration,
    accept: impl FnMut(&PlayerEvent) -> bool,
) -> bool {
    tokio::time::timeout(window, wait_for_event(events, accept))
        .await
        .is_ok()
}

pub fn packet(payload: &'static [u8]) -> EngineEvent {
    EngineEvent::Packet {
        frame: Bytes::from_static(payload),
        length: payload.len(),
        frame_size: 960,
    }
}

/// Everything a scripted engine was asked to do
#[derive(Debug, Default)]
pub struct EngineRecord {
    pub output: Option<(u8, u32, u32)>,
    pub url: Option<String>,
    pub started: bool,
    pub stopped: bool,
    pub paused: bool,
    pub position: Duration,
    pub seeks: Vec<Duration>,
    pub volumes: Vec<f32>,
    pub bitrates: Vec<u32>,
    pub equalizer: Vec<f32>,
    pub secret_box: Option<(EncryptionMode, u32)>,
    pub counters: SecretBoxCounters,
    pub counter_updates: Vec<SecretBoxCounters>,
    pub pipes: Vec<Option<SocketAddr>>,
    pub fail_controls: bool,
}

struct MockEngine {
    record: Arc<Mutex<EngineRecord>>,
    external: bool,
}

impl MockEngine {
    fn require_external(&self) -> voxcast::Result<()> {
        if self.external {
            Ok(())
        } else {
            Err(Error::Unsupported("not an encrypting engine".to_string()))
        }
    }
}

impl DecodeEngine for MockEngine {
    fn set_output(&mut self, channels: u8, sample_rate: u32, bitrate: u32) -> voxcast::Result<()> {
        self.record.lock().output = Some((channels, sample_rate, bitrate));
        Ok(())
    }

    fn set_url(&mut self, url: &str, _is_file: bool) -> voxcast::Result<()> {
        self.record.lock().url = Some(url.to_string());
        Ok(())
    }

    fn start(&mut self) -> voxcast::Result<()> {
        self.record.lock().started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.record.lock().stopped = true;
    }

    fn pause(&mut self, paused: bool) -> voxcast::Result<()> {
        let mut record = self.record.lock();
        if record.fail_controls {
            return Err(Error::Internal("decoder busy".to_string()));
        }
        record.paused = paused;
        Ok(())
    }

    fn seek(&mut self, position: Duration) -> voxcast::Result<()> {
        let mut record = self.record.lock();
        if record.fail_controls {
            return Err(Error::Internal("decoder busy".to_string()));
        }
        record.position = position;
        record.seeks.push(position);
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) -> voxcast::Result<()> {
        self.record.lock().volumes.push(volume);
        Ok(())
    }

    fn set_bitrate(&mut self, bitrate: u32) -> voxcast::Result<()> {
        self.record.lock().bitrates.push(bitrate);
        Ok(())
    }

    fn set_rate(&mut self, _rate: f32) -> voxcast::Result<()> {
        Ok(())
    }

    fn set_tempo(&mut self, _tempo: f32) -> voxcast::Result<()> {
        Ok(())
    }

    fn set_tremolo(&mut self, _depth: f32, _frequency: f32) -> voxcast::Result<()> {
        Ok(())
    }

    fn set_equalizer(&mut self, gains: &[f32]) -> voxcast::Result<()> {
        self.record.lock().equalizer = gains.to_vec();
        Ok(())
    }

    fn time(&self) -> Duration {
        self.record.lock().position
    }

    fn duration(&self) -> Option<Duration> {
        Some(Duration::from_secs(180))
    }

    fn frames_dropped(&self) -> u64 {
        0
    }

    fn total_frames(&self) -> u64 {
        0
    }

    fn set_secret_box(
        &mut self,
        _secret_key: &[u8; SECRET_KEY_LEN],
        mode: EncryptionMode,
        ssrc: u32,
    ) -> voxcast::Result<()> {
        self.require_external()?;
        self.record.lock().secret_box = Some((mode, ssrc));
        Ok(())
    }

    fn update_secret_box(&mut self, counters: SecretBoxCounters) -> voxcast::Result<()> {
        self.require_external()?;
        let mut record = self.record.lock();
        record.counters = counters;
        record.counter_updates.push(counters);
        Ok(())
    }

    fn secret_box(&self) -> voxcast::Result<SecretBoxCounters> {
        self.require_external()?;
        Ok(self.record.lock().counters)
    }

    fn pipe(&mut self, remote: Option<SocketAddr>) -> voxcast::Result<()> {
        self.require_external()?;
        self.record.lock().pipes.push(remote);
        Ok(())
    }
}

/// Handle on one engine the factory created
#[derive(Clone)]
pub struct EngineProbe {
    pub events: EngineEvents,
    pub record: Arc<Mutex<EngineRecord>>,
}

impl EngineProbe {
    pub fn emit(&self, event: EngineEvent) {
        assert!(self.events.emit(event), "player is gone");
    }
}

/// Factory handing out scripted engines
#[derive(Default)]
pub struct MockFactory {
    engines: Mutex<Vec<EngineProbe>>,
    pub fail: AtomicBool,
}

impl MockFactory {
    pub fn count(&self) -> usize {
        self.engines.lock().len()
    }

    pub fn engine(&self, index: usize) -> EngineProbe {
        self.engines.lock()[index].clone()
    }

    pub fn started(&self, index: usize) -> bool {
        self.engines
            .lock()
            .get(index)
            .is_some_and(|probe| probe.record.lock().started)
    }
}

impl EngineFactory for MockFactory {
    fn create(
        &self,
        options: EngineOptions,
        events: EngineEvents,
    ) -> voxcast::Result<Box<dyn DecodeEngine>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Internal("engine unavailable".to_string()));
        }
        let record = Arc::new(Mutex::new(EngineRecord::default()));
        self.engines.lock().push(EngineProbe {
            events,
            record: record.clone(),
        });
        Ok(Box::new(MockEngine {
            record,
            external: options.external_encryption,
        }))
    }
}

/// Stream source that answers only when the test says so
pub struct GatedSource {
    gate: Mutex<Option<oneshot::Receiver<voxcast::Result<StreamSet>>>>,
}

impl GatedSource {
    pub fn new() -> (Arc<Self>, oneshot::Sender<voxcast::Result<StreamSet>>) {
        let (open, gate) = oneshot::channel();
        (
            Arc::new(Self {
                gate: Mutex::new(Some(gate)),
            }),
            open,
        )
    }
}

impl StreamSource for GatedSource {
    fn fetch_streams(&self) -> BoxFuture<'static, voxcast::Result<StreamSet>> {
        let gate = self.gate.lock().take();
        async move {
            match gate {
                Some(gate) => gate
                    .await
                    .unwrap_or_else(|_| Err(Error::Network("gate dropped".to_string()))),
                None => Err(Error::Network("already fetched".to_string())),
            }
        }
        .boxed()
    }
}
