// ABOUTME: Player actor owning the decode engine and subscribed sessions
// ABOUTME: Serializes commands, engine events and session status changes on one task

use crate::config::{PlayerConfig, FRAME_SIZE};
use crate::error::Error;
use crate::player::engine::{
    DecodeEngine, EngineControl, EngineEvent, EngineEvents, EngineFactory, EngineOptions,
    PlaybackStatus,
};
use crate::player::handle::PlayerHandle;
use crate::player::keepalive::Keepalive;
use crate::player::retry::ErrorBackoff;
use crate::player::select::best_stream;
use crate::player::subscription::SessionLink;
use crate::player::token::{PlayToken, PlayTokenCell};
use crate::player::track::{Stream, Track};
use crate::protocol::packet::SILENCE_FRAME;
use crate::session::{Session, SessionStatus};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

/// Capacity of the player event channel
const EVENT_CAPACITY: usize = 256;

/// Something observable that happened during playback
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// The engine is about to produce frames
    Ready,
    /// A frame was dispatched to the subscribed sessions
    Packet {
        /// Frame payload before encryption
        frame: Bytes,
        /// Samples per channel covered by the frame
        frame_size: u32,
    },
    /// The track played to the end
    Finish,
    /// Playback failed
    Error {
        /// What went wrong
        error: Arc<Error>,
        /// Whether playback was abandoned
        fatal: bool,
    },
    /// Diagnostic text
    Debug(String),
}

pub(crate) enum PlayerMessage {
    Command(PlayerCommand),
    Engine {
        generation: u64,
        event: EngineEvent,
    },
    StreamsLoaded {
        token: PlayToken,
        result: crate::Result<ResolvedStream>,
    },
    SessionStatus {
        link: u64,
        status: SessionStatus,
    },
}

pub(crate) enum PlayerCommand {
    Play(Arc<Track>),
    Control {
        control: EngineControl,
        respond_to: oneshot::Sender<crate::Result<()>>,
    },
    Status {
        respond_to: oneshot::Sender<crate::Result<PlaybackStatus>>,
    },
    Subscribe {
        session: Session,
        respond_to: oneshot::Sender<crate::Result<()>>,
    },
    Unsubscribe {
        session_id: String,
        respond_to: oneshot::Sender<crate::Result<()>>,
    },
    Subscriptions {
        respond_to: oneshot::Sender<Vec<String>>,
    },
    Stop {
        respond_to: oneshot::Sender<()>,
    },
    Shutdown,
}

pub(crate) struct ResolvedStream {
    stream: Stream,
    url: String,
}

/// Plays tracks through a decode engine and dispatches the frames
///
/// The player runs as its own task; interact with it through the
/// [`PlayerHandle`] returned by [`Player::spawn`].
pub struct Player {
    id: Uuid,
    config: PlayerConfig,
    factory: Arc<dyn EngineFactory>,
    mailbox: mpsc::WeakUnboundedSender<PlayerMessage>,
    inbox: mpsc::UnboundedReceiver<PlayerMessage>,
    events: broadcast::Sender<PlayerEvent>,
    engine: Option<Box<dyn DecodeEngine>>,
    generation: u64,
    token: PlayTokenCell,
    track: Option<Arc<Track>>,
    stream: Option<ResolvedStream>,
    loading: bool,
    volume: f32,
    paused: bool,
    backoff: ErrorBackoff,
    keepalive: Keepalive,
    links: Vec<SessionLink>,
    next_link: u64,
}

impl Player {
    /// Start a player task and return its handle
    ///
    /// Must be called within a tokio runtime. The task exits when every
    /// handle is dropped or [`PlayerHandle::shutdown`] is called.
    pub fn spawn(config: PlayerConfig, factory: Arc<dyn EngineFactory>) -> PlayerHandle {
        let (mailbox, inbox) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let id = Uuid::new_v4();

        let player = Player {
            id,
            backoff: ErrorBackoff::new(config.retry_window),
            keepalive: Keepalive::new(config.keepalive_frames, config.keepalive_interval),
            config,
            factory,
            mailbox: mailbox.downgrade(),
            inbox,
            events: events.clone(),
            engine: None,
            generation: 0,
            token: PlayTokenCell::default(),
            track: None,
            stream: None,
            loading: false,
            volume: 1.0,
            paused: false,
            links: Vec::new(),
            next_link: 0,
        };

        tokio::spawn(player.run());
        PlayerHandle::new(id, mailbox, events)
    }

    async fn run(mut self) {
        log::info!("Player {} started", self.id);

        loop {
            tokio::select! {
                message = self.inbox.recv() => match message {
                    Some(PlayerMessage::Command(PlayerCommand::Shutdown)) | None => break,
                    Some(message) => self.handle(message),
                },
                _ = self.keepalive.tick(), if self.keepalive.is_armed() => {
                    self.send_keepalive_frame();
                }
            }
        }

        self.keepalive.cancel();
        self.destroy_engine();
        for link in &self.links {
            link.stop_speaking();
        }
        self.links.clear();
        log::info!("Player {} stopped", self.id);
    }

    fn handle(&mut self, message: PlayerMessage) {
        match message {
            PlayerMessage::Command(command) => self.handle_command(command),
            PlayerMessage::Engine { generation, event } => {
                if generation != self.generation || self.engine.is_none() {
                    log::trace!(
                        "Player {} dropped event from stale engine {}",
                        self.id,
                        generation
                    );
                    return;
                }
                self.handle_engine_event(event);
            }
            PlayerMessage::StreamsLoaded { token, result } => self.on_streams_loaded(token, result),
            PlayerMessage::SessionStatus { link, status } => self.on_session_status(link, status),
        }
    }

    fn handle_command(&mut self, command: PlayerCommand) {
        match command {
            PlayerCommand::Play(track) => self.play(track),
            PlayerCommand::Control {
                control,
                respond_to,
            } => {
                let _ = respond_to.send(self.control(control));
            }
            PlayerCommand::Status { respond_to } => {
                let _ = respond_to.send(self.playback_status());
            }
            PlayerCommand::Subscribe {
                session,
                respond_to,
            } => {
                let _ = respond_to.send(self.subscribe(session));
            }
            PlayerCommand::Unsubscribe {
                session_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.unsubscribe(&session_id));
            }
            PlayerCommand::Subscriptions { respond_to } => {
                let ids = self
                    .links
                    .iter()
                    .map(|link| link.session().id().to_string())
                    .collect();
                let _ = respond_to.send(ids);
            }
            PlayerCommand::Stop { respond_to } => {
                self.stop();
                let _ = respond_to.send(());
            }
            PlayerCommand::Shutdown => {}
        }
    }

    fn play(&mut self, track: Arc<Track>) {
        let token = self.token.advance();
        log::info!(
            "Player {} playing '{}' ({})",
            self.id,
            track.title,
            track.id
        );

        self.backoff.reset();
        self.stream = None;
        self.track = Some(track.clone());

        if let Err(e) = self.create_engine() {
            self.fail(e);
            return;
        }
        self.spawn_load(token, track);
    }

    /// Replace the engine with a fresh one; events from the old one go stale
    fn create_engine(&mut self) -> crate::Result<()> {
        if self.config.external_encryption {
            self.retire_external_counters();
        }
        self.destroy_engine();
        self.generation += 1;

        let events = EngineEvents::new(self.generation, self.mailbox.clone());
        let options = EngineOptions {
            external_encryption: self.config.external_encryption,
        };
        let mut engine = self.factory.create(options, events)?;
        engine.set_output(
            self.config.channels,
            self.config.sample_rate,
            self.config.bitrate,
        )?;

        self.engine = Some(engine);
        self.paused = false;

        if self.config.external_encryption {
            self.sync_external_encryption();
        }
        Ok(())
    }

    fn destroy_engine(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.stop();
        }
    }

    fn spawn_load(&mut self, token: PlayToken, track: Arc<Track>) {
        self.loading = true;
        let mailbox = self.mailbox.clone();
        let tokens = self.token.clone();

        tokio::spawn(async move {
            let Some(result) = load_stream(&track, token, &tokens).await else {
                log::debug!("Discarding superseded load of '{}'", track.id);
                return;
            };
            if let Some(mailbox) = mailbox.upgrade() {
                let _ = mailbox.send(PlayerMessage::StreamsLoaded { token, result });
            }
        });
    }

    fn on_streams_loaded(&mut self, token: PlayToken, result: crate::Result<ResolvedStream>) {
        if !self.token.is_current(token) {
            log::debug!("Player {} ignoring streams for superseded play", self.id);
            return;
        }
        self.loading = false;

        match result {
            Ok(resolved) => {
                log::debug!(
                    "Player {} selected {} stream at {:?} kbps",
                    self.id,
                    if resolved.stream.codec.is_empty() {
                        "video"
                    } else {
                        resolved.stream.codec.as_str()
                    },
                    resolved.stream.bitrate
                );
                self.stream = Some(resolved);
                if let Err(e) = self.start_engine() {
                    self.fail(e);
                }
            }
            Err(e) => self.fail(e),
        }
    }

    fn start_engine(&mut self) -> crate::Result<()> {
        let resolved = self
            .stream
            .as_ref()
            .ok_or_else(|| Error::Internal("no stream resolved".to_string()))?;
        let engine = self.engine.as_mut().ok_or(Error::NotPlaying)?;

        if self.config.normalize_volume {
            if let Some(hint) = resolved.stream.volume {
                engine.set_volume(self.volume * hint)?;
            }
        }
        engine.set_url(&resolved.url, resolved.stream.is_file)?;
        engine.start()
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Ready => self.emit(PlayerEvent::Ready),
            EngineEvent::Packet {
                frame,
                length,
                frame_size,
            } => self.dispatch_frame(frame, length, frame_size),
            EngineEvent::Finish => {
                log::debug!("Player {} finished track", self.id);
                self.arm_keepalive();
                self.emit(PlayerEvent::Finish);
            }
            EngineEvent::Error {
                message,
                code,
                retryable,
            } => self.on_engine_error(message, code, retryable),
            EngineEvent::Debug(message) => {
                log::debug!("Player {} engine: {}", self.id, message);
                self.emit(PlayerEvent::Debug(message));
            }
        }
    }

    fn dispatch_frame(&mut self, mut frame: Bytes, length: usize, frame_size: u32) {
        self.keepalive.cancel();
        if frame.len() > length {
            frame.truncate(length);
        }

        if self.config.external_encryption {
            for link in &self.links {
                link.start_speaking();
            }
        } else {
            for link in &mut self.links {
                match link.send(&frame, frame_size) {
                    Ok(true) => link.start_speaking(),
                    Ok(false) => {}
                    Err(e) => log::warn!(
                        "Player {} failed to send frame to session {}: {}",
                        self.id,
                        link.session().id(),
                        e
                    ),
                }
            }
        }

        self.emit(PlayerEvent::Packet { frame, frame_size });
    }

    fn on_engine_error(&mut self, message: String, code: i32, retryable: bool) {
        let error = Error::generic(
            format!("playback failed: {message}"),
            format!("engine error {code}: {message}"),
        );

        if !self.backoff.should_retry(Instant::now(), retryable) {
            log::warn!("Player {} giving up after error: {}", self.id, message);
            self.fail(error);
            return;
        }

        log::info!("Player {} retrying after error: {}", self.id, message);
        self.emit(PlayerEvent::Error {
            error: Arc::new(error),
            fatal: false,
        });
        self.restart();
    }

    /// Recreate the engine and resume from where the old one stopped
    fn restart(&mut self) {
        let position = self
            .engine
            .as_ref()
            .map(|engine| engine.time())
            .unwrap_or_default();

        if let Err(e) = self.create_engine() {
            self.fail(e);
            return;
        }

        if self.stream.is_none() {
            if !self.loading {
                if let Some(track) = self.track.clone() {
                    let token = self.token.current();
                    self.spawn_load(token, track);
                }
            }
            return;
        }

        let resumed = match self.engine.as_mut() {
            Some(engine) => engine.seek(position),
            None => Err(Error::NotPlaying),
        }
        .and_then(|_| self.start_engine());

        if let Err(e) = resumed {
            self.fail(e);
        }
    }

    /// Abandon playback after an unrecoverable error
    fn fail(&mut self, error: Error) {
        log::error!("Player {} failed: {}", self.id, error);
        self.token.advance();
        self.keepalive.cancel();
        self.destroy_engine();
        self.stream = None;
        self.loading = false;
        for link in &self.links {
            link.stop_speaking();
        }
        self.emit(PlayerEvent::Error {
            error: Arc::new(error),
            fatal: true,
        });
    }

    fn control(&mut self, control: EngineControl) -> crate::Result<()> {
        control.validate()?;
        if self.engine.is_none() {
            return Err(Error::NotPlaying);
        }

        let volume_gain = match &self.stream {
            Some(resolved) if self.config.normalize_volume => resolved.stream.volume,
            _ => None,
        };
        if control.interrupts_audio() {
            self.arm_keepalive();
        }

        let engine = self.engine.as_mut().ok_or(Error::NotPlaying)?;
        match &control {
            EngineControl::Pause(paused) => engine.pause(*paused)?,
            EngineControl::Seek(position) => engine.seek(*position)?,
            EngineControl::Volume(volume) => {
                engine.set_volume(volume * volume_gain.unwrap_or(1.0))?
            }
            EngineControl::Bitrate(bitrate) => engine.set_bitrate(*bitrate)?,
            EngineControl::Rate(rate) => engine.set_rate(*rate)?,
            EngineControl::Tempo(tempo) => engine.set_tempo(*tempo)?,
            EngineControl::Tremolo { depth, frequency } => {
                engine.set_tremolo(*depth, *frequency)?
            }
            EngineControl::Equalizer(gains) => engine.set_equalizer(gains)?,
        }

        match control {
            EngineControl::Pause(paused) => self.paused = paused,
            EngineControl::Volume(volume) => self.volume = volume,
            _ => {}
        }
        Ok(())
    }

    fn playback_status(&self) -> crate::Result<PlaybackStatus> {
        let engine = self.engine.as_ref().ok_or(Error::NotPlaying)?;
        Ok(PlaybackStatus {
            position: engine.time(),
            duration: engine.duration(),
            frames_dropped: engine.frames_dropped(),
            total_frames: engine.total_frames(),
            paused: self.paused,
            volume: self.volume,
        })
    }

    fn subscribe(&mut self, session: Session) -> crate::Result<()> {
        if self.links.iter().any(|link| link.session().ptr_eq(&session)) {
            return Ok(());
        }
        if session.status() == SessionStatus::Destroyed {
            return Err(Error::SessionDestroyed);
        }
        if self.config.external_encryption && !self.links.is_empty() {
            return Err(Error::Unsupported(
                "external encryption supports a single session".to_string(),
            ));
        }

        self.next_link += 1;
        log::info!("Player {} subscribed session {}", self.id, session.id());
        let link = SessionLink::spawn(self.next_link, session, self.mailbox.clone());
        self.links.push(link);
        Ok(())
    }

    fn unsubscribe(&mut self, session_id: &str) -> crate::Result<()> {
        let index = self
            .links
            .iter()
            .position(|link| link.session().id() == session_id)
            .ok_or_else(|| {
                Error::InvalidArgument(format!("session {session_id} is not subscribed"))
            })?;
        self.remove_link(index);
        Ok(())
    }

    fn remove_link(&mut self, index: usize) {
        let link = self.links.remove(index);
        link.stop_speaking();
        log::info!(
            "Player {} unsubscribed session {}",
            self.id,
            link.session().id()
        );

        if self.config.external_encryption {
            if let Some(engine) = self.engine.as_mut() {
                if let Err(e) = engine.pipe(None) {
                    log::debug!("Player {} failed to detach engine: {}", self.id, e);
                }
            }
        }

        if self.links.is_empty() {
            log::debug!("Player {} has no sessions left, releasing engine", self.id);
            self.release();
        }
    }

    /// Drop the engine and forget the current track
    fn release(&mut self) {
        self.token.advance();
        self.keepalive.cancel();
        self.destroy_engine();
        self.track = None;
        self.stream = None;
        self.loading = false;
    }

    fn stop(&mut self) {
        self.release();
        for link in &self.links {
            link.stop_speaking();
        }
        log::info!("Player {} stopped playback", self.id);
    }

    fn on_session_status(&mut self, link_id: u64, status: SessionStatus) {
        let Some(index) = self.links.iter().position(|link| link.id() == link_id) else {
            return;
        };

        match status {
            SessionStatus::Ready => {
                if let Err(e) = self.links[index].reset_encryption() {
                    log::warn!("Player {}: {}", self.id, e);
                    return;
                }
                if self.config.external_encryption {
                    self.sync_external_encryption();
                }
            }
            SessionStatus::Destroyed => self.remove_link(index),
            _ => {
                self.links[index].clear_encryption();
                if self.config.external_encryption {
                    if let Some(engine) = self.engine.as_mut() {
                        if let Err(e) = engine.pipe(None) {
                            log::debug!("Player {} failed to detach engine: {}", self.id, e);
                        }
                    }
                }
            }
        }
    }

    /// Carry the outgoing engine's counters into the codec so its successor
    /// continues the sequence instead of rewinding it
    fn retire_external_counters(&mut self) {
        let (Some(engine), Some(link)) = (self.engine.as_ref(), self.links.first_mut()) else {
            return;
        };
        if link.codec().is_none() {
            return;
        }
        if let Err(e) = link.pull_engine_counters(&**engine) {
            log::warn!(
                "Player {} could not read counters for session {}: {}",
                self.id,
                link.session().id(),
                e
            );
        }
    }

    /// Hand the session key, counters and endpoint to an encrypting engine
    fn sync_external_encryption(&mut self) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let Some(link) = self.links.first() else {
            return;
        };
        let Some(codec) = link.codec() else {
            return;
        };

        let state = codec.state();
        let result = engine
            .set_secret_box(state.secret_key(), state.mode, state.ssrc)
            .and_then(|_| engine.update_secret_box(state.counters()))
            .and_then(|_| engine.pipe(Some(link.session().remote_addr())));

        if let Err(e) = result {
            log::warn!(
                "Player {} could not hand session {} to the engine: {}",
                self.id,
                link.session().id(),
                e
            );
        }
    }

    fn arm_keepalive(&mut self) {
        self.keepalive.arm();
        for link in &mut self.links {
            link.keepalive_aborted = false;
        }
    }

    fn send_keepalive_frame(&mut self) {
        let last = self.keepalive.consume();

        for link in &mut self.links {
            if link.keepalive_aborted {
                continue;
            }
            let result = if self.config.external_encryption {
                match self.engine.as_mut() {
                    Some(engine) => link.send_engine_silence(engine.as_mut()),
                    None => Err(Error::NotPlaying),
                }
            } else {
                link.send(&SILENCE_FRAME, FRAME_SIZE).map(|_| ())
            };

            if let Err(e) = result {
                log::warn!(
                    "Player {} stopped keepalive for session {}: {}",
                    self.id,
                    link.session().id(),
                    e
                );
                link.keepalive_aborted = true;
            }
        }

        if last {
            for link in &self.links {
                link.stop_speaking();
            }
        }
    }

    fn emit(&self, event: PlayerEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

/// Fetch (or reuse) the track's streams, pick one and resolve its URL
///
/// Returns `None` when a newer play request superseded `token` while the
/// fetch was in flight.
async fn load_stream(
    track: &Track,
    token: PlayToken,
    tokens: &PlayTokenCell,
) -> Option<crate::Result<ResolvedStream>> {
    let streams = match track.cached_streams() {
        Some(streams) => streams,
        None => {
            let fetched = track.fetch_streams().await;
            if !tokens.is_current(token) {
                return None;
            }
            match fetched {
                Ok(set) => {
                    let set = Arc::new(set);
                    track.store_streams(set.clone());
                    set
                }
                Err(e) => return Some(Err(e)),
            }
        }
    };

    let Some(stream) = best_stream(&streams) else {
        return Some(Err(Error::Unplayable(format!(
            "no playable stream for track {}",
            track.id
        ))));
    };

    let url = stream.resolve_url().await;
    if !tokens.is_current(token) {
        return None;
    }
    Some(url.map(|url| ResolvedStream { stream, url }))
}
