// ABOUTME: Cloneable handle for talking to a running player
// ABOUTME: Wraps the actor mailbox with typed request/response methods

use crate::error::Error;
use crate::player::actor::{PlayerCommand, PlayerEvent, PlayerMessage};
use crate::player::engine::{EngineControl, PlaybackStatus};
use crate::player::track::Track;
use crate::session::Session;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

/// Handle to a running [`Player`](crate::player::Player)
#[derive(Clone)]
pub struct PlayerHandle {
    id: Uuid,
    mailbox: mpsc::UnboundedSender<PlayerMessage>,
    events: broadcast::Sender<PlayerEvent>,
}

impl PlayerHandle {
    pub(crate) fn new(
        id: Uuid,
        mailbox: mpsc::UnboundedSender<PlayerMessage>,
        events: broadcast::Sender<PlayerEvent>,
    ) -> Self {
        Self {
            id,
            mailbox,
            events,
        }
    }

    /// Player identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Receive player events from now on
    pub fn events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    /// Whether the player task has exited
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    /// Start playing `track`, superseding whatever is playing
    ///
    /// Returns once the request is queued; progress and failures are
    /// reported as [`PlayerEvent`]s.
    pub fn play(&self, track: Arc<Track>) -> crate::Result<()> {
        self.send(PlayerCommand::Play(track))
    }

    /// Pause or resume
    pub async fn pause(&self, paused: bool) -> crate::Result<()> {
        self.control(EngineControl::Pause(paused)).await
    }

    /// Seek to `position`
    pub async fn seek(&self, position: Duration) -> crate::Result<()> {
        self.control(EngineControl::Seek(position)).await
    }

    /// Set the output volume, 1.0 is unity
    pub async fn set_volume(&self, volume: f32) -> crate::Result<()> {
        self.control(EngineControl::Volume(volume)).await
    }

    /// Set the encoder bitrate in bits per second
    pub async fn set_bitrate(&self, bitrate: u32) -> crate::Result<()> {
        self.control(EngineControl::Bitrate(bitrate)).await
    }

    /// Set the playback rate
    pub async fn set_rate(&self, rate: f32) -> crate::Result<()> {
        self.control(EngineControl::Rate(rate)).await
    }

    /// Set the playback tempo
    pub async fn set_tempo(&self, tempo: f32) -> crate::Result<()> {
        self.control(EngineControl::Tempo(tempo)).await
    }

    /// Apply a tremolo effect
    pub async fn set_tremolo(&self, depth: f32, frequency: f32) -> crate::Result<()> {
        self.control(EngineControl::Tremolo { depth, frequency }).await
    }

    /// Set equalizer band gains
    pub async fn set_equalizer(&self, gains: Vec<f32>) -> crate::Result<()> {
        self.control(EngineControl::Equalizer(gains)).await
    }

    /// Apply any control request
    pub async fn control(&self, control: EngineControl) -> crate::Result<()> {
        self.request(|respond_to| PlayerCommand::Control {
            control,
            respond_to,
        })
        .await?
    }

    /// Current playback position and engine counters
    pub async fn status(&self) -> crate::Result<PlaybackStatus> {
        self.request(|respond_to| PlayerCommand::Status { respond_to })
            .await?
    }

    /// Start sending frames to `session`
    pub async fn subscribe(&self, session: &Session) -> crate::Result<Subscription> {
        let session_id = session.id().to_string();
        let session = session.clone();
        self.request(|respond_to| PlayerCommand::Subscribe {
            session,
            respond_to,
        })
        .await??;

        Ok(Subscription {
            player: self.clone(),
            session_id,
        })
    }

    /// Stop sending frames to the session with `session_id`
    pub async fn unsubscribe(&self, session_id: &str) -> crate::Result<()> {
        let session_id = session_id.to_string();
        self.request(|respond_to| PlayerCommand::Unsubscribe {
            session_id,
            respond_to,
        })
        .await?
    }

    /// Ids of the subscribed sessions in subscription order
    pub async fn subscriptions(&self) -> crate::Result<Vec<String>> {
        self.request(|respond_to| PlayerCommand::Subscriptions { respond_to })
            .await
    }

    /// Stop playback and release the engine; subscriptions stay
    pub async fn stop(&self) -> crate::Result<()> {
        self.request(|respond_to| PlayerCommand::Stop { respond_to })
            .await
    }

    /// Ask the player task to exit
    pub fn shutdown(&self) {
        let _ = self.send(PlayerCommand::Shutdown);
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> PlayerCommand,
    ) -> crate::Result<T> {
        let (respond_to, response) = oneshot::channel();
        self.send(command(respond_to))?;
        response.await.map_err(|_| Error::PlayerClosed)
    }

    fn send(&self, command: PlayerCommand) -> crate::Result<()> {
        self.mailbox
            .send(PlayerMessage::Command(command))
            .map_err(|_| Error::PlayerClosed)
    }
}

impl std::fmt::Debug for PlayerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A session's registration with a player
///
/// Dropping it keeps the session subscribed; call
/// [`Subscription::unsubscribe`] or destroy the session to end it.
#[derive(Debug, Clone)]
pub struct Subscription {
    player: PlayerHandle,
    session_id: String,
}

impl Subscription {
    /// The subscribed session's id
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The player frames come from
    pub fn player(&self) -> &PlayerHandle {
        &self.player
    }

    /// Stop receiving frames
    pub async fn unsubscribe(self) -> crate::Result<()> {
        self.player.unsubscribe(&self.session_id).await
    }
}
