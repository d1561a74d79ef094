// ABOUTME: Binding between a player and one subscribed session
// ABOUTME: Owns the session's packet codec and forwards its status changes to the player

use crate::config::FRAME_SIZE;
use crate::error::Error;
use crate::player::actor::PlayerMessage;
use crate::player::engine::DecodeEngine;
use crate::protocol::encryption::EncryptionState;
use crate::protocol::packet::{PacketCodec, SILENCE_FRAME};
use crate::session::{Session, SessionStatus};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub(crate) struct SessionLink {
    id: u64,
    session: Session,
    codec: Option<PacketCodec>,
    listener: JoinHandle<()>,
    pub(crate) keepalive_aborted: bool,
}

impl SessionLink {
    /// Bind `session` and start forwarding its status changes
    ///
    /// The current status is delivered first so a session that is already
    /// ready gets its encryption state without waiting for a transition.
    pub(crate) fn spawn(
        id: u64,
        session: Session,
        mailbox: mpsc::WeakUnboundedSender<PlayerMessage>,
    ) -> Self {
        let mut status = session.watch_status();
        let listener = tokio::spawn(async move {
            loop {
                let current = *status.borrow_and_update();
                let delivered = mailbox.upgrade().is_some_and(|mailbox| {
                    mailbox
                        .send(PlayerMessage::SessionStatus {
                            link: id,
                            status: current,
                        })
                        .is_ok()
                });
                if !delivered || current == SessionStatus::Destroyed {
                    break;
                }
                if status.changed().await.is_err() {
                    break;
                }
            }
        });

        Self {
            id,
            session,
            codec: None,
            listener,
            keepalive_aborted: false,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn session(&self) -> &Session {
        &self.session
    }

    pub(crate) fn codec(&self) -> Option<&PacketCodec> {
        self.codec.as_ref()
    }

    /// Start over from the session's negotiated parameters
    pub(crate) fn reset_encryption(&mut self) -> crate::Result<()> {
        let data = self.session.connection_data().ok_or_else(|| {
            Error::Internal(format!(
                "session {} is ready without connection data",
                self.session.id()
            ))
        })?;
        self.codec = Some(PacketCodec::new(EncryptionState::from_connection_data(&data)));
        Ok(())
    }

    pub(crate) fn clear_encryption(&mut self) {
        self.codec = None;
    }

    /// Encrypt and send one frame; returns whether anything was sent
    pub(crate) fn send(&mut self, payload: &[u8], frame_size: u32) -> crate::Result<bool> {
        if !self.session.is_ready() {
            return Ok(false);
        }
        let codec = match self.codec.as_mut() {
            Some(codec) if codec.can_send() => codec,
            _ => return Ok(false),
        };
        let packet = codec.encode(payload, frame_size)?;
        self.session.send_packet(packet)?;
        Ok(true)
    }

    /// Send one silence frame using the engine's counters
    ///
    /// Counters are pulled from the engine before encoding and pushed back
    /// afterwards so the engine continues where the silence left off.
    pub(crate) fn send_engine_silence(
        &mut self,
        engine: &mut dyn DecodeEngine,
    ) -> crate::Result<()> {
        if !self.session.is_ready() {
            return Err(Error::SessionNotReady);
        }
        let codec = self.codec.as_mut().ok_or(Error::SessionNotReady)?;
        codec.state_mut().set_counters(engine.secret_box()?);

        let packet = codec.encode(&SILENCE_FRAME, FRAME_SIZE)?;
        self.session.send_packet(packet)?;

        engine.update_secret_box(codec.state().counters())
    }

    /// Adopt the counters an engine reached before it is replaced
    pub(crate) fn pull_engine_counters(&mut self, engine: &dyn DecodeEngine) -> crate::Result<()> {
        let codec = self.codec.as_mut().ok_or(Error::SessionNotReady)?;
        codec.state_mut().set_counters(engine.secret_box()?);
        Ok(())
    }

    /// Mark the session as speaking if it can carry audio
    pub(crate) fn start_speaking(&self) {
        if !self.session.is_ready() {
            return;
        }
        if let Err(e) = self.session.set_speaking(true) {
            log::debug!("Session {} speaking update failed: {}", self.session.id(), e);
        }
    }

    pub(crate) fn stop_speaking(&self) {
        if let Err(e) = self.session.set_speaking(false) {
            log::debug!("Session {} speaking update failed: {}", self.session.id(), e);
        }
    }
}

impl Drop for SessionLink {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
