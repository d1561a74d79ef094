// ABOUTME: Voice session state machine for one remote peer
// ABOUTME: Readiness future, automatic reconnection, idempotent teardown

use crate::config::SessionConfig;
use crate::error::Error;
use crate::protocol::messages::{ConnectionData, SignalMessage};
use crate::session::registry::RegistryInner;
use crate::session::status::{DisconnectReason, SessionStatus};
use crate::session::transport::{Signaller, VoiceTransport};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;

/// Why a readiness wait failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadyFailure {
    Timeout,
    Destroyed,
    Disconnected,
}

impl From<ReadyFailure> for Error {
    fn from(failure: ReadyFailure) -> Self {
        match failure {
            ReadyFailure::Timeout => Error::Timeout("session did not become ready".to_string()),
            ReadyFailure::Destroyed => Error::SessionDestroyed,
            ReadyFailure::Disconnected => {
                Error::Network("session disconnected before becoming ready".to_string())
            }
        }
    }
}

type ReadyFuture = Shared<BoxFuture<'static, Result<(), ReadyFailure>>>;

/// Mutable session fields guarded by one lock
struct SessionState {
    connection_data: Option<ConnectionData>,
    speaking: bool,
    reconnect_attempts: u32,
    ready_waiter: Option<ReadyFuture>,
}

struct SessionInner {
    id: String,
    config: SessionConfig,
    transport: Arc<dyn VoiceTransport>,
    signaller: Arc<dyn Signaller>,
    status: watch::Sender<SessionStatus>,
    state: Mutex<SessionState>,
    destroyed: AtomicBool,
    registry: Mutex<Option<Weak<RegistryInner>>>,
}

/// A voice session with one remote peer
///
/// Cheap to clone; all clones observe the same state. The external
/// signalling layer drives transitions through the `mark_*` hooks, while
/// players observe them through [`Session::watch_status`].
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session in the Signalling state
    pub fn new(
        id: impl Into<String>,
        transport: Arc<dyn VoiceTransport>,
        signaller: Arc<dyn Signaller>,
        config: SessionConfig,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus::Signalling);
        Self {
            inner: Arc::new(SessionInner {
                id: id.into(),
                config,
                transport,
                signaller,
                status,
                state: Mutex::new(SessionState {
                    connection_data: None,
                    speaking: false,
                    reconnect_attempts: 0,
                    ready_waiter: None,
                }),
                destroyed: AtomicBool::new(false),
                registry: Mutex::new(None),
            }),
        }
    }

    /// Session identifier
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Current status
    pub fn status(&self) -> SessionStatus {
        *self.inner.status.borrow()
    }

    /// Whether packets may be sent
    pub fn is_ready(&self) -> bool {
        self.status() == SessionStatus::Ready
    }

    /// Subscribe to status changes
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    /// Negotiated connection parameters, once known
    pub fn connection_data(&self) -> Option<ConnectionData> {
        self.inner.state.lock().connection_data.clone()
    }

    /// Remote endpoint of the transport
    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.transport.remote_addr()
    }

    /// Whether two handles refer to the same session
    pub fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn attach_registry(&self, registry: Weak<RegistryInner>) {
        *self.inner.registry.lock() = Some(registry);
    }

    /// Store parameters negotiated by the handshake
    pub fn set_connection_data(&self, data: ConnectionData) {
        log::debug!(
            "Session {} negotiated mode '{}' ssrc {}",
            self.inner.id,
            data.mode,
            data.ssrc
        );
        self.inner.state.lock().connection_data = Some(data);
    }

    /// Handshake finished; the transport is connecting
    pub fn mark_connecting(&self) {
        self.transition(SessionStatus::Connecting);
    }

    /// Transport is connected and connection data is in place
    ///
    /// Wakes readiness waiters, announces the media sink preference and
    /// notifies status watchers so they can reset their encryption state.
    pub fn mark_ready(&self) -> crate::Result<()> {
        if self.inner.destroyed.load(Ordering::Acquire) {
            return Err(Error::SessionDestroyed);
        }

        {
            let mut state = self.inner.state.lock();
            if state.connection_data.is_none() {
                return Err(Error::Internal(format!(
                    "session {} became ready without connection data",
                    self.inner.id
                )));
            }
            state.reconnect_attempts = 0;
            state.speaking = false;
        }

        if !self.transition(SessionStatus::Ready) {
            return Err(Error::SessionDestroyed);
        }

        if let Err(e) = self.inner.signaller.send(&SignalMessage::media_sink_wants_all()) {
            log::warn!(
                "Session {} failed to announce media sink preference: {}",
                self.inner.id,
                e
            );
        }

        Ok(())
    }

    /// The connection dropped
    ///
    /// Recoverable reasons schedule a reconnect with linear backoff; an
    /// unavailable adapter destroys the session immediately.
    pub fn mark_disconnected(&self, reason: DisconnectReason) {
        if !self.transition(SessionStatus::Disconnected(reason)) {
            return;
        }
        self.inner.state.lock().speaking = false;

        match reason {
            DisconnectReason::AdapterUnavailable => {
                log::warn!("Session {} lost its adapter, destroying", self.inner.id);
                self.destroy();
            }
            DisconnectReason::Manual => {}
            DisconnectReason::TransportClosed => self.schedule_reconnect(),
        }
    }

    fn schedule_reconnect(&self) {
        let attempt = {
            let mut state = self.inner.state.lock();
            state.reconnect_attempts += 1;
            state.reconnect_attempts
        };

        if attempt > self.inner.config.max_reconnect_attempts {
            log::warn!(
                "Session {} exhausted {} reconnect attempts",
                self.inner.id,
                self.inner.config.max_reconnect_attempts
            );
            self.destroy();
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                log::warn!(
                    "Session {} cannot reconnect outside a runtime",
                    self.inner.id
                );
                self.destroy();
                return;
            }
        };

        let delay = self.inner.config.reconnect_backoff * attempt;
        log::info!(
            "Session {} reconnecting in {:?} (attempt {})",
            self.inner.id,
            delay,
            attempt
        );

        let weak = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            let Some(inner) = weak.upgrade() else {
                return;
            };
            let session = Session { inner };
            if session.status() != SessionStatus::Disconnected(DisconnectReason::TransportClosed) {
                return;
            }

            match session.inner.signaller.reconnect() {
                Ok(()) => {
                    session.transition(SessionStatus::Signalling);
                }
                Err(e) => {
                    log::warn!("Session {} reconnect failed: {}", session.inner.id, e);
                    session.destroy();
                }
            }
        });
    }

    /// Ask to join again after a manual disconnect
    pub fn rejoin(&self) -> crate::Result<()> {
        if self.inner.destroyed.load(Ordering::Acquire) {
            return Err(Error::SessionDestroyed);
        }
        self.inner.signaller.reconnect()?;
        self.inner.state.lock().reconnect_attempts = 0;
        self.transition(SessionStatus::Signalling);
        Ok(())
    }

    /// Leave the session without destroying it
    pub fn disconnect(&self) -> crate::Result<()> {
        if self.inner.destroyed.load(Ordering::Acquire) {
            return Err(Error::SessionDestroyed);
        }
        self.inner.signaller.disconnect()?;
        self.mark_disconnected(DisconnectReason::Manual);
        Ok(())
    }

    /// Wait until the session is ready
    ///
    /// Fails when the session is destroyed, disconnects for a reason that
    /// will not be retried, or stays unready past the configured timeout
    /// (which also destroys it). Concurrent callers share one wait.
    pub async fn await_ready(&self) -> crate::Result<()> {
        self.ready_waiter().await.map_err(Error::from)
    }

    fn ready_waiter(&self) -> ReadyFuture {
        let mut state = self.inner.state.lock();
        if let Some(waiter) = &state.ready_waiter {
            if waiter.peek().is_none() {
                return waiter.clone();
            }
        }

        let status = self.inner.status.subscribe();
        let timeout = self.inner.config.ready_timeout;
        let weak = Arc::downgrade(&self.inner);

        let waiter = async move {
            let result = match tokio::time::timeout(timeout, wait_for_ready(status)).await {
                Ok(result) => result,
                Err(_) => Err(ReadyFailure::Timeout),
            };

            if result == Err(ReadyFailure::Timeout) {
                if let Some(inner) = weak.upgrade() {
                    log::warn!("Session {} timed out waiting for ready", inner.id);
                    Session { inner }.destroy();
                }
            }
            result
        }
        .boxed()
        .shared();

        state.ready_waiter = Some(waiter.clone());
        waiter
    }

    /// Send one packet; refused unless ready
    pub fn send_packet(&self, packet: &[u8]) -> crate::Result<()> {
        if !self.is_ready() {
            return Err(Error::SessionNotReady);
        }
        self.inner.transport.send(packet)?;
        Ok(())
    }

    /// Tell the peer whether audio is flowing; repeated values are dropped
    pub fn set_speaking(&self, speaking: bool) -> crate::Result<()> {
        let ssrc = {
            let mut state = self.inner.state.lock();
            if state.speaking == speaking {
                return Ok(());
            }
            if speaking && !self.is_ready() {
                return Err(Error::SessionNotReady);
            }
            let ssrc = match &state.connection_data {
                Some(data) => data.ssrc,
                None => return Ok(()),
            };
            state.speaking = speaking;
            ssrc
        };

        self.inner
            .signaller
            .send(&SignalMessage::speaking(speaking, ssrc))
    }

    /// Whether the last speaking state sent was `true`
    pub fn is_speaking(&self) -> bool {
        self.inner.state.lock().speaking
    }

    /// Tear the session down
    ///
    /// Safe to call any number of times; the transport is closed and the
    /// registry entry removed only once.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner.status.send_replace(SessionStatus::Destroyed);
        self.inner.transport.close();

        let registry = self.inner.registry.lock().take();
        if let Some(registry) = registry.and_then(|weak| weak.upgrade()) {
            registry.remove(&self.inner.id, self);
        }

        log::info!("Session {} destroyed", self.inner.id);
    }

    /// Move to `next`; returns whether the status changed
    fn transition(&self, next: SessionStatus) -> bool {
        let mut previous = None;
        let changed = self.inner.status.send_if_modified(|current| {
            if *current == SessionStatus::Destroyed {
                return false;
            }
            if *current == next && next != SessionStatus::Ready {
                return false;
            }
            previous = Some(*current);
            *current = next;
            true
        });

        if let Some(previous) = previous {
            log::debug!(
                "Session {}: {} -> {}",
                self.inner.id,
                previous.as_str(),
                next.as_str()
            );
        }

        changed
    }
}

async fn wait_for_ready(mut status: watch::Receiver<SessionStatus>) -> Result<(), ReadyFailure> {
    loop {
        let current = *status.borrow_and_update();
        match current {
            SessionStatus::Ready => return Ok(()),
            SessionStatus::Destroyed => return Err(ReadyFailure::Destroyed),
            other if other.blocks_readiness() => return Err(ReadyFailure::Disconnected),
            _ => {}
        }
        if status.changed().await.is_err() {
            return Err(ReadyFailure::Destroyed);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::AtomicUsize;

    struct NullTransport {
        closes: AtomicUsize,
    }

    impl VoiceTransport for NullTransport {
        fn send(&self, packet: &[u8]) -> io::Result<usize> {
            Ok(packet.len())
        }

        fn remote_addr(&self) -> SocketAddr {
            "127.0.0.1:50000".parse().unwrap()
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingSignaller {
        sent: Mutex<Vec<SignalMessage>>,
    }

    impl Signaller for RecordingSignaller {
        fn send(&self, message: &SignalMessage) -> crate::Result<()> {
            self.sent.lock().push(message.clone());
            Ok(())
        }

        fn reconnect(&self) -> crate::Result<()> {
            Ok(())
        }
    }

    fn session() -> (Session, Arc<NullTransport>, Arc<RecordingSignaller>) {
        let transport = Arc::new(NullTransport {
            closes: AtomicUsize::new(0),
        });
        let signaller = Arc::new(RecordingSignaller::default());
        let session = Session::new(
            "peer",
            transport.clone(),
            signaller.clone(),
            SessionConfig::default(),
        );
        (session, transport, signaller)
    }

    #[test]
    fn test_ready_requires_connection_data() {
        let (session, _, _) = session();
        assert!(matches!(session.mark_ready(), Err(Error::Internal(_))));
        assert_eq!(session.status(), SessionStatus::Signalling);
    }

    #[test]
    fn test_ready_announces_media_sink() {
        let (session, _, signaller) = session();
        session.set_connection_data(ConnectionData::new("xchacha20_poly1305", [1; 32], 5));
        session.mark_connecting();
        session.mark_ready().unwrap();

        assert!(session.is_ready());
        assert_eq!(
            signaller.sent.lock().as_slice(),
            &[SignalMessage::media_sink_wants_all()]
        );
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let (session, transport, _) = session();
        session.destroy();
        session.destroy();
        session.clone().destroy();

        assert_eq!(session.status(), SessionStatus::Destroyed);
        assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
        assert!(matches!(session.mark_ready(), Err(Error::SessionDestroyed)));
    }

    #[test]
    fn test_destroyed_is_terminal() {
        let (session, _, _) = session();
        session.destroy();
        session.mark_connecting();
        session.mark_disconnected(DisconnectReason::TransportClosed);
        assert_eq!(session.status(), SessionStatus::Destroyed);
    }

    #[test]
    fn test_speaking_is_deduplicated() {
        let (session, _, signaller) = session();
        session.set_connection_data(ConnectionData::new("xchacha20_poly1305", [1; 32], 5));
        assert!(matches!(
            session.set_speaking(true),
            Err(Error::SessionNotReady)
        ));

        session.mark_ready().unwrap();
        session.set_speaking(true).unwrap();
        session.set_speaking(true).unwrap();
        session.set_speaking(false).unwrap();

        let sent = signaller.sent.lock();
        assert_eq!(
            sent.as_slice(),
            &[
                SignalMessage::media_sink_wants_all(),
                SignalMessage::speaking(true, 5),
                SignalMessage::speaking(false, 5),
            ]
        );
    }

    #[test]
    fn test_send_refused_until_ready() {
        let (session, _, _) = session();
        assert!(matches!(
            session.send_packet(&[1, 2, 3]),
            Err(Error::SessionNotReady)
        ));

        session.set_connection_data(ConnectionData::new("xchacha20_poly1305", [1; 32], 5));
        session.mark_ready().unwrap();
        assert!(session.send_packet(&[1, 2, 3]).is_ok());
    }
}
