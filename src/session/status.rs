// ABOUTME: Session status values and disconnect reasons
// ABOUTME: Decides which disconnects trigger automatic reconnection

/// Why a session left the Ready state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The transport closed underneath us; reconnect automatically
    TransportClosed,
    /// The user asked to leave; stay disconnected until rejoined
    Manual,
    /// The signalling adapter is gone; nothing can bring the session back
    AdapterUnavailable,
}

impl DisconnectReason {
    /// Whether the session should try to reconnect on its own
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DisconnectReason::TransportClosed)
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Waiting for the signalling handshake
    Signalling,
    /// Handshake done, transport connecting
    Connecting,
    /// Packets may be sent
    Ready,
    /// Connection lost
    Disconnected(DisconnectReason),
    /// Terminal state
    Destroyed,
}

impl SessionStatus {
    /// Convert to a short label for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Signalling => "signalling",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Ready => "ready",
            SessionStatus::Disconnected(_) => "disconnected",
            SessionStatus::Destroyed => "destroyed",
        }
    }

    /// Whether a pending readiness wait should fail in this state
    pub fn blocks_readiness(&self) -> bool {
        match self {
            SessionStatus::Destroyed => true,
            SessionStatus::Disconnected(reason) => !reason.is_recoverable(),
            _ => false,
        }
    }
}
