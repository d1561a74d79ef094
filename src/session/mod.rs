// ABOUTME: Session module for voice connections
// ABOUTME: Readiness state machine, transports, signalling contract and registry

mod connection;
mod registry;
mod status;
mod transport;

pub use connection::Session;
pub use registry::SessionRegistry;
pub use status::{DisconnectReason, SessionStatus};
pub use transport::{Signaller, UdpTransport, VoiceTransport};
