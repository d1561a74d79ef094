// ABOUTME: Player module for packet dispatch
// ABOUTME: Actor, handle, tracks, stream selection, engines, keepalive and subscriptions

mod actor;
mod engine;
mod handle;
mod keepalive;
mod retry;
mod select;
mod subscription;
mod token;
mod tone;
mod track;

pub use actor::{Player, PlayerEvent};
pub use engine::{
    DecodeEngine, EngineControl, EngineEvent, EngineEvents, EngineFactory, EngineOptions,
    PlaybackStatus,
};
pub use handle::{PlayerHandle, Subscription};
pub use select::best_stream;
pub use token::PlayToken;
pub use tone::{ToneEngine, ToneEngineFactory};
pub use track::{StaticStreams, Stream, StreamSet, StreamSource, StreamUrl, Track, UrlResolver};
