// ABOUTME: Track and stream model supplied by the external resolver
// ABOUTME: Tracks cache their expirable stream set; streams may resolve URLs lazily

use futures_util::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Produces the stream set for a track
pub trait StreamSource: Send + Sync {
    /// Fetch the playable streams (may hit the network)
    fn fetch_streams(&self) -> BoxFuture<'static, crate::Result<StreamSet>>;
}

/// Resolves a stream URL on demand
pub trait UrlResolver: Send + Sync {
    /// Produce the playable URL
    fn resolve(&self) -> BoxFuture<'static, crate::Result<String>>;
}

/// Where a stream's media lives
#[derive(Clone)]
pub enum StreamUrl {
    /// Already known
    Direct(String),
    /// Must be resolved before playback
    Deferred(Arc<dyn UrlResolver>),
}

impl fmt::Debug for StreamUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamUrl::Direct(url) => f.debug_tuple("Direct").field(url).finish(),
            StreamUrl::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// One playable rendition of a track
#[derive(Clone, Debug)]
pub struct Stream {
    /// Media locator
    pub url: StreamUrl,
    /// Whether the locator is a local file path
    pub is_file: bool,
    /// Carries video
    pub video: bool,
    /// Carries audio
    pub audio: bool,
    /// Flagged as the default audio track by the source
    pub default_audio: bool,
    /// Codec name, e.g. "opus"
    pub codec: String,
    /// Bitrate in kbps, when known
    pub bitrate: Option<u32>,
    /// Media duration, when known
    pub duration: Option<Duration>,
    /// Loudness normalization gain attached at selection time
    pub volume: Option<f32>,
}

impl Stream {
    /// An audio stream with a known URL
    pub fn audio(url: impl Into<String>, codec: impl Into<String>, bitrate: Option<u32>) -> Self {
        Self {
            url: StreamUrl::Direct(url.into()),
            is_file: false,
            video: false,
            audio: true,
            default_audio: false,
            codec: codec.into(),
            bitrate,
            duration: None,
            volume: None,
        }
    }

    /// A video-only stream with a known URL
    pub fn video(url: impl Into<String>, bitrate: Option<u32>) -> Self {
        Self {
            url: StreamUrl::Direct(url.into()),
            is_file: false,
            video: true,
            audio: false,
            default_audio: false,
            codec: String::new(),
            bitrate,
            duration: None,
            volume: None,
        }
    }

    /// Mark as the source's default audio track
    pub fn default_audio(mut self) -> Self {
        self.default_audio = true;
        self
    }

    /// Mark the locator as a local file
    pub fn local_file(mut self) -> Self {
        self.is_file = true;
        self
    }

    /// Replace the locator with a deferred resolver
    pub fn deferred(mut self, resolver: Arc<dyn UrlResolver>) -> Self {
        self.url = StreamUrl::Deferred(resolver);
        self
    }

    /// Set the duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Whether the codec is opus
    pub fn is_opus(&self) -> bool {
        self.codec.eq_ignore_ascii_case("opus")
    }

    /// Produce the playable URL, resolving it if deferred
    pub fn resolve_url(&self) -> BoxFuture<'static, crate::Result<String>> {
        match &self.url {
            StreamUrl::Direct(url) => future::ready(Ok(url.clone())).boxed(),
            StreamUrl::Deferred(resolver) => resolver.resolve(),
        }
    }
}

/// Streams available for a track at one point in time
#[derive(Clone, Debug, Default)]
pub struct StreamSet {
    /// Candidate streams in source order
    pub streams: Vec<Stream>,
    /// Loudness normalization gain reported by the source
    pub volume: Option<f32>,
    /// When the URLs stop being valid
    pub expires_at: Option<Instant>,
}

impl StreamSet {
    /// A set that never expires
    pub fn new(streams: Vec<Stream>) -> Self {
        Self {
            streams,
            volume: None,
            expires_at: None,
        }
    }

    /// Attach a loudness normalization gain
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Expire `ttl` from now
    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires_at = Some(Instant::now() + ttl);
        self
    }

    /// Whether the set must be fetched again
    pub fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Stream source returning a fixed set
#[derive(Clone, Debug)]
pub struct StaticStreams(pub StreamSet);

impl StreamSource for StaticStreams {
    fn fetch_streams(&self) -> BoxFuture<'static, crate::Result<StreamSet>> {
        future::ready(Ok(self.0.clone())).boxed()
    }
}

/// A playable item owned by the caller
pub struct Track {
    /// Opaque identifier
    pub id: String,
    /// Display title
    pub title: String,
    /// Display author
    pub author: String,
    source: Arc<dyn StreamSource>,
    streams: Mutex<Option<Arc<StreamSet>>>,
}

impl Track {
    /// Create a track backed by a stream source
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        author: impl Into<String>,
        source: Arc<dyn StreamSource>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            author: author.into(),
            source,
            streams: Mutex::new(None),
        }
    }

    /// Create a track whose streams are known up front
    pub fn with_streams(
        id: impl Into<String>,
        title: impl Into<String>,
        author: impl Into<String>,
        streams: Vec<Stream>,
    ) -> Self {
        Self::new(
            id,
            title,
            author,
            Arc::new(StaticStreams(StreamSet::new(streams))),
        )
    }

    /// Fetch a fresh stream set from the source
    pub fn fetch_streams(&self) -> BoxFuture<'static, crate::Result<StreamSet>> {
        self.source.fetch_streams()
    }

    /// The cached stream set, unless it has expired
    pub fn cached_streams(&self) -> Option<Arc<StreamSet>> {
        self.streams
            .lock()
            .as_ref()
            .filter(|set| !set.expired())
            .cloned()
    }

    pub(crate) fn store_streams(&self, streams: Arc<StreamSet>) {
        *self.streams.lock() = Some(streams);
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("author", &self.author)
            .finish_non_exhaustive()
    }
}
