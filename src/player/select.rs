// ABOUTME: Best-stream selection for a track's stream set
// ABOUTME: Opus beats other audio codecs, which beat video-only renditions

use crate::player::track::{Stream, StreamSet};

/// Pick the stream to play from `set`
///
/// Audio-capable streams are preferred (the source's default audio track
/// first), then the codec partition {opus, other audio, video} decides, and
/// within it the highest bitrate wins with ties going to the earliest entry.
/// When nothing carries audio, every stream is considered so video-only
/// sources still play. The set's loudness hint is attached to the result.
pub fn best_stream(set: &StreamSet) -> Option<Stream> {
    let audio: Vec<&Stream> = set.streams.iter().filter(|s| s.audio).collect();

    let candidates: Vec<&Stream> = if audio.is_empty() {
        set.streams.iter().collect()
    } else {
        let defaults: Vec<&Stream> = audio.iter().copied().filter(|s| s.default_audio).collect();
        if defaults.is_empty() {
            audio
        } else {
            defaults
        }
    };

    let opus = candidates.iter().copied().filter(|s| s.audio && s.is_opus());
    let other_audio = candidates.iter().copied().filter(|s| s.audio && !s.is_opus());
    let video = candidates.iter().copied().filter(|s| !s.audio && s.video);

    let mut selected = highest_bitrate(opus)
        .or_else(|| highest_bitrate(other_audio))
        .or_else(|| highest_bitrate(video))?
        .clone();

    if let Some(volume) = set.volume {
        selected.volume = Some(volume);
    }

    Some(selected)
}

/// Maximum bitrate, first entry wins ties
fn highest_bitrate<'a>(streams: impl Iterator<Item = &'a Stream>) -> Option<&'a Stream> {
    let mut best: Option<&Stream> = None;
    for stream in streams {
        let better = match best {
            None => true,
            Some(current) => stream.bitrate.unwrap_or(0) > current.bitrate.unwrap_or(0),
        };
        if better {
            best = Some(stream);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::track::StreamUrl;

    fn url(stream: &Stream) -> &str {
        match &stream.url {
            StreamUrl::Direct(url) => url,
            StreamUrl::Deferred(_) => "",
        }
    }

    #[test]
    fn test_opus_beats_higher_bitrate() {
        let set = StreamSet::new(vec![
            Stream::audio("opus", "opus", Some(96)),
            Stream::audio("aac", "aac", Some(128)),
        ]);
        assert_eq!(url(&best_stream(&set).unwrap()), "opus");
    }

    #[test]
    fn test_video_only_fallback() {
        let set = StreamSet::new(vec![Stream::video("video", Some(720))]);
        let selected = best_stream(&set).unwrap();
        assert_eq!(url(&selected), "video");
        assert!(selected.video);
    }

    #[test]
    fn test_default_audio_preferred() {
        let set = StreamSet::new(vec![
            Stream::audio("dubbed", "opus", Some(160)),
            Stream::audio("original", "aac", Some(64)).default_audio(),
        ]);
        assert_eq!(url(&best_stream(&set).unwrap()), "original");
    }

    #[test]
    fn test_ties_keep_source_order() {
        let set = StreamSet::new(vec![
            Stream::audio("first", "opus", None),
            Stream::audio("second", "opus", Some(0)),
            Stream::audio("third", "opus", None),
        ]);
        assert_eq!(url(&best_stream(&set).unwrap()), "first");
    }

    #[test]
    fn test_audio_preferred_over_video() {
        let set = StreamSet::new(vec![
            Stream::video("video", Some(4000)),
            Stream::audio("mp3", "mp3", Some(128)),
        ]);
        assert_eq!(url(&best_stream(&set).unwrap()), "mp3");
    }

    #[test]
    fn test_volume_hint_attached() {
        let set = StreamSet::new(vec![Stream::audio("a", "opus", Some(128))]).with_volume(0.6);
        assert_eq!(best_stream(&set).unwrap().volume, Some(0.6));
    }

    #[test]
    fn test_empty_set() {
        assert!(best_stream(&StreamSet::default()).is_none());
    }
}
