// ABOUTME: Test tone decode engine
// ABOUTME: Emits 20ms sine wave PCM frames on a timer until its duration elapses

use crate::error::Error;
use crate::player::engine::{DecodeEngine, EngineEvent, EngineEvents, EngineFactory, EngineOptions};
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Frame period of the tone engine
const FRAME_PERIOD: Duration = Duration::from_millis(20);

/// Creates [`ToneEngine`]s
#[derive(Debug, Clone)]
pub struct ToneEngineFactory {
    frequency: f64,
    duration: Duration,
}

impl ToneEngineFactory {
    /// Tone at `frequency` Hz, ten seconds long
    pub fn new(frequency: f64) -> Self {
        Self {
            frequency,
            duration: Duration::from_secs(10),
        }
    }

    /// Set how long each track plays
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

impl EngineFactory for ToneEngineFactory {
    fn create(
        &self,
        options: EngineOptions,
        events: EngineEvents,
    ) -> crate::Result<Box<dyn DecodeEngine>> {
        if options.external_encryption {
            return Err(Error::Unsupported(
                "tone engine cannot encrypt packets".to_string(),
            ));
        }
        Ok(Box::new(ToneEngine::new(self.frequency, self.duration, events)))
    }
}

/// Sine wave generator producing interleaved 16-bit PCM
struct ToneGenerator {
    frequency: f64,
    sample_rate: u32,
    channels: u8,
    phase: f64,
    amplitude: f64,
}

impl ToneGenerator {
    fn frame(&mut self, samples_per_channel: usize, rate: f64, volume: f64) -> Bytes {
        let mut frame = BytesMut::with_capacity(samples_per_channel * self.channels as usize * 2);
        let phase_increment = 2.0 * PI * self.frequency * rate / self.sample_rate as f64;
        let amplitude = (self.amplitude * volume).min(i16::MAX as f64);

        for _ in 0..samples_per_channel {
            let value = (self.phase.sin() * amplitude) as i16;
            for _ in 0..self.channels {
                frame.put_i16_le(value);
            }

            self.phase += phase_increment;
            if self.phase >= 2.0 * PI {
                self.phase -= 2.0 * PI;
            }
        }

        frame.freeze()
    }
}

struct ToneState {
    generator: ToneGenerator,
    /// Frames played so far, which is also the position
    position: u64,
    limit: u64,
    paused: bool,
    volume: f64,
    rate: f64,
}

/// Decode engine that synthesizes a sine tone instead of decoding media
///
/// Volume and rate change the generated signal; the remaining effects are
/// accepted and ignored.
pub struct ToneEngine {
    events: EngineEvents,
    state: Arc<Mutex<ToneState>>,
    duration: Duration,
    url: Option<String>,
    task: Option<JoinHandle<()>>,
}

impl ToneEngine {
    /// Create a stopped engine
    pub fn new(frequency: f64, duration: Duration, events: EngineEvents) -> Self {
        let limit = (duration.as_millis() / FRAME_PERIOD.as_millis()) as u64;
        Self {
            events,
            state: Arc::new(Mutex::new(ToneState {
                generator: ToneGenerator {
                    frequency,
                    sample_rate: crate::config::DEFAULT_SAMPLE_RATE,
                    channels: crate::config::DEFAULT_CHANNELS,
                    phase: 0.0,
                    // 50% amplitude to avoid clipping
                    amplitude: 0.5 * i16::MAX as f64,
                },
                position: 0,
                limit,
                paused: false,
                volume: 1.0,
                rate: 1.0,
            })),
            duration,
            url: None,
            task: None,
        }
    }

    fn samples_per_frame(sample_rate: u32) -> usize {
        (sample_rate as u64 * FRAME_PERIOD.as_millis() as u64 / 1000) as usize
    }
}

impl DecodeEngine for ToneEngine {
    fn set_output(&mut self, channels: u8, sample_rate: u32, _bitrate: u32) -> crate::Result<()> {
        if channels == 0 || sample_rate == 0 {
            return Err(Error::InvalidArgument(format!(
                "unsupported output {channels} channels at {sample_rate} Hz"
            )));
        }
        let mut state = self.state.lock();
        state.generator.channels = channels;
        state.generator.sample_rate = sample_rate;
        Ok(())
    }

    fn set_url(&mut self, url: &str, _is_file: bool) -> crate::Result<()> {
        log::debug!("Tone engine ignoring input {}", url);
        self.url = Some(url.to_string());
        Ok(())
    }

    fn start(&mut self) -> crate::Result<()> {
        if self.task.is_some() {
            return Err(Error::Internal("tone engine already started".to_string()));
        }
        if self.url.is_none() {
            return Err(Error::Internal("tone engine started without input".to_string()));
        }

        let events = self.events.clone();
        let state = self.state.clone();

        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval(FRAME_PERIOD);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            if !events.emit(EngineEvent::Ready) {
                return;
            }

            loop {
                ticker.tick().await;

                let frame = {
                    let mut state = state.lock();
                    if state.paused {
                        continue;
                    }
                    if state.position >= state.limit {
                        None
                    } else {
                        state.position += 1;
                        let samples = Self::samples_per_frame(state.generator.sample_rate);
                        let (rate, volume) = (state.rate, state.volume);
                        Some((state.generator.frame(samples, rate, volume), samples))
                    }
                };

                let event = match frame {
                    Some((frame, samples)) => EngineEvent::Packet {
                        length: frame.len(),
                        frame,
                        frame_size: samples as u32,
                    },
                    None => {
                        events.emit(EngineEvent::Finish);
                        break;
                    }
                };

                if !events.emit(event) {
                    break;
                }
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn pause(&mut self, paused: bool) -> crate::Result<()> {
        self.state.lock().paused = paused;
        Ok(())
    }

    fn seek(&mut self, position: Duration) -> crate::Result<()> {
        let mut state = self.state.lock();
        let frames = (position.as_millis() / FRAME_PERIOD.as_millis()) as u64;
        state.position = frames.min(state.limit);
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) -> crate::Result<()> {
        self.state.lock().volume = volume as f64;
        Ok(())
    }

    fn set_bitrate(&mut self, _bitrate: u32) -> crate::Result<()> {
        Ok(())
    }

    fn set_rate(&mut self, rate: f32) -> crate::Result<()> {
        self.state.lock().rate = rate as f64;
        Ok(())
    }

    fn set_tempo(&mut self, _tempo: f32) -> crate::Result<()> {
        Ok(())
    }

    fn set_tremolo(&mut self, _depth: f32, _frequency: f32) -> crate::Result<()> {
        Ok(())
    }

    fn set_equalizer(&mut self, _gains: &[f32]) -> crate::Result<()> {
        Ok(())
    }

    fn time(&self) -> Duration {
        FRAME_PERIOD * self.state.lock().position as u32
    }

    fn duration(&self) -> Option<Duration> {
        Some(self.duration)
    }

    fn frames_dropped(&self) -> u64 {
        0
    }

    fn total_frames(&self) -> u64 {
        self.state.lock().position
    }
}

impl Drop for ToneEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_frame_layout() {
        let mut generator = ToneGenerator {
            frequency: 440.0,
            sample_rate: 48_000,
            channels: 2,
            phase: 0.0,
            amplitude: 0.5 * i16::MAX as f64,
        };

        let frame = generator.frame(960, 1.0, 1.0);
        assert_eq!(frame.len(), 960 * 2 * 2);

        // Stereo channels carry the same sample
        assert_eq!(frame[4..6], frame[6..8]);
        let peak = frame
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]).unsigned_abs())
            .max()
            .unwrap();
        assert!(peak > 0 && peak <= (i16::MAX / 2) as u16 + 1);
    }

    #[test]
    fn test_silent_at_zero_volume() {
        let mut generator = ToneGenerator {
            frequency: 440.0,
            sample_rate: 48_000,
            channels: 1,
            phase: 0.0,
            amplitude: 0.5 * i16::MAX as f64,
        };
        let frame = generator.frame(960, 1.0, 0.0);
        assert!(frame.iter().all(|byte| *byte == 0));
    }

    #[test]
    fn test_samples_per_frame() {
        assert_eq!(ToneEngine::samples_per_frame(48_000), 960);
        assert_eq!(ToneEngine::samples_per_frame(44_100), 882);
    }
}
