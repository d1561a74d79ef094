// ABOUTME: Silence keepalive schedule
// ABOUTME: Counts down a fixed number of silence frames on a steady interval

use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Schedule of trailing silence frames sent after audio stops
///
/// Receivers interpolate the gap after the last real frame unless they see a
/// few frames of silence, so the player sends `frames` of them spaced by
/// `interval` whenever playback finishes, pauses or seeks.
pub(crate) struct Keepalive {
    frames: u8,
    period: Duration,
    remaining: u8,
    ticker: Option<Interval>,
}

impl Keepalive {
    pub(crate) fn new(frames: u8, period: Duration) -> Self {
        Self {
            frames,
            period,
            remaining: 0,
            ticker: None,
        }
    }

    /// Start (or restart) the countdown; the first frame is due after one period
    pub(crate) fn arm(&mut self) {
        if self.frames == 0 {
            self.cancel();
            return;
        }
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.remaining = self.frames;
        self.ticker = Some(ticker);
    }

    pub(crate) fn cancel(&mut self) {
        self.remaining = 0;
        self.ticker = None;
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.ticker.is_some()
    }

    /// Wait for the next frame slot; pending forever while disarmed
    pub(crate) async fn tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// Account for one sent frame; returns true when it was the last one
    pub(crate) fn consume(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.ticker = None;
            true
        } else {
            false
        }
    }
}
