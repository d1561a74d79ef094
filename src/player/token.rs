// ABOUTME: Play tokens identifying the most recent play request
// ABOUTME: Async work compares its captured token before touching player state

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Identifies one play request; a newer request supersedes older ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PlayToken(u32);

impl PlayToken {
    /// The token following this one
    pub fn next(self) -> Self {
        PlayToken(self.0.wrapping_add(1))
    }

    /// Raw counter value
    pub fn value(self) -> u32 {
        self.0
    }
}

/// The player's current token, readable from load tasks
#[derive(Debug, Clone, Default)]
pub(crate) struct PlayTokenCell(Arc<AtomicU32>);

impl PlayTokenCell {
    /// Supersede every outstanding request
    pub(crate) fn advance(&self) -> PlayToken {
        let previous = self.0.fetch_add(1, Ordering::AcqRel);
        PlayToken(previous).next()
    }

    pub(crate) fn current(&self) -> PlayToken {
        PlayToken(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn is_current(&self, token: PlayToken) -> bool {
        self.current() == token
    }
}
