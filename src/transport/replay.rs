//! Anti-replay window for inbound nonces.

use crate::core::REPLAY_WINDOW_SIZE;

const WORD_BITS: u64 = 64;
// One spare word so that a full REPLAY_WINDOW_SIZE nonces below the highest
// stay tracked while the word holding the highest is being reused.
const WORDS: usize = REPLAY_WINDOW_SIZE / 64 + 1;

/// Sliding window over received nonces, kept as a ring of bitmap words.
///
/// Nonces start at 1; zero is never accepted.
#[derive(Debug, Clone)]
pub struct NonceWindow {
    highest: u64,
    bitmap: [u64; WORDS],
}

impl Default for NonceWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl NonceWindow {
    /// Window size in nonces.
    pub const WINDOW_SIZE: u64 = REPLAY_WINDOW_SIZE as u64;

    /// Create an empty window.
    pub fn new() -> Self {
        Self {
            highest: 0,
            bitmap: [0; WORDS],
        }
    }

    /// Highest nonce accepted so far (0 if none).
    pub fn highest(&self) -> u64 {
        self.highest
    }

    /// Whether `nonce` would be accepted, without recording it.
    pub fn check(&self, nonce: u64) -> bool {
        if nonce == 0 || self.is_too_old(nonce) {
            return false;
        }
        if nonce > self.highest {
            return true;
        }
        let (word, mask) = Self::slot(nonce);
        self.bitmap[word] & mask == 0
    }

    /// Record `nonce` if it is fresh. Returns `false` for replays, zero and
    /// nonces that fell out of the window.
    ///
    /// Call only after the frame authenticated, so that forged nonces cannot
    /// advance the window.
    pub fn check_and_mark(&mut self, nonce: u64) -> bool {
        if !self.check(nonce) {
            return false;
        }

        if nonce > self.highest {
            let current = self.highest / WORD_BITS;
            let target = nonce / WORD_BITS;
            let stale = (target - current).min(WORDS as u64);
            for i in 1..=stale {
                self.bitmap[((current + i) % WORDS as u64) as usize] = 0;
            }
            self.highest = nonce;
        }

        let (word, mask) = Self::slot(nonce);
        self.bitmap[word] |= mask;
        true
    }

    fn is_too_old(&self, nonce: u64) -> bool {
        self.highest >= Self::WINDOW_SIZE && nonce <= self.highest - Self::WINDOW_SIZE
    }

    fn slot(nonce: u64) -> (usize, u64) {
        let word = ((nonce / WORD_BITS) % WORDS as u64) as usize;
        (word, 1u64 << (nonce % WORD_BITS))
    }
}
