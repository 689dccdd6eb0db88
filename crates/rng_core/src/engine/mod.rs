//! Stream engine capability.
//!
//! The pool and the checkpoint code only ever see an engine through
//! [`StreamEngine`]: initialise from an identity, draw values, and move the
//! internal state in and out as a flat sequence of `u64` words.

mod chacha;
mod splitmix;
mod xoshiro;

pub use chacha::ChaCha;
pub use splitmix::SplitMix;
pub use xoshiro::Xoshiro512;

use crate::error::StateError;

/// Everything that determines the trajectory of one stream.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct StreamIdentity {
    pub rank: usize,
    pub processes: usize,
    pub seed: u64,
    pub offset: u64,
}

impl StreamIdentity {
    pub fn new(rank: usize, processes: usize, seed: u64, offset: u64) -> Self {
        Self {
            rank,
            processes,
            seed,
            offset,
        }
    }
}

/// A serialisable pseudo-random stream.
pub trait StreamEngine: Default + Send {
    /// Tag used for datasets and legacy records.
    const NAME: &'static str;

    /// Reset the engine onto the trajectory named by `identity`.
    fn init(&mut self, identity: StreamIdentity);

    /// Advance the stream and return the next `u64` sample.
    fn next_u64(&mut self) -> u64;

    /// Advance the stream and return the next `f64` sample in `[0, 1)`.
    fn next_f64(&mut self) -> f64 {
        const SCALE: f64 = (1u64 << 53) as f64;
        ((self.next_u64() >> 11) as f64) / SCALE
    }

    /// Append the current state words to `out`.
    fn save(&self, out: &mut Vec<u64>);

    /// Replace the current state with `words`.
    fn load(&mut self, words: &[u64]) -> Result<(), StateError>;

    /// Number of words produced by [`StreamEngine::save`].
    fn state_size(&self) -> usize;

    /// Build an engine already placed on `identity`.
    fn from_identity(identity: StreamIdentity) -> Self {
        let mut engine = Self::default();
        engine.init(identity);
        engine
    }
}

pub(crate) fn check_len(
    engine: &'static str,
    expected: usize,
    words: &[u64],
) -> Result<(), StateError> {
    if words.len() == expected {
        Ok(())
    } else {
        Err(StateError::Length {
            engine,
            expected,
            actual: words.len(),
        })
    }
}

pub(crate) fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Fold an identity into a single 64-bit key.
pub(crate) fn identity_key(identity: &StreamIdentity) -> u64 {
    let mut key = identity
        .seed
        .wrapping_mul(0xA0761D6478BD642F)
        .wrapping_add(0xE7037ED1A0B428DB)
        ^ identity.offset.wrapping_mul(0x8E9D5A8F6A09E667);
    key = mix64(key ^ (identity.rank as u64).wrapping_mul(0x9E3779B97F4A7C15));
    mix64(key ^ (identity.processes as u64))
}
