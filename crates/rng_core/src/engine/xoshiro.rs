use super::{check_len, identity_key, mix64, StreamEngine, StreamIdentity};
use crate::error::StateError;

const WORDS: usize = 8;

/// xoshiro512** generator with a 512-bit state.
#[derive(Clone, Debug)]
pub struct Xoshiro512 {
    s: [u64; WORDS],
}

impl Default for Xoshiro512 {
    fn default() -> Self {
        let mut engine = Self { s: [0; WORDS] };
        engine.init(StreamIdentity::new(0, 1, 0, 0));
        engine
    }
}

impl StreamEngine for Xoshiro512 {
    const NAME: &'static str = "xoshiro512starstar";

    fn init(&mut self, identity: StreamIdentity) {
        let mut x = identity_key(&identity);
        for word in self.s.iter_mut() {
            x = x.wrapping_add(0x9E3779B97F4A7C15);
            *word = mix64(x);
        }
        // All-zero is the one forbidden state.
        if self.s.iter().all(|&w| w == 0) {
            self.s[0] = 1;
        }
    }

    fn next_u64(&mut self) -> u64 {
        let s = &mut self.s;
        let result = s[1].wrapping_mul(5).rotate_left(7).wrapping_mul(9);
        let t = s[1] << 11;

        s[2] ^= s[0];
        s[5] ^= s[1];
        s[1] ^= s[2];
        s[7] ^= s[3];
        s[3] ^= s[4];
        s[4] ^= s[5];
        s[0] ^= s[6];
        s[6] ^= s[7];

        s[6] ^= t;
        s[7] = s[7].rotate_left(21);

        result
    }

    fn save(&self, out: &mut Vec<u64>) {
        out.extend_from_slice(&self.s);
    }

    fn load(&mut self, words: &[u64]) -> Result<(), StateError> {
        check_len(Self::NAME, WORDS, words)?;
        self.s.copy_from_slice(words);
        Ok(())
    }

    fn state_size(&self) -> usize {
        WORDS
    }
}
