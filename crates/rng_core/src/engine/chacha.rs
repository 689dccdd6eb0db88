use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_seeder::Seeder;

use super::{check_len, StreamEngine, StreamIdentity};
use crate::error::StateError;

const KEY_WORDS: usize = 4;
const WORDS: usize = KEY_WORDS + 3;

/// ChaCha8 keystream; the stream id is the identity offset.
#[derive(Clone, Debug)]
pub struct ChaCha {
    rng: ChaCha8Rng,
}

impl Default for ChaCha {
    fn default() -> Self {
        Self {
            rng: ChaCha8Rng::from_seed([0; 32]),
        }
    }
}

impl StreamEngine for ChaCha {
    const NAME: &'static str = "chacha8";

    fn init(&mut self, identity: StreamIdentity) {
        let mut rng: ChaCha8Rng = Seeder::from(identity).make_rng();
        rng.set_stream(identity.offset);
        self.rng = rng;
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    /// Layout: four key words, stream id, then word position low and high.
    fn save(&self, out: &mut Vec<u64>) {
        let key = self.rng.get_seed();
        for chunk in key.chunks_exact(8) {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            out.push(u64::from_le_bytes(bytes));
        }
        out.push(self.rng.get_stream());
        let pos = self.rng.get_word_pos();
        out.push(pos as u64);
        out.push((pos >> 64) as u64);
    }

    fn load(&mut self, words: &[u64]) -> Result<(), StateError> {
        check_len(Self::NAME, WORDS, words)?;
        let mut key = [0u8; 32];
        for (chunk, word) in key.chunks_exact_mut(8).zip(&words[..KEY_WORDS]) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        let mut rng = ChaCha8Rng::from_seed(key);
        rng.set_stream(words[KEY_WORDS]);
        let pos = u128::from(words[KEY_WORDS + 1]) | (u128::from(words[KEY_WORDS + 2]) << 64);
        rng.set_word_pos(pos);
        self.rng = rng;
        Ok(())
    }

    fn state_size(&self) -> usize {
        WORDS
    }
}
