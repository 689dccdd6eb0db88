use super::{check_len, identity_key, mix64, StreamEngine, StreamIdentity};
use crate::error::StateError;

/// Counter-based splitmix stream.
///
/// Upper 64 bits of the state store the stream id fixed at initialisation;
/// the lower 64 bits store the rolling counter.
#[derive(Clone, Debug, Default)]
pub struct SplitMix {
    state: u128,
}

impl SplitMix {
    fn stream_id(&self) -> u64 {
        (self.state >> 64) as u64
    }

    fn counter(&self) -> u64 {
        self.state as u64
    }
}

impl StreamEngine for SplitMix {
    const NAME: &'static str = "splitmix64";

    fn init(&mut self, identity: StreamIdentity) {
        let stream_id = identity_key(&identity);
        let counter = mix64(stream_id ^ 0xD1342543DE82EF95);
        self.state = (u128::from(stream_id) << 64) | u128::from(counter);
    }

    fn next_u64(&mut self) -> u64 {
        let stream_id = self.stream_id();
        let counter = self.counter().wrapping_add(0x9E3779B97F4A7C15);
        self.state = (u128::from(stream_id) << 64) | u128::from(counter);
        mix64(stream_id ^ counter)
    }

    fn save(&self, out: &mut Vec<u64>) {
        out.push(self.stream_id());
        out.push(self.counter());
    }

    fn load(&mut self, words: &[u64]) -> Result<(), StateError> {
        check_len(Self::NAME, 2, words)?;
        self.state = (u128::from(words[0]) << 64) | u128::from(words[1]);
        Ok(())
    }

    fn state_size(&self) -> usize {
        2
    }
}
