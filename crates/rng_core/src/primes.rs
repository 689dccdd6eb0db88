//! Deterministic table of seed primes.
//!
//! The table holds the odd primes in ascending order starting at 3. A request
//! for `count` primes at `offset` returns the slice `[offset, offset + count)`
//! of that sequence, extending the table by trial division when needed. The
//! cache only amortises repeated calls; output depends on the arguments alone.

/// Growable cache of odd primes.
#[derive(Clone, Debug)]
pub struct PrimeTable {
    primes: Vec<u64>,
}

impl Default for PrimeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PrimeTable {
    pub fn new() -> Self {
        let mut primes = Vec::with_capacity(2_048);
        primes.push(3);
        Self { primes }
    }

    /// Return `count` consecutive primes starting at table position `offset`.
    pub fn get(&mut self, offset: usize, count: usize) -> Vec<u64> {
        let end = offset + count;
        self.extend_to(end);
        self.primes[offset..end].to_vec()
    }

    /// Prime at table position `index`.
    pub fn at(&mut self, index: usize) -> u64 {
        self.extend_to(index + 1);
        self.primes[index]
    }

    /// Number of primes discovered so far.
    pub fn len(&self) -> usize {
        self.primes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primes.is_empty()
    }

    fn extend_to(&mut self, len: usize) {
        if len <= self.primes.len() {
            return;
        }
        self.primes.reserve(len - self.primes.len());
        let mut candidate = self.primes.last().copied().unwrap_or(1);
        while self.primes.len() < len {
            candidate += 2;
            if self.is_prime(candidate) {
                self.primes.push(candidate);
            }
        }
    }

    // Every odd composite has an odd prime factor no larger than its root,
    // and the table already covers that range.
    fn is_prime(&self, candidate: u64) -> bool {
        for &p in &self.primes {
            if p * p > candidate {
                return true;
            }
            if candidate % p == 0 {
                return false;
            }
        }
        true
    }
}
