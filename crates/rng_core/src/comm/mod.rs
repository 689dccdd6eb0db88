//! Collective communication between the processes of one job.
//!
//! Every collective is blocking and must be entered by all ranks. Buffers are
//! flat `u64` words, which is all the stream pool and the checkpoint code need
//! to move around.

#[cfg(feature = "mpi")]
mod mpi_world;

use std::sync::{Arc, Barrier, Mutex, MutexGuard};

use crate::error::CommError;

#[cfg(feature = "mpi")]
pub use mpi_world::MpiCommunicator;

/// Rank that owns broadcasts, gathers and scatters.
pub const ROOT: usize = 0;

pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn is_root(&self) -> bool {
        self.rank() == ROOT
    }

    /// Overwrite `words` on every rank with the root's copy.
    fn broadcast(&self, words: &mut [u64]) -> Result<(), CommError>;

    /// Concatenate every rank's `local` in rank order at the root.
    ///
    /// Returns `Some` on the root and `None` elsewhere.
    fn gather(&self, local: &[u64]) -> Result<Option<Vec<u64>>, CommError>;

    /// Hand `count` words of the root buffer to each rank, in rank order.
    fn scatter(&self, root: Option<&[u64]>, count: usize) -> Result<Vec<u64>, CommError>;

    /// Block until every rank has arrived.
    fn barrier(&self) -> Result<(), CommError> {
        self.broadcast(&mut [0])
    }

    /// True on every rank iff `ok` holds on every rank.
    fn all_agree(&self, ok: bool) -> Result<bool, CommError> {
        let verdicts = self.gather(&[u64::from(ok)])?;
        let mut agreed = [u64::from(verdicts.map_or(true, |all| all.iter().all(|&v| v == 1)))];
        self.broadcast(&mut agreed)?;
        Ok(agreed[0] == 1)
    }
}

/// A job made of a single process.
#[derive(Clone, Copy, Debug, Default)]
pub struct Solo;

impl Communicator for Solo {
    fn rank(&self) -> usize {
        ROOT
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast(&self, _words: &mut [u64]) -> Result<(), CommError> {
        Ok(())
    }

    fn gather(&self, local: &[u64]) -> Result<Option<Vec<u64>>, CommError> {
        Ok(Some(local.to_vec()))
    }

    fn scatter(&self, root: Option<&[u64]>, count: usize) -> Result<Vec<u64>, CommError> {
        let root = root.ok_or(CommError::MissingRoot)?;
        if root.len() != count {
            return Err(CommError::Length {
                op: "scatter",
                rank: ROOT,
                expected: count,
                actual: root.len(),
            });
        }
        Ok(root.to_vec())
    }
}

struct Exchange {
    barrier: Barrier,
    slots: Mutex<Vec<Vec<u64>>>,
}

/// One rank of a job whose processes run as threads of the current process.
///
/// Ranks exchange data through a shared slot table; two barrier phases per
/// collective keep a fast rank from overwriting slots still being read.
#[derive(Clone)]
pub struct LocalGroup {
    rank: usize,
    size: usize,
    exchange: Arc<Exchange>,
}

impl LocalGroup {
    /// Create the handles for a job of `size` ranks, indexed by rank.
    pub fn new(size: usize) -> Vec<LocalGroup> {
        assert!(size > 0, "a job needs at least one rank");
        let exchange = Arc::new(Exchange {
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![Vec::new(); size]),
        });
        (0..size)
            .map(|rank| LocalGroup {
                rank,
                size,
                exchange: Arc::clone(&exchange),
            })
            .collect()
    }

    fn slots(&self) -> Result<MutexGuard<'_, Vec<Vec<u64>>>, CommError> {
        self.exchange.slots.lock().map_err(|_| CommError::Poisoned)
    }

    fn sync(&self) {
        self.exchange.barrier.wait();
    }

    fn post(&self, slot: usize, words: &[u64]) -> Result<(), CommError> {
        let mut slots = self.slots()?;
        slots[slot].clear();
        slots[slot].extend_from_slice(words);
        Ok(())
    }
}

impl Communicator for LocalGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast(&self, words: &mut [u64]) -> Result<(), CommError> {
        let posted = if self.is_root() {
            self.post(ROOT, words)
        } else {
            Ok(())
        };
        self.sync();
        let received = posted.and_then(|()| {
            if self.is_root() {
                return Ok(());
            }
            let slots = self.slots()?;
            let source = &slots[ROOT];
            if source.len() != words.len() {
                return Err(CommError::Length {
                    op: "broadcast",
                    rank: self.rank,
                    expected: source.len(),
                    actual: words.len(),
                });
            }
            words.copy_from_slice(source);
            Ok(())
        });
        self.sync();
        received
    }

    fn gather(&self, local: &[u64]) -> Result<Option<Vec<u64>>, CommError> {
        let posted = self.post(self.rank, local);
        self.sync();
        let collected = posted.and_then(|()| {
            if !self.is_root() {
                return Ok(None);
            }
            let slots = self.slots()?;
            let mut all = Vec::with_capacity(local.len() * self.size);
            for (rank, words) in slots.iter().enumerate() {
                if words.len() != local.len() {
                    return Err(CommError::Length {
                        op: "gather",
                        rank,
                        expected: local.len(),
                        actual: words.len(),
                    });
                }
                all.extend_from_slice(words);
            }
            Ok(Some(all))
        });
        self.sync();
        collected
    }

    fn scatter(&self, root: Option<&[u64]>, count: usize) -> Result<Vec<u64>, CommError> {
        let posted = if self.is_root() {
            match root {
                Some(words) => self.post(ROOT, words),
                None => Err(CommError::MissingRoot),
            }
        } else {
            Ok(())
        };
        self.sync();
        let received = posted.and_then(|()| {
            let slots = self.slots()?;
            let source = &slots[ROOT];
            if source.len() != count * self.size {
                return Err(CommError::Length {
                    op: "scatter",
                    rank: ROOT,
                    expected: count * self.size,
                    actual: source.len(),
                });
            }
            let start = self.rank * count;
            Ok(source[start..start + count].to_vec())
        });
        self.sync();
        received
    }
}

/// Run `body` once per rank of a fresh [`LocalGroup`], each on its own thread.
///
/// Results come back in rank order.
pub fn run_ranks<T, F>(size: usize, body: F) -> Vec<T>
where
    T: Send,
    F: Fn(LocalGroup) -> T + Sync,
{
    let ranks = LocalGroup::new(size);
    std::thread::scope(|scope| {
        let handles: Vec<_> = ranks
            .into_iter()
            .map(|comm| {
                let body = &body;
                scope.spawn(move || body(comm))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(value) => value,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    })
}
