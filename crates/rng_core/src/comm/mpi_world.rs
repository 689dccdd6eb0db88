//! Collectives over an MPI communicator, for jobs launched with `mpirun`.
//!
//! Buffer lengths are agreed on before any variable-sized exchange, since MPI
//! cannot recover from a receive that is shorter than the message. Stores have
//! to live on a file system every rank sees: [`crate::FileProvider`] works,
//! [`crate::SharedVolume`] only spans the threads of one process.

use mpi::environment::Universe;
use mpi::topology::{Rank, SimpleCommunicator};
use mpi::traits::{Communicator as _, CommunicatorCollectives as _, Root as _};

use super::{Communicator, ROOT};
use crate::error::CommError;

const ROOT_RANK: Rank = ROOT as Rank;

/// One rank of an MPI job.
pub struct MpiCommunicator {
    world: SimpleCommunicator,
}

impl MpiCommunicator {
    /// Wrap the world communicator of an initialised MPI environment.
    pub fn new(universe: &Universe) -> Self {
        Self::from_world(universe.world())
    }

    pub fn from_world(world: SimpleCommunicator) -> Self {
        Self { world }
    }

    /// Broadcast whether the root's local check passed.
    ///
    /// The root keeps its own error; every other rank gets `Aborted`.
    fn settle<T>(&self, op: &'static str, local: Result<T, CommError>) -> Result<T, CommError> {
        let mut verdict = [u64::from(local.is_ok())];
        self.world
            .process_at_rank(ROOT_RANK)
            .broadcast_into(&mut verdict[..]);
        match local {
            Ok(_) if verdict[0] == 0 => Err(CommError::Aborted {
                op,
                rank: self.rank(),
            }),
            other => other,
        }
    }
}

impl Communicator for MpiCommunicator {
    fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    fn size(&self) -> usize {
        self.world.size() as usize
    }

    fn broadcast(&self, words: &mut [u64]) -> Result<(), CommError> {
        let mut len = [words.len() as u64];
        let root = self.world.process_at_rank(ROOT_RANK);
        root.broadcast_into(&mut len[..]);
        // A rank with the wrong length votes no, so every rank leaves together.
        let matches = len[0] == words.len() as u64;
        if !self.all_agree(matches)? {
            return Err(if matches {
                CommError::Aborted {
                    op: "broadcast",
                    rank: self.rank(),
                }
            } else {
                CommError::Length {
                    op: "broadcast",
                    rank: self.rank(),
                    expected: len[0] as usize,
                    actual: words.len(),
                }
            });
        }
        root.broadcast_into(words);
        Ok(())
    }

    fn gather(&self, local: &[u64]) -> Result<Option<Vec<u64>>, CommError> {
        let root = self.world.process_at_rank(ROOT_RANK);
        let len = [local.len() as u64];
        let checked = if self.is_root() {
            let mut lengths = vec![0u64; self.size()];
            root.gather_into_root(&len[..], &mut lengths[..]);
            match lengths.iter().position(|&n| n != len[0]) {
                Some(rank) => Err(CommError::Length {
                    op: "gather",
                    rank,
                    expected: local.len(),
                    actual: lengths[rank] as usize,
                }),
                None => Ok(()),
            }
        } else {
            root.gather_into(&len[..]);
            Ok(())
        };
        self.settle("gather", checked)?;

        if self.is_root() {
            let mut all = vec![0u64; local.len() * self.size()];
            root.gather_into_root(local, &mut all[..]);
            Ok(Some(all))
        } else {
            root.gather_into(local);
            Ok(None)
        }
    }

    fn scatter(&self, words: Option<&[u64]>, count: usize) -> Result<Vec<u64>, CommError> {
        let expected = count * self.size();
        let checked = if self.is_root() {
            match words {
                None => Err(CommError::MissingRoot),
                Some(words) if words.len() != expected => Err(CommError::Length {
                    op: "scatter",
                    rank: ROOT,
                    expected,
                    actual: words.len(),
                }),
                Some(words) => Ok(Some(words)),
            }
        } else {
            Ok(None)
        };
        let send = self.settle("scatter", checked)?;

        let root = self.world.process_at_rank(ROOT_RANK);
        let mut received = vec![0u64; count];
        match send {
            Some(words) => root.scatter_into_root(words, &mut received[..]),
            None => root.scatter_into(&mut received[..]),
        }
        Ok(received)
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.world.barrier();
        Ok(())
    }

    fn all_agree(&self, ok: bool) -> Result<bool, CommError> {
        let root = self.world.process_at_rank(ROOT_RANK);
        let vote = [u64::from(ok)];
        let mut agreed = [0u64];
        if self.is_root() {
            let mut votes = vec![0u64; self.size()];
            root.gather_into_root(&vote[..], &mut votes[..]);
            agreed[0] = u64::from(votes.iter().all(|&v| v == 1));
        } else {
            root.gather_into(&vote[..]);
        }
        root.broadcast_into(&mut agreed[..]);
        Ok(agreed[0] == 1)
    }
}
