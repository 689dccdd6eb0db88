//! Save and restore the random state of a whole job.
//!
//! The archive holds every child stream in `random` (one row per
//! `(rank, thread)` pair, rank-major), every master stream in
//! `random_master` (one row per rank), and the job shape under
//! `nprocs_nthreads_statesize`. Stores that accept concurrent access get one
//! hyperslab per rank; single-writer stores get everything through the root.
//!
//! A restore only proceeds when the stored shape equals the live one. On a
//! mismatch the freshly seeded streams are left alone and the run goes on.

mod gathered;
mod legacy;
mod parallel;

pub use legacy::{read_legacy, write_legacy, LegacyRecord};

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, ensure, Context, Result};
use tracing::{info, warn};

use crate::comm::Communicator;
use crate::engine::StreamEngine;
use crate::error::StoreError;
use crate::pool::StreamPool;
use crate::store::{StoreProvider, StructuredStore};

pub const STATE_GROUP: &str = "state_0";
pub const CHILD_GROUP: &str = "random";
pub const MASTER_GROUP: &str = "random_master";
pub const SHAPE_TAG: &str = "nprocs_nthreads_statesize";
pub const STORE_SUFFIX: &str = ".random.h5";
pub const LEGACY_SUFFIX: &str = ".random.xml";

/// Job layout recorded next to the stream states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckpointShape {
    pub processes: usize,
    pub threads: usize,
    pub state_size: usize,
}

impl CheckpointShape {
    pub fn live<E: StreamEngine>(pool: &StreamPool<E>, comm: &dyn Communicator) -> Self {
        Self {
            processes: comm.size(),
            threads: pool.threads(),
            state_size: pool.state_size(),
        }
    }

    pub fn to_words(self) -> [u64; 3] {
        [
            self.processes as u64,
            self.threads as u64,
            self.state_size as u64,
        ]
    }

    pub fn from_words(words: &[u64; 3]) -> Self {
        Self {
            processes: words[0] as usize,
            threads: words[1] as usize,
            state_size: words[2] as usize,
        }
    }

    pub(crate) fn child_shape(&self) -> [usize; 2] {
        [self.processes * self.threads, self.state_size]
    }

    pub(crate) fn master_shape(&self) -> [usize; 2] {
        [self.processes, self.state_size]
    }
}

impl fmt::Display for CheckpointShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processes x {} threads x {} words",
            self.processes, self.threads, self.state_size
        )
    }
}

/// Outcome of a restore attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Restore {
    /// Every live stream now continues from the stored state.
    Restored,
    /// The stored job shape differs; streams keep their fresh seeding.
    Mismatch {
        stored: CheckpointShape,
        live: CheckpointShape,
    },
    /// The legacy record holds a different stream table `(rows, state size)`.
    LegacyMismatch {
        stored: (usize, usize),
        live: (usize, usize),
    },
}

impl Restore {
    pub fn is_restored(&self) -> bool {
        matches!(self, Restore::Restored)
    }
}

/// Append `suffix` to the file name of `base`.
pub fn checkpoint_path(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Write the random state of the whole job to `<base>.random.h5`.
///
/// Collective: every rank must call it. Returns once every rank is done.
pub fn write<E: StreamEngine>(
    pool: &StreamPool<E>,
    comm: &dyn Communicator,
    provider: &dyn StoreProvider,
    base: &Path,
) -> Result<()> {
    let path = checkpoint_path(base, STORE_SUFFIX);
    let created = provider.create(&path, comm);
    let written = if parallel_mode(provider, &created) {
        parallel::write(pool, comm, created)
    } else {
        gathered::write(pool, comm, created)
    };
    // Doubles as the closing barrier; every rank leaves with the same verdict.
    let agreed = comm
        .all_agree(written.is_ok())
        .context("failed to synchronise after checkpoint write")?;
    written.with_context(|| format!("failed to write random checkpoint {:?}", path))?;
    ensure!(agreed, "another rank failed to write random checkpoint {:?}", path);
    Ok(())
}

/// Restore the random state of the whole job from `<base>.random.h5`.
///
/// Collective: every rank must call it, and every rank gets the same outcome.
pub fn read<E: StreamEngine>(
    pool: &mut StreamPool<E>,
    comm: &dyn Communicator,
    provider: &dyn StoreProvider,
    base: &Path,
) -> Result<Restore> {
    let path = checkpoint_path(base, STORE_SUFFIX);
    let opened = provider.open(&path, comm);
    let restore = if parallel_mode(provider, &opened) {
        parallel::read(pool, comm, opened)
    } else {
        gathered::read(pool, comm, opened)
    };
    restore.with_context(|| format!("failed to read random checkpoint {:?}", path))
}

type Opened = Result<Box<dyn StructuredStore>, StoreError>;

// A rank whose open failed still has to follow the collective choreography.
fn parallel_mode(provider: &dyn StoreProvider, opened: &Opened) -> bool {
    match opened {
        Ok(store) => store.is_parallel(),
        Err(_) => provider.is_parallel(),
    }
}

/// Serialised child states (thread order) and master state of this rank.
pub(crate) fn local_states<E: StreamEngine>(pool: &StreamPool<E>) -> (Vec<u64>, Vec<u64>) {
    let state_size = pool.state_size();
    let mut children = Vec::with_capacity(pool.threads() * state_size);
    for child in pool.children() {
        child.save(&mut children);
    }
    let mut master = Vec::with_capacity(state_size);
    pool.master().save(&mut master);
    (children, master)
}

pub(crate) fn load_local<E: StreamEngine>(
    pool: &mut StreamPool<E>,
    children: &[u64],
    master: &[u64],
) -> Result<()> {
    let state_size = pool.state_size();
    for (child, words) in pool
        .children_mut()
        .iter_mut()
        .zip(children.chunks_exact(state_size))
    {
        child.load(words)?;
    }
    pool.master_mut().load(master)?;
    Ok(())
}

const STATUS_FAILED: u64 = 0;
const STATUS_OK: u64 = 1;

/// Broadcast the root's success flag; on failure every rank returns an error.
pub(crate) fn root_status<T, E>(comm: &dyn Communicator, local: Result<T, E>) -> Result<T>
where
    E: Into<anyhow::Error>,
{
    let mut status = [if local.is_ok() { STATUS_OK } else { STATUS_FAILED }];
    comm.broadcast(&mut status)?;
    match (status[0], local) {
        (STATUS_OK, Ok(value)) => Ok(value),
        (_, Err(err)) => Err(err.into()),
        (_, Ok(_)) => Err(anyhow!("root rank failed to access the random checkpoint")),
    }
}

pub(crate) fn mismatch(stored: CheckpointShape, live: CheckpointShape) -> Restore {
    warn!(
        old_processes = stored.processes,
        new_processes = live.processes,
        old_threads = stored.threads,
        new_threads = live.threads,
        old_state_size = stored.state_size,
        new_state_size = live.state_size,
        "mismatched random number generators; using the streams generated at initialization"
    );
    Restore::Mismatch { stored, live }
}

pub(crate) fn restored() -> Restore {
    info!("restart from the random number streams of the previous configuration");
    Restore::Restored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_is_appended_to_the_file_name() {
        assert_eq!(
            checkpoint_path(Path::new("runs/qmc.s001"), STORE_SUFFIX),
            PathBuf::from("runs/qmc.s001.random.h5")
        );
    }

    #[test]
    fn shape_words_round_trip() {
        let shape = CheckpointShape {
            processes: 2,
            threads: 4,
            state_size: 8,
        };
        assert_eq!(CheckpointShape::from_words(&shape.to_words()), shape);
        assert_eq!(shape.child_shape(), [8, 8]);
        assert_eq!(shape.master_shape(), [2, 8]);
        assert_eq!(shape.to_string(), "2 processes x 4 threads x 8 words");
    }
}
