//! Per-process pool of random streams.
//!
//! Each process owns one master stream and one child stream per worker
//! thread. Seeds come from the [`PrimeTable`] at positions fixed by the shared
//! offset, the process rank and the thread count, so no two streams in a job
//! share a seed while the only coordination is one broadcast of the offset.

use std::io::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{ensure, Context, Result};
use tracing::info;

use crate::comm::Communicator;
use crate::config::{RandomConfig, OFFSET_RANGE};
use crate::engine::{StreamEngine, StreamIdentity};
use crate::primes::PrimeTable;

/// Jobs smaller than this print their seed tables.
const SEED_REPORT_MAX_PROCESSES: usize = 4;

/// Extra prime slots reserved per thread beyond the child streams.
const RESERVED_SLACK: usize = 2;

fn wall_clock_offset() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
        % OFFSET_RANGE
}

pub struct StreamPool<E: StreamEngine> {
    primes: PrimeTable,
    offset: u64,
    threads: usize,
    master: E,
    master_identity: Option<StreamIdentity>,
    children: Vec<E>,
    child_identities: Vec<StreamIdentity>,
    initialized: bool,
    clock: fn() -> u64,
}

impl<E: StreamEngine> Default for StreamPool<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: StreamEngine> StreamPool<E> {
    pub fn new() -> Self {
        Self {
            primes: PrimeTable::new(),
            offset: 0,
            threads: 0,
            master: E::default(),
            master_identity: None,
            children: Vec::new(),
            child_identities: Vec::new(),
            initialized: false,
            clock: wall_clock_offset,
        }
    }

    /// Replace the wall-clock source used when no explicit offset is given.
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of child streams in use.
    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn state_size(&self) -> usize {
        self.master.state_size()
    }

    pub fn master(&self) -> &E {
        &self.master
    }

    pub fn master_mut(&mut self) -> &mut E {
        &mut self.master
    }

    pub fn master_identity(&self) -> Option<StreamIdentity> {
        self.master_identity
    }

    /// Child streams in use, indexed by thread.
    pub fn children(&self) -> &[E] {
        &self.children[..self.threads]
    }

    pub fn children_mut(&mut self) -> &mut [E] {
        &mut self.children[..self.threads]
    }

    pub fn child_identities(&self) -> &[StreamIdentity] {
        &self.child_identities
    }

    /// First-time setup; later calls reseed through [`StreamPool::reset`].
    pub fn initialize_all(
        &mut self,
        comm: &dyn Communicator,
        config: &RandomConfig,
        threads: usize,
    ) -> Result<()> {
        if self.initialized {
            return self.reset(comm, threads);
        }
        ensure!(threads > 0, "stream pool needs at least one thread");

        let (rank, processes) = if config.distributed() {
            (comm.rank(), comm.size())
        } else {
            (0, 1)
        };

        let offset = match config.offset() {
            Some(offset) => offset,
            None => {
                let offset = self.shared_clock_offset(comm)?;
                info!(offset, "offset for the random number seeds based on time");
                offset
            }
        };
        self.offset = offset;

        let seeds = self.reserve(processes, threads);
        self.seed_master(rank, processes, &seeds);
        info!(
            offset,
            first = seeds[0],
            last = seeds[processes * threads],
            "random number offset"
        );
        if processes < SEED_REPORT_MAX_PROCESSES {
            for row in seeds.chunks(8) {
                let line: String = row.iter().map(|seed| format!("{seed:>12}")).collect();
                info!("{line}");
            }
        }

        self.initialized = true;
        self.make_children(comm, threads);
        Ok(())
    }

    /// Draw a fresh offset and rebuild every stream identity.
    pub fn reset(&mut self, comm: &dyn Communicator, threads: usize) -> Result<()> {
        ensure!(threads > 0, "stream pool needs at least one thread");
        self.offset = self.shared_clock_offset(comm)?;
        let (rank, processes) = (comm.rank(), comm.size());
        let seeds = self.reserve(processes, threads);
        self.seed_master(rank, processes, &seeds);
        self.initialized = true;
        self.make_children(comm, threads);
        Ok(())
    }

    /// Make at least `threads` child streams available and reseed them.
    ///
    /// Existing engines are kept and reinitialised in place; the pool never
    /// shrinks, so a later call with a smaller count leaves the tail idle.
    pub fn grow_pool_to(&mut self, comm: &dyn Communicator, threads: usize) -> Result<()> {
        ensure!(
            self.initialized,
            "grow_pool_to called before initialize_all"
        );
        ensure!(threads > 0, "stream pool needs at least one thread");
        self.make_children(comm, threads);
        Ok(())
    }

    /// Write the state of every stream in use, one line per stream.
    ///
    /// Single-threaded pools dump the master stream instead.
    pub fn dump<W: Write>(&self, mut out: W) -> io::Result<()> {
        let mut words = Vec::with_capacity(self.state_size());
        let streams: Vec<&E> = if self.threads > 1 {
            self.children().iter().collect()
        } else {
            vec![&self.master]
        };
        for stream in streams {
            words.clear();
            stream.save(&mut words);
            let line: Vec<String> = words.iter().map(u64::to_string).collect();
            writeln!(out, "{}", line.join(" "))?;
        }
        Ok(())
    }

    fn shared_clock_offset(&self, comm: &dyn Communicator) -> Result<u64> {
        let mut offset = [(self.clock)() % OFFSET_RANGE];
        comm.broadcast(&mut offset)
            .context("failed to broadcast the seed offset")?;
        Ok(offset[0])
    }

    fn reserve(&mut self, processes: usize, threads: usize) -> Vec<u64> {
        self.primes.get(
            self.offset as usize,
            processes * (threads + RESERVED_SLACK),
        )
    }

    fn seed_master(&mut self, rank: usize, processes: usize, seeds: &[u64]) {
        let identity =
            StreamIdentity::new(rank, processes, seeds[rank], self.offset + rank as u64);
        self.master.init(identity);
        self.master_identity = Some(identity);
    }

    fn make_children(&mut self, comm: &dyn Communicator, threads: usize) {
        while self.children.len() < threads {
            self.children.push(E::default());
        }

        let rank = comm.rank();
        let processes = comm.size();
        let base = self.offset as usize + processes + threads * rank;
        let seeds = self.primes.get(base, threads);

        self.child_identities = seeds
            .iter()
            .enumerate()
            .map(|(ip, &seed)| StreamIdentity::new(rank, processes, seed, (base + ip) as u64))
            .collect();
        for (child, identity) in self.children.iter_mut().zip(&self.child_identities) {
            child.init(*identity);
        }
        self.threads = threads;

        if processes < SEED_REPORT_MAX_PROCESSES {
            let line: String = seeds.iter().map(|seed| format!("{seed:>12}")).collect();
            info!(rank, "random seeds:{line}");
        }
    }
}
