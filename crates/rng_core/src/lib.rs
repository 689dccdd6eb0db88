//! Parallel random streams for multi-process, multi-threaded simulations.
//!
//! A [`StreamPool`] gives every process one master stream and every worker
//! thread its own child stream, seeded from distinct primes so that no two
//! streams in a job coincide. The [`checkpoint`] module saves the whole job's
//! stream state to a structured archive and restores it, provided the job
//! shape still matches.

pub mod checkpoint;
pub mod comm;
pub mod config;
pub mod engine;
pub mod error;
pub mod pool;
pub mod primes;
pub mod selftest;
pub mod store;

pub use checkpoint::{CheckpointShape, Restore};
#[cfg(feature = "mpi")]
pub use comm::MpiCommunicator;
pub use comm::{run_ranks, Communicator, LocalGroup, Solo};
pub use config::RandomConfig;
pub use engine::{ChaCha, SplitMix, StreamEngine, StreamIdentity, Xoshiro512};
pub use pool::StreamPool;
pub use primes::PrimeTable;
pub use store::{FileProvider, SharedVolume, StoreProvider};
