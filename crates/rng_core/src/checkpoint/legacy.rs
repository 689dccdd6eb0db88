//! Older textual stream table kept for restarting from earlier runs.
//!
//! One engine tag, a `rows statesize` dims line and the states, one row per
//! stream. Streams are the children for multi-threaded pools and the master
//! otherwise. There is no job-shape descriptor; the dims line is checked
//! instead.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use tracing::warn;

use super::{checkpoint_path, restored, root_status, Restore, LEGACY_SUFFIX};
use crate::comm::Communicator;
use crate::engine::StreamEngine;
use crate::error::LegacyError;
use crate::pool::StreamPool;

/// Parsed content of a legacy record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyRecord {
    pub engine: String,
    pub rows: usize,
    pub state_size: usize,
    pub states: Vec<u64>,
}

impl LegacyRecord {
    pub fn to_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LegacyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "<?xml version=\"1.0\" encoding=\"utf-8\"?>")?;
        writeln!(f, "<random>")?;
        writeln!(f, "<engine>{}</engine>", self.engine)?;
        writeln!(f, "<dims>{} {}</dims>", self.rows, self.state_size)?;
        writeln!(f, "<states>")?;
        if self.state_size > 0 {
            for row in self.states.chunks(self.state_size) {
                for word in row {
                    write!(f, "{word} ")?;
                }
                writeln!(f)?;
            }
        }
        writeln!(f, "</states>")?;
        writeln!(f, "</random>")
    }
}

fn element<'a>(text: &'a str, name: &'static str) -> Result<&'a str, LegacyError> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = text
        .find(&open)
        .ok_or(LegacyError::MissingElement(name))?
        + open.len();
    let len = text[start..]
        .find(&close)
        .ok_or(LegacyError::MissingElement(name))?;
    Ok(text[start..start + len].trim())
}

fn numbers<T: FromStr>(text: &str, name: &'static str) -> Result<Vec<T>, LegacyError> {
    text.split_whitespace()
        .map(|token| {
            token.parse().map_err(|_| LegacyError::InvalidNumber {
                element: name,
                token: token.to_string(),
            })
        })
        .collect()
}

impl FromStr for LegacyRecord {
    type Err = LegacyError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let engine = element(text, "engine")?.to_string();
        let dims: Vec<usize> = numbers(element(text, "dims")?, "dims")?;
        let [rows, state_size] = dims[..] else {
            return Err(LegacyError::Dims(dims.len()));
        };
        let expected = rows
            .checked_mul(state_size)
            .ok_or(LegacyError::Oversized { rows, state_size })?;
        let states: Vec<u64> = numbers(element(text, "states")?, "states")?;
        if states.len() != expected {
            return Err(LegacyError::StateCount {
                expected,
                actual: states.len(),
            });
        }
        Ok(Self {
            engine,
            rows,
            state_size,
            states,
        })
    }
}

fn legacy_streams<E: StreamEngine>(pool: &StreamPool<E>) -> Vec<u64> {
    let mut words = Vec::with_capacity(pool.threads() * pool.state_size());
    if pool.threads() > 1 {
        for child in pool.children() {
            child.save(&mut words);
        }
    } else {
        pool.master().save(&mut words);
    }
    words
}

fn live_dims<E: StreamEngine>(pool: &StreamPool<E>, comm: &dyn Communicator) -> (usize, usize) {
    (comm.size() * pool.threads(), pool.state_size())
}

/// Gather every rank's streams and have the root write `<base>.random.xml`.
pub fn write_legacy<E: StreamEngine>(
    pool: &StreamPool<E>,
    comm: &dyn Communicator,
    base: &Path,
) -> Result<()> {
    let (rows, state_size) = live_dims(pool, comm);
    let gathered = comm.gather(&legacy_streams(pool))?;
    let written = match gathered {
        Some(states) => {
            let record = LegacyRecord {
                engine: E::NAME.to_string(),
                rows,
                state_size,
                states,
            };
            let path = checkpoint_path(base, LEGACY_SUFFIX);
            fs::write(&path, record.to_text())
                .with_context(|| format!("failed to write legacy random record {:?}", path))
        }
        None => Ok(()),
    };
    root_status(comm, written)
}

/// Restore from `<base>.random.xml`; the root parses and scatters.
pub fn read_legacy<E: StreamEngine>(
    pool: &mut StreamPool<E>,
    comm: &dyn Communicator,
    base: &Path,
) -> Result<Restore> {
    let live = live_dims(pool, comm);

    let parsed = if comm.is_root() {
        let path = checkpoint_path(base, LEGACY_SUFFIX);
        fs::read_to_string(&path)
            .with_context(|| format!("failed to read legacy random record {:?}", path))
            .and_then(|text| {
                text.parse::<LegacyRecord>()
                    .with_context(|| format!("malformed legacy random record {:?}", path))
            })
            .map(Some)
    } else {
        Ok(None)
    };
    let record = root_status(comm, parsed)?;

    // A record from another engine counts as an empty table.
    let record = record.filter(|record| record.engine == E::NAME);
    let mut dims = record
        .as_ref()
        .map_or([0, 0], |record| [record.rows as u64, record.state_size as u64]);
    comm.broadcast(&mut dims)?;
    let stored = (dims[0] as usize, dims[1] as usize);
    if stored != live {
        warn!(
            old_streams = stored.0,
            new_streams = live.0,
            old_state_size = stored.1,
            new_state_size = live.1,
            "mismatched random number generators; using the streams generated at initialization"
        );
        return Ok(Restore::LegacyMismatch { stored, live });
    }

    let per_rank = if pool.threads() > 1 {
        pool.threads() * pool.state_size()
    } else {
        pool.state_size()
    };
    let states = record.map(|record| record.states);
    let local = comm.scatter(states.as_deref(), per_rank)?;

    if pool.threads() > 1 {
        let state_size = pool.state_size();
        for (child, words) in pool
            .children_mut()
            .iter_mut()
            .zip(local.chunks_exact(state_size))
        {
            child.load(words)?;
        }
    } else {
        pool.master_mut().load(&local)?;
    }
    Ok(restored())
}
