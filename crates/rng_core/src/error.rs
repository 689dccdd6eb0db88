use std::path::PathBuf;

use thiserror::Error;

/// Misuse or breakdown of a collective exchange.
#[derive(Debug, Error)]
pub enum CommError {
    #[error("rank {rank} supplied {actual} words to {op}, expected {expected}")]
    Length {
        op: &'static str,
        rank: usize,
        expected: usize,
        actual: usize,
    },
    #[error("root buffer missing for scatter on rank 0")]
    MissingRoot,
    #[error("collective exchange poisoned by a panicked rank")]
    Poisoned,
    #[error("rank {rank} left {op} because the root rejected the buffers")]
    Aborted { op: &'static str, rank: usize },
}

/// Failures raised by a structured store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("dataset '{0}' not found")]
    MissingDataset(String),
    #[error("dataset '{path}' has shape {stored:?}, request expects {requested:?}")]
    ShapeConflict {
        path: String,
        stored: Vec<usize>,
        requested: Vec<usize>,
    },
    #[error("hyperslab {counts:?}@{offsets:?} does not fit shape {shape:?}")]
    OutOfBounds {
        shape: Vec<usize>,
        counts: Vec<usize>,
        offsets: Vec<usize>,
    },
    #[error("buffer holds {actual} words, hyperslab selects {expected}")]
    BufferLength { expected: usize, actual: usize },
    #[error("pop called on the root group")]
    GroupUnderflow,
    #[error("shared volume poisoned by a panicked rank")]
    Poisoned,
    #[error(transparent)]
    Comm(#[from] CommError),
    #[error("archive '{path}' is malformed")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("dataset '{key}' in '{path}' holds {actual} words for shape {shape:?}")]
    Truncated {
        path: PathBuf,
        key: String,
        shape: Vec<usize>,
        actual: usize,
    },
    #[error("i/o failure on '{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Engine state words handed back in the wrong shape.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("{engine} expects {expected} state words, got {actual}")]
    Length {
        engine: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Parse failures in the legacy textual checkpoint.
#[derive(Debug, Error)]
pub enum LegacyError {
    #[error("missing <{0}> element")]
    MissingElement(&'static str),
    #[error("invalid number '{token}' in <{element}>")]
    InvalidNumber {
        element: &'static str,
        token: String,
    },
    #[error("<dims> must hold two integers, found {0}")]
    Dims(usize),
    #[error("<dims> {rows} x {state_size} does not fit in memory")]
    Oversized { rows: usize, state_size: usize },
    #[error("<states> holds {actual} words, dims require {expected}")]
    StateCount { expected: usize, actual: usize },
}
