//! Hierarchical array store addressed by group path and hyperslab.

mod archive;
mod file;
mod shared;

pub use archive::{Archive, Dataset};
pub use file::{FileProvider, FileStore};
pub use shared::{SharedStore, SharedVolume};

use std::path::Path;

use crate::comm::Communicator;
use crate::error::StoreError;

/// Rectangular region of a row-major array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hyperslab {
    pub shape: Vec<usize>,
    pub counts: Vec<usize>,
    pub offsets: Vec<usize>,
}

impl Hyperslab {
    /// Select the whole array.
    pub fn full(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            counts: shape.to_vec(),
            offsets: vec![0; shape.len()],
        }
    }

    /// Select `rows` complete rows of a 2-D array starting at `first_row`.
    pub fn rows(shape: [usize; 2], first_row: usize, rows: usize) -> Self {
        Self {
            shape: shape.to_vec(),
            counts: vec![rows, shape[1]],
            offsets: vec![first_row, 0],
        }
    }

    /// Number of elements selected.
    pub fn selected(&self) -> usize {
        self.counts.iter().product()
    }

    pub fn total(&self) -> usize {
        self.shape.iter().product()
    }

    pub(crate) fn validate(&self, buffer_len: usize) -> Result<(), StoreError> {
        let fits = !self.shape.is_empty()
            && self.counts.len() == self.shape.len()
            && self.offsets.len() == self.shape.len()
            && self
                .shape
                .iter()
                .zip(&self.counts)
                .zip(&self.offsets)
                .all(|((&dim, &count), &offset)| offset + count <= dim);
        if !fits {
            return Err(StoreError::OutOfBounds {
                shape: self.shape.clone(),
                counts: self.counts.clone(),
                offsets: self.offsets.clone(),
            });
        }
        if buffer_len != self.selected() {
            return Err(StoreError::BufferLength {
                expected: self.selected(),
                actual: buffer_len,
            });
        }
        Ok(())
    }

    /// Visit each contiguous run as `(array_start, buffer_start, len)`.
    pub(crate) fn for_each_run<F: FnMut(usize, usize, usize)>(&self, mut visit: F) {
        let rank = self.shape.len();
        let run = self.counts[rank - 1];
        let outer: usize = self.counts[..rank - 1].iter().product();
        if run == 0 || outer == 0 {
            return;
        }

        let mut strides = vec![1usize; rank];
        for axis in (0..rank - 1).rev() {
            strides[axis] = strides[axis + 1] * self.shape[axis + 1];
        }

        let mut index = vec![0usize; rank - 1];
        for block in 0..outer {
            let mut start = self.offsets[rank - 1];
            for axis in 0..rank - 1 {
                start += (self.offsets[axis] + index[axis]) * strides[axis];
            }
            visit(start, block * run, run);

            for axis in (0..rank - 1).rev() {
                index[axis] += 1;
                if index[axis] < self.counts[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }
    }
}

/// Stack of open groups; datasets are keyed by their full path.
#[derive(Clone, Debug, Default)]
pub(crate) struct GroupPath {
    stack: Vec<String>,
}

impl GroupPath {
    pub(crate) fn push(&mut self, group: &str) {
        self.stack.push(group.to_string());
    }

    pub(crate) fn pop(&mut self) -> Result<(), StoreError> {
        self.stack.pop().map(|_| ()).ok_or(StoreError::GroupUnderflow)
    }

    pub(crate) fn key(&self, tag: &str) -> String {
        let mut key = self.stack.join("/");
        if !key.is_empty() {
            key.push('/');
        }
        key.push_str(tag);
        key
    }
}

/// One rank's handle on an open checkpoint archive.
pub trait StructuredStore {
    /// Whether every rank may access its own region directly.
    fn is_parallel(&self) -> bool;

    fn push(&mut self, group: &str);

    fn pop(&mut self) -> Result<(), StoreError>;

    /// Shape of the dataset `tag` in the current group, if present.
    fn dataset_shape(&self, tag: &str) -> Result<Option<Vec<usize>>, StoreError>;

    fn read(&mut self, tag: &str, slab: &Hyperslab, out: &mut [u64]) -> Result<(), StoreError>;

    fn write(&mut self, tag: &str, slab: &Hyperslab, words: &[u64]) -> Result<(), StoreError>;

    fn close(self: Box<Self>) -> Result<(), StoreError>;
}

/// Opens stores on behalf of one rank of a job.
pub trait StoreProvider {
    /// Capability of the stores this provider hands out.
    fn is_parallel(&self) -> bool;

    fn create(
        &self,
        path: &Path,
        comm: &dyn Communicator,
    ) -> Result<Box<dyn StructuredStore>, StoreError>;

    fn open(
        &self,
        path: &Path,
        comm: &dyn Communicator,
    ) -> Result<Box<dyn StructuredStore>, StoreError>;
}
