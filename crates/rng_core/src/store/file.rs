use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{Archive, GroupPath, Hyperslab, StoreProvider, StructuredStore};
use crate::comm::Communicator;
use crate::error::StoreError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Read,
    Create,
    /// Non-root ranks: every access is a no-op.
    NoIo,
}

/// Single-writer archive on the local file system.
///
/// Only the root rank touches the file. Other ranks hold a handle that accepts
/// every call and performs no I/O, so their data must travel through the root.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    mode: Mode,
    archive: Archive,
    groups: GroupPath,
}

impl FileStore {
    pub fn create(path: &Path, root: bool) -> Result<Self, StoreError> {
        let mode = if root {
            File::create(path).map_err(|err| StoreError::io(path, err))?;
            Mode::Create
        } else {
            Mode::NoIo
        };
        Ok(Self::with_archive(path, mode, Archive::default()))
    }

    pub fn open(path: &Path, root: bool) -> Result<Self, StoreError> {
        if root {
            let archive = Archive::load(path)?;
            Ok(Self::with_archive(path, Mode::Read, archive))
        } else {
            Ok(Self::with_archive(path, Mode::NoIo, Archive::default()))
        }
    }

    fn with_archive(path: &Path, mode: Mode, archive: Archive) -> Self {
        Self {
            path: path.to_path_buf(),
            mode,
            archive,
            groups: GroupPath::default(),
        }
    }
}

impl StructuredStore for FileStore {
    fn is_parallel(&self) -> bool {
        false
    }

    fn push(&mut self, group: &str) {
        self.groups.push(group);
    }

    fn pop(&mut self) -> Result<(), StoreError> {
        self.groups.pop()
    }

    fn dataset_shape(&self, tag: &str) -> Result<Option<Vec<usize>>, StoreError> {
        Ok(self
            .archive
            .dataset(&self.groups.key(tag))
            .map(|dataset| dataset.shape.clone()))
    }

    fn read(&mut self, tag: &str, slab: &Hyperslab, out: &mut [u64]) -> Result<(), StoreError> {
        if self.mode == Mode::NoIo {
            return Ok(());
        }
        let key = self.groups.key(tag);
        debug!(path = %self.path.display(), %key, words = out.len(), "read");
        self.archive.read_slab(&key, slab, out)
    }

    fn write(&mut self, tag: &str, slab: &Hyperslab, words: &[u64]) -> Result<(), StoreError> {
        if self.mode == Mode::NoIo {
            return Ok(());
        }
        let key = self.groups.key(tag);
        debug!(path = %self.path.display(), %key, words = words.len(), "write");
        self.archive.write_slab(&key, slab, words)
    }

    fn close(self: Box<Self>) -> Result<(), StoreError> {
        match self.mode {
            Mode::Create => self.archive.persist(&self.path),
            Mode::Read | Mode::NoIo => Ok(()),
        }
    }
}

/// Provider for [`FileStore`] handles.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileProvider;

impl StoreProvider for FileProvider {
    fn is_parallel(&self) -> bool {
        false
    }

    fn create(
        &self,
        path: &Path,
        comm: &dyn Communicator,
    ) -> Result<Box<dyn StructuredStore>, StoreError> {
        Ok(Box::new(FileStore::create(path, comm.is_root())?))
    }

    fn open(
        &self,
        path: &Path,
        comm: &dyn Communicator,
    ) -> Result<Box<dyn StructuredStore>, StoreError> {
        Ok(Box::new(FileStore::open(path, comm.is_root())?))
    }
}
