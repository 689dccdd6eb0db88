use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::{Archive, GroupPath, Hyperslab, StoreProvider, StructuredStore};
use crate::comm::Communicator;
use crate::error::StoreError;

type Files = BTreeMap<PathBuf, Archive>;

/// Parallel-capable volume shared by every rank of an in-process job.
///
/// Each rank writes its own hyperslabs straight into the shared archive image;
/// closing a writable handle persists the image, so the file on disk is
/// complete once every rank has closed.
#[derive(Clone, Debug, Default)]
pub struct SharedVolume {
    files: Arc<Mutex<Files>>,
}

impl SharedVolume {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(files: &Mutex<Files>) -> Result<MutexGuard<'_, Files>, StoreError> {
        files.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl StoreProvider for SharedVolume {
    fn is_parallel(&self) -> bool {
        true
    }

    fn create(
        &self,
        path: &Path,
        comm: &dyn Communicator,
    ) -> Result<Box<dyn StructuredStore>, StoreError> {
        let created = if comm.is_root() {
            let fresh = Archive::default();
            let persisted = fresh.persist(path);
            Self::lock(&self.files)?.insert(path.to_path_buf(), fresh);
            persisted
        } else {
            Ok(())
        };
        // Nobody writes until the root has truncated the file.
        comm.barrier()?;
        created?;
        Ok(Box::new(SharedStore::new(self, path, true)))
    }

    fn open(
        &self,
        path: &Path,
        _comm: &dyn Communicator,
    ) -> Result<Box<dyn StructuredStore>, StoreError> {
        let mut files = Self::lock(&self.files)?;
        if !files.contains_key(path) {
            let archive = Archive::load(path)?;
            files.insert(path.to_path_buf(), archive);
        }
        Ok(Box::new(SharedStore::new(self, path, false)))
    }
}

/// One rank's handle on a [`SharedVolume`] file.
#[derive(Debug)]
pub struct SharedStore {
    files: Arc<Mutex<Files>>,
    path: PathBuf,
    writable: bool,
    groups: GroupPath,
}

impl SharedStore {
    fn new(volume: &SharedVolume, path: &Path, writable: bool) -> Self {
        Self {
            files: Arc::clone(&volume.files),
            path: path.to_path_buf(),
            writable,
            groups: GroupPath::default(),
        }
    }

    fn with_archive<T>(
        &self,
        f: impl FnOnce(&mut Archive) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut files = SharedVolume::lock(&self.files)?;
        let archive = files
            .entry(self.path.clone())
            .or_insert_with(Archive::default);
        f(archive)
    }
}

impl StructuredStore for SharedStore {
    fn is_parallel(&self) -> bool {
        true
    }

    fn push(&mut self, group: &str) {
        self.groups.push(group);
    }

    fn pop(&mut self) -> Result<(), StoreError> {
        self.groups.pop()
    }

    fn dataset_shape(&self, tag: &str) -> Result<Option<Vec<usize>>, StoreError> {
        let key = self.groups.key(tag);
        self.with_archive(|archive| Ok(archive.dataset(&key).map(|d| d.shape.clone())))
    }

    fn read(&mut self, tag: &str, slab: &Hyperslab, out: &mut [u64]) -> Result<(), StoreError> {
        let key = self.groups.key(tag);
        debug!(path = %self.path.display(), %key, offsets = ?slab.offsets, "parallel read");
        self.with_archive(|archive| archive.read_slab(&key, slab, out))
    }

    fn write(&mut self, tag: &str, slab: &Hyperslab, words: &[u64]) -> Result<(), StoreError> {
        let key = self.groups.key(tag);
        debug!(path = %self.path.display(), %key, offsets = ?slab.offsets, "parallel write");
        self.with_archive(|archive| archive.write_slab(&key, slab, words))
    }

    fn close(self: Box<Self>) -> Result<(), StoreError> {
        if !self.writable {
            return Ok(());
        }
        let path = self.path.clone();
        self.with_archive(|archive| archive.persist(&path))
    }
}
