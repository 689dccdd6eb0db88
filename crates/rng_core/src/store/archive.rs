use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::Hyperslab;
use crate::error::StoreError;

/// Dense row-major array of state words.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub shape: Vec<usize>,
    pub data: Vec<u64>,
}

impl Dataset {
    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            data: vec![0; shape.iter().product()],
        }
    }

    /// Number of words the shape calls for; `None` if it overflows.
    fn expected_len(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |len, &dim| len.checked_mul(dim))
    }

    fn check(&self, path: &Path, key: &str) -> Result<(), StoreError> {
        if self.expected_len() == Some(self.data.len()) {
            Ok(())
        } else {
            Err(StoreError::Truncated {
                path: path.to_path_buf(),
                key: key.to_string(),
                shape: self.shape.clone(),
                actual: self.data.len(),
            })
        }
    }
}

/// In-memory image of a checkpoint archive, keyed by dataset path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    datasets: BTreeMap<String, Dataset>,
}

impl Archive {
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let file = File::open(path).map_err(|err| StoreError::io(path, err))?;
        let archive: Self =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| {
                StoreError::Malformed {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
        for (key, dataset) in &archive.datasets {
            dataset.check(path, key)?;
        }
        Ok(archive)
    }

    pub fn persist(&self, path: &Path) -> Result<(), StoreError> {
        let file = File::create(path).map_err(|err| StoreError::io(path, err))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self).map_err(|source| StoreError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        writer.flush().map_err(|err| StoreError::io(path, err))
    }

    pub fn dataset(&self, key: &str) -> Option<&Dataset> {
        self.datasets.get(key)
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Copy `words` into the selected region, creating the dataset on first touch.
    pub fn write_slab(
        &mut self,
        key: &str,
        slab: &Hyperslab,
        words: &[u64],
    ) -> Result<(), StoreError> {
        slab.validate(words.len())?;
        let dataset = self
            .datasets
            .entry(key.to_string())
            .or_insert_with(|| Dataset::zeros(&slab.shape));
        if dataset.shape != slab.shape {
            return Err(StoreError::ShapeConflict {
                path: key.to_string(),
                stored: dataset.shape.clone(),
                requested: slab.shape.clone(),
            });
        }
        slab.for_each_run(|start, offset, len| {
            dataset.data[start..start + len].copy_from_slice(&words[offset..offset + len]);
        });
        Ok(())
    }

    pub fn read_slab(
        &self,
        key: &str,
        slab: &Hyperslab,
        out: &mut [u64],
    ) -> Result<(), StoreError> {
        slab.validate(out.len())?;
        let dataset = self
            .datasets
            .get(key)
            .ok_or_else(|| StoreError::MissingDataset(key.to_string()))?;
        if dataset.shape != slab.shape {
            return Err(StoreError::ShapeConflict {
                path: key.to_string(),
                stored: dataset.shape.clone(),
                requested: slab.shape.clone(),
            });
        }
        slab.for_each_run(|start, offset, len| {
            out[offset..offset + len].copy_from_slice(&dataset.data[start..start + len]);
        });
        Ok(())
    }
}
