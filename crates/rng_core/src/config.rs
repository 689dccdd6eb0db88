use std::convert::Infallible;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr, PickFirst};

/// Exclusive upper bound of the shared seed offset.
pub const OFFSET_RANGE: u64 = 1_024;

/// Boolean switch that also accepts strings: `no`, `false` and `0` turn it
/// off, any other spelling leaves it on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Toggle(pub bool);

impl Default for Toggle {
    fn default() -> Self {
        Toggle(true)
    }
}

impl FromStr for Toggle {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let off = matches!(s.trim().to_ascii_lowercase().as_str(), "no" | "false" | "0");
        Ok(Toggle(!off))
    }
}

impl fmt::Display for Toggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0 { "yes" } else { "no" })
    }
}

/// Settings for stream initialisation taken from the hosting application.
#[serde_as]
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct RandomConfig {
    /// Lay streams out across every process of the job.
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default)]
    pub parallel: Toggle,
    /// Explicit offset; negative or absent means derive it from the clock.
    #[serde(default)]
    pub seed: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Document {
    #[serde(default)]
    random: Option<RandomConfig>,
}

impl RandomConfig {
    pub fn with_seed(seed: i64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }

    /// Explicit offset reduced into `[0, OFFSET_RANGE)`, if one was given.
    pub fn offset(&self) -> Option<u64> {
        match self.seed {
            Some(seed) if seed >= 0 => Some(seed as u64 % OFFSET_RANGE),
            _ => None,
        }
    }

    pub fn distributed(&self) -> bool {
        self.parallel.0
    }

    /// Load the `random` section of a JSON document from disk.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open config file {:?}", path))?;
        Self::from_reader(BufReader::new(file))
    }

    /// Deserialize from an arbitrary reader; a missing section yields defaults.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let document: Document =
            serde_json::from_reader(reader).context("invalid random config json")?;
        Ok(document.random.unwrap_or_default())
    }
}
