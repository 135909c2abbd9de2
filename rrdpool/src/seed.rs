//! JSON seed documents for creating pre-populated database files.
//!
//! A seed carries a full definition plus the initial value of every cell,
//! archive by archive and row by row. `null` marks an unknown value.
//!
//! ```json
//! {
//!   "start": 1700000000,
//!   "step": 60.0,
//!   "data_sources": [{ "name": "temp", "kind": "GAUGE", "heartbeat": 120.0 }],
//!   "archives": [
//!     { "consolidation_fn": "AVERAGE", "xff": 0.5, "steps": 1, "rows": 2,
//!       "values": [[21.5], [null]] }
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::def::{ArcDef, DsDef, RrdDef, duration_serde};
use crate::error::{Result, SeedError};

/// A seed document: definition plus initial cell values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seed {
    /// Timestamp (unix seconds) the database starts at.
    pub start: u64,

    /// Base interval between primary data points.
    #[serde(with = "duration_serde")]
    pub step: Duration,

    /// Data sources, in column order.
    pub data_sources: Vec<DsDef>,

    /// Archives with their rows.
    pub archives: Vec<ArchiveSeed>,
}

/// One archive of a seed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveSeed {
    /// The archive definition.
    #[serde(flatten)]
    pub def: ArcDef,

    /// `rows` rows of one value per data source.
    pub values: Vec<Vec<Option<f64>>>,
}

impl Seed {
    /// Reads and parses a seed document, checking that its values match the
    /// shape of its archives.
    ///
    /// # Errors
    ///
    /// Returns [`SeedError`] if the file cannot be read, parsed, or has the
    /// wrong shape.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        let json = fs::read_to_string(path).map_err(|source| SeedError::Read {
            path: path_str.clone(),
            source,
        })?;
        let seed: Seed = serde_json::from_str(&json).map_err(|source| SeedError::Parse {
            path: path_str.clone(),
            source,
        })?;

        seed.check_shape(&path_str)?;
        Ok(seed)
    }

    /// Builds the definition of a database at `path` from this seed.
    ///
    /// # Errors
    ///
    /// Returns [`DefError`](crate::error::DefError) if the seeded definition
    /// is invalid.
    pub fn definition(&self, path: &Path) -> Result<RrdDef> {
        RrdDef::new(
            path,
            self.start,
            self.step,
            self.data_sources.clone(),
            self.archives.iter().map(|a| a.def.clone()).collect(),
        )
    }

    fn check_shape(&self, path: &str) -> Result<()> {
        let ds_count = self.data_sources.len();
        for (index, archive) in self.archives.iter().enumerate() {
            if archive.values.len() != archive.def.rows as usize {
                return Err(SeedError::Shape {
                    path: path.to_string(),
                    reason: format!(
                        "archive {index} declares {} rows but has {}",
                        archive.def.rows,
                        archive.values.len()
                    ),
                }
                .into());
            }
            if let Some(row) = archive.values.iter().position(|row| row.len() != ds_count) {
                return Err(SeedError::Shape {
                    path: path.to_string(),
                    reason: format!(
                        "archive {index} row {row} has {} values, expected {ds_count}",
                        archive.values[row].len()
                    ),
                }
                .into());
            }
        }
        Ok(())
    }
}
