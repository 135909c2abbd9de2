//! Definition types for round-robin database files.
//!
//! A definition fixes the layout of a database file at creation time: the
//! base step, the data sources sampled every step, and the archives that keep
//! consolidated rows for each data source. Once a file exists its layout never
//! changes, which is what makes the file size bounded and predictable.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DefError, Result};
use crate::pool::DatabaseDef;

/// Maximum length of a data source name.
pub const MAX_DS_NAME_LEN: usize = 20;

/// Maximum number of f64 cells a single database file may hold.
///
/// At 8 bytes per cell this caps the data region at 8GB.
const MAX_CELLS: u64 = 1_000_000_000;

/// Complete definition of a database file.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use rrdpool::def::{ArcDef, ConsolidationFn, DsDef, DsKind, RrdDef};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let def = RrdDef::new(
///     "traffic.rrd",
///     1_700_000_000,
///     Duration::from_secs(300),
///     vec![
///         DsDef::new("input", DsKind::Counter, Duration::from_secs(600))?,
///         DsDef::new("output", DsKind::Counter, Duration::from_secs(600))?,
///     ],
///     vec![
///         ArcDef::new(ConsolidationFn::Average, 0.5, 1, 600)?,
///         ArcDef::new(ConsolidationFn::Max, 0.5, 12, 700)?,
///     ],
/// )?;
/// assert_eq!(def.cell_count(), 2 * (600 + 700));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RrdDef {
    /// Where the file lives. Not stored inside the file itself.
    #[serde(skip)]
    pub path: PathBuf,

    /// Timestamp (unix seconds) the database starts at.
    pub start: u64,

    /// Base interval between primary data points.
    #[serde(with = "duration_serde")]
    pub step: Duration,

    /// Data sources, in column order.
    pub data_sources: Vec<DsDef>,

    /// Archives, in file order.
    pub archives: Vec<ArcDef>,
}

impl RrdDef {
    /// Creates and validates a definition.
    ///
    /// # Errors
    ///
    /// Returns [`DefError`] if any part of the definition is invalid.
    pub fn new(
        path: impl Into<PathBuf>,
        start: u64,
        step: Duration,
        data_sources: Vec<DsDef>,
        archives: Vec<ArcDef>,
    ) -> Result<Self> {
        let def = Self {
            path: path.into(),
            start,
            step,
            data_sources,
            archives,
        };
        def.validate()?;
        Ok(def)
    }

    /// Validates the definition.
    ///
    /// # Errors
    ///
    /// Returns [`DefError`] if validation fails.
    pub fn validate(&self) -> Result<()> {
        if self.step.is_zero() {
            return Err(DefError::InvalidParameter {
                reason: "step cannot be zero".to_string(),
            }
            .into());
        }

        if self.data_sources.is_empty() {
            return Err(DefError::NoDataSources.into());
        }
        if self.archives.is_empty() {
            return Err(DefError::NoArchives.into());
        }

        let mut names = HashSet::new();
        for ds in &self.data_sources {
            ds.validate()?;
            if !names.insert(ds.name.as_str()) {
                return Err(DefError::DuplicateDs {
                    name: ds.name.clone(),
                }
                .into());
            }
        }

        let mut seen = HashSet::new();
        for archive in &self.archives {
            archive.validate()?;
            if !seen.insert((archive.consolidation_fn, archive.steps)) {
                return Err(DefError::DuplicateArchive {
                    consolidation_fn: archive.consolidation_fn,
                    steps: archive.steps,
                }
                .into());
            }
        }

        if self.cell_count() > MAX_CELLS {
            return Err(DefError::InvalidParameter {
                reason: format!(
                    "{} cells exceed the limit of {MAX_CELLS}",
                    self.cell_count()
                ),
            }
            .into());
        }

        Ok(())
    }

    /// Returns the number of f64 cells across all archives.
    pub fn cell_count(&self) -> u64 {
        let rows: u64 = self.archives.iter().map(|a| u64::from(a.rows)).sum();
        rows * self.data_sources.len() as u64
    }
}

impl DatabaseDef for RrdDef {
    fn path(&self) -> &Path {
        &self.path
    }
}

/// Definition of a single data source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DsDef {
    /// Name of the data source, unique within a database.
    pub name: String,

    /// How raw samples are interpreted.
    pub kind: DsKind,

    /// Maximum time between samples before the value becomes unknown.
    #[serde(with = "duration_serde")]
    pub heartbeat: Duration,
}

impl DsDef {
    /// Creates and validates a data source definition.
    ///
    /// # Errors
    ///
    /// Returns [`DefError`] if the name or heartbeat is invalid.
    pub fn new(name: impl Into<String>, kind: DsKind, heartbeat: Duration) -> Result<Self> {
        let ds = Self {
            name: name.into(),
            kind,
            heartbeat,
        };
        ds.validate()?;
        Ok(ds)
    }

    /// Validates this data source definition.
    ///
    /// # Errors
    ///
    /// Returns [`DefError`] if validation fails.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| DefError::InvalidDsName {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.is_empty() {
            return Err(invalid("name cannot be empty").into());
        }
        if self.name.len() > MAX_DS_NAME_LEN {
            return Err(invalid("name is longer than 20 characters").into());
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(invalid("only [A-Za-z0-9_] are allowed").into());
        }

        if self.heartbeat.is_zero() {
            return Err(DefError::InvalidParameter {
                reason: format!("heartbeat of data source '{}' cannot be zero", self.name),
            }
            .into());
        }

        Ok(())
    }
}

/// Interpretation of raw samples fed to a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DsKind {
    /// Value is stored as given.
    Gauge,
    /// Monotonic counter; the rate of change is stored.
    Counter,
    /// Like a counter but may decrease.
    Derive,
    /// Counter that resets on every read.
    Absolute,
}

/// Definition of a single archive.
///
/// An archive keeps `rows` consolidated values per data source, each row
/// covering `steps` base steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcDef {
    /// Roll-up function used to build each row.
    pub consolidation_fn: ConsolidationFn,

    /// Fraction of unknown primary points still tolerated in a row.
    pub xff: f64,

    /// Number of base steps per row.
    pub steps: u32,

    /// Number of rows kept before the archive wraps around.
    pub rows: u32,
}

impl ArcDef {
    /// Creates and validates an archive definition.
    ///
    /// # Errors
    ///
    /// Returns [`DefError`] if any parameter is out of range.
    pub fn new(consolidation_fn: ConsolidationFn, xff: f64, steps: u32, rows: u32) -> Result<Self> {
        let archive = Self {
            consolidation_fn,
            xff,
            steps,
            rows,
        };
        archive.validate()?;
        Ok(archive)
    }

    /// Validates this archive definition.
    ///
    /// # Errors
    ///
    /// Returns [`DefError`] if validation fails.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.xff) {
            return Err(DefError::InvalidParameter {
                reason: format!("xff must be in [0, 1), got {}", self.xff),
            }
            .into());
        }
        if self.steps == 0 {
            return Err(DefError::InvalidParameter {
                reason: "archive steps cannot be zero".to_string(),
            }
            .into());
        }
        if self.rows == 0 {
            return Err(DefError::InvalidParameter {
                reason: "archive rows cannot be zero".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Roll-up function that consolidates primary points into archive rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConsolidationFn {
    /// Arithmetic mean.
    Average,
    /// Largest value.
    Max,
    /// Smallest value.
    Min,
    /// Most recent value.
    Last,
}

/// Serde support for Duration fields.
///
/// Durations are serialized as total seconds (f64) so headers and seed
/// documents stay human-readable.
pub(crate) mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
    }
}
