//! File-backed round-robin database handle.
//!
//! An [`RrdDb`] is one open database file. Opening a file reads and validates
//! its header and definition, then memory-maps the data region; this is the
//! cost the pool amortizes by sharing a single open handle between threads.
//!
//! # File Format
//!
//! ```text
//! [0..16)            Header: magic "RRDP", version u32, definition length u32, reserved u32
//! [16..16+N)         JSON-encoded definition (N = definition length)
//! [16+N..)           Data region: archives in definition order, each
//!                    rows × data_sources little-endian f64 cells
//! ```
//!
//! All integers are little-endian. Unknown values are stored as NaN.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use parking_lot::Mutex;
use tracing::debug;

use crate::def::RrdDef;
use crate::error::{DbError, Result};
use crate::pool::Database;
use crate::seed::Seed;

/// Magic bytes identifying a database file.
const DB_MAGIC: [u8; 4] = *b"RRDP";

/// Current file format version.
const DB_VERSION: u32 = 1;

/// Size of the fixed header in bytes.
const HEADER_SIZE: usize = 16;

/// Size of a single value cell in bytes.
const CELL_SIZE: usize = 8;

/// Byte layout of a database file, derived from its definition.
#[derive(Debug, Clone)]
struct DbLayout {
    /// Byte offset of the first data cell.
    data_offset: usize,
    /// Number of data sources (cells per row).
    ds_count: usize,
    /// First cell index and row count for each archive.
    archives: Vec<(usize, usize)>,
    /// Total file size in bytes.
    file_size: usize,
}

impl DbLayout {
    fn new(def: &RrdDef, header_len: usize) -> Self {
        let ds_count = def.data_sources.len();
        let data_offset = HEADER_SIZE + header_len;

        let mut archives = Vec::with_capacity(def.archives.len());
        let mut next_cell = 0;
        for archive in &def.archives {
            let rows = archive.rows as usize;
            archives.push((next_cell, rows));
            next_cell += rows * ds_count;
        }

        Self {
            data_offset,
            ds_count,
            archives,
            file_size: data_offset + next_cell * CELL_SIZE,
        }
    }

    /// Returns the byte offset of a cell, or `None` if it is out of bounds.
    fn cell_offset(&self, archive: usize, row: usize, ds: usize) -> Option<usize> {
        let &(first_cell, rows) = self.archives.get(archive)?;
        if row >= rows || ds >= self.ds_count {
            return None;
        }
        Some(self.data_offset + (first_cell + row * self.ds_count + ds) * CELL_SIZE)
    }
}

fn encode_header(header_len: u32) -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    buf[0..4].copy_from_slice(&DB_MAGIC);
    buf[4..8].copy_from_slice(&DB_VERSION.to_le_bytes());
    buf[8..12].copy_from_slice(&header_len.to_le_bytes());
    buf
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

/// An open round-robin database file.
///
/// # Thread Safety
///
/// `RrdDb` is `Send + Sync`. The mapping sits behind a mutex, so one handle
/// can be shared by any number of reader and writer threads. After
/// [`close`](RrdDb::close) every cell access fails with [`DbError::Closed`].
#[derive(Debug)]
pub struct RrdDb {
    /// Path the file was opened or created with.
    path: PathBuf,
    /// Definition read from (or written to) the file header.
    def: RrdDef,
    /// Pre-computed layout for cell addressing.
    layout: DbLayout,
    /// The mapping, `None` once closed.
    mmap: Mutex<Option<MmapMut>>,
}

impl RrdDb {
    /// Creates a new database file from a definition.
    ///
    /// Any file already present at the definition's path is replaced. Every
    /// cell starts out unknown (NaN).
    ///
    /// # Errors
    ///
    /// Returns [`DefError`](crate::error::DefError) if the definition is
    /// invalid and [`DbError`] if the file cannot be written or mapped.
    pub fn create(def: &RrdDef) -> Result<Self> {
        def.validate()?;

        let path = def.path.clone();
        let path_str = path.display().to_string();
        let io_err = |source| DbError::Io {
            path: path_str.clone(),
            source,
        };

        let header = serde_json::to_vec(def).map_err(|source| DbError::Header {
            path: path_str.clone(),
            source,
        })?;
        let header_len = u32::try_from(header.len()).map_err(|_| DbError::Corrupted {
            path: path_str.clone(),
            reason: format!("definition header of {} bytes is too large", header.len()),
        })?;

        let layout = DbLayout::new(def, header.len());

        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(io_err)?;
        file.set_len(layout.file_size as u64).map_err(io_err)?;

        // SAFETY: The file was just created with the exact layout size and is
        // only reachable through this handle's mutex.
        let mut mmap = unsafe { MmapMut::map_mut(&file).map_err(io_err)? };

        mmap[..HEADER_SIZE].copy_from_slice(&encode_header(header_len));
        mmap[HEADER_SIZE..layout.data_offset].copy_from_slice(&header);
        let unknown = f64::NAN.to_le_bytes();
        for cell in mmap[layout.data_offset..].chunks_exact_mut(CELL_SIZE) {
            cell.copy_from_slice(&unknown);
        }

        debug!(path = %path_str, cells = def.cell_count(), "created database file");

        Ok(Self {
            path,
            def: def.clone(),
            layout,
            mmap: Mutex::new(Some(mmap)),
        })
    }

    /// Opens an existing database file.
    ///
    /// Validates the header, parses the definition and checks that the file
    /// size matches the layout the definition implies.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the file cannot be opened or is not a valid
    /// database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let path_str = path.display().to_string();
        let corrupted = |reason: String| DbError::Corrupted {
            path: path_str.clone(),
            reason,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| DbError::Io {
                path: path_str.clone(),
                source,
            })?;

        let file_len = file
            .metadata()
            .map_err(|source| DbError::Io {
                path: path_str.clone(),
                source,
            })?
            .len();
        if file_len < HEADER_SIZE as u64 {
            return Err(corrupted(format!(
                "file too small: {file_len} bytes, expected at least {HEADER_SIZE}"
            ))
            .into());
        }

        // SAFETY: The file is open read/write and is at least HEADER_SIZE bytes.
        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|source| DbError::Io {
                path: path_str.clone(),
                source,
            })?
        };

        if mmap[0..4] != DB_MAGIC {
            return Err(corrupted(format!(
                "invalid magic bytes: expected {:?}, found {:?}",
                DB_MAGIC,
                &mmap[0..4]
            ))
            .into());
        }
        let version = read_u32(&mmap, 4);
        if version != DB_VERSION {
            return Err(corrupted(format!(
                "unsupported version: expected {DB_VERSION}, found {version}"
            ))
            .into());
        }

        let header_len = read_u32(&mmap, 8) as usize;
        if HEADER_SIZE + header_len > mmap.len() {
            return Err(corrupted(format!(
                "definition header of {header_len} bytes runs past end of file"
            ))
            .into());
        }

        let mut def: RrdDef = serde_json::from_slice(&mmap[HEADER_SIZE..HEADER_SIZE + header_len])
            .map_err(|source| DbError::Header {
                path: path_str.clone(),
                source,
            })?;
        def.path = path.clone();
        def.validate()?;

        let layout = DbLayout::new(&def, header_len);
        if mmap.len() != layout.file_size {
            return Err(corrupted(format!(
                "file size mismatch: {} bytes, expected {}",
                mmap.len(),
                layout.file_size
            ))
            .into());
        }

        debug!(path = %path_str, "opened database file");

        Ok(Self {
            path,
            def,
            layout,
            mmap: Mutex::new(Some(mmap)),
        })
    }

    /// Creates a new database file at `path` from a JSON seed document.
    ///
    /// The seed supplies both the definition and the initial cell values.
    ///
    /// # Errors
    ///
    /// Returns [`SeedError`](crate::error::SeedError) if the seed cannot be
    /// read or does not match its own definition, and [`DbError`] if the
    /// file cannot be created.
    pub fn create_from_seed<P: AsRef<Path>, S: AsRef<Path>>(path: P, seed_path: S) -> Result<Self> {
        let seed = Seed::load(seed_path)?;
        let def = seed.definition(path.as_ref())?;

        let db = Self::create(&def)?;
        {
            let mut guard = db.mmap.lock();
            let mmap = guard.as_mut().ok_or_else(|| db.closed())?;
            for (archive, rows) in seed.archives.iter().enumerate() {
                for (row, values) in rows.values.iter().enumerate() {
                    for (ds, value) in values.iter().enumerate() {
                        let offset = db.offset(archive, row, ds)?;
                        mmap[offset..offset + CELL_SIZE]
                            .copy_from_slice(&value.unwrap_or(f64::NAN).to_le_bytes());
                    }
                }
            }
        }

        debug!(path = %db.path.display(), "seeded database file");
        Ok(db)
    }

    /// Returns the definition of this database.
    pub fn definition(&self) -> &RrdDef {
        &self.def
    }

    /// Returns the path this database was opened or created with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads a single cell.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::OutOfBounds`] for an invalid address and
    /// [`DbError::Closed`] if the handle has been closed.
    pub fn read_cell(&self, archive: usize, row: usize, ds: usize) -> Result<f64> {
        let offset = self.offset(archive, row, ds)?;
        let guard = self.mmap.lock();
        let mmap = guard.as_ref().ok_or_else(|| self.closed())?;

        let mut bytes = [0u8; CELL_SIZE];
        bytes.copy_from_slice(&mmap[offset..offset + CELL_SIZE]);
        Ok(f64::from_le_bytes(bytes))
    }

    /// Writes a single cell.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::OutOfBounds`] for an invalid address and
    /// [`DbError::Closed`] if the handle has been closed.
    pub fn write_cell(&self, archive: usize, row: usize, ds: usize, value: f64) -> Result<()> {
        let offset = self.offset(archive, row, ds)?;
        let mut guard = self.mmap.lock();
        let mmap = guard.as_mut().ok_or_else(|| self.closed())?;

        mmap[offset..offset + CELL_SIZE].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Flushes outstanding changes to disk.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Io`] if the flush fails and [`DbError::Closed`] if
    /// the handle has been closed.
    pub fn sync(&self) -> Result<()> {
        let guard = self.mmap.lock();
        let mmap = guard.as_ref().ok_or_else(|| self.closed())?;
        mmap.flush().map_err(|source| {
            DbError::Io {
                path: self.path.display().to_string(),
                source,
            }
            .into()
        })
    }

    /// Flushes and unmaps the file. Closing a closed handle does nothing.
    ///
    /// The mapping is released even when the flush fails.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Io`] if the final flush fails.
    pub fn close(&self) -> Result<()> {
        let Some(mmap) = self.mmap.lock().take() else {
            return Ok(());
        };
        mmap.flush().map_err(|source| DbError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        debug!(path = %self.path.display(), "closed database file");
        Ok(())
    }

    /// Returns `true` once [`close`](RrdDb::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.mmap.lock().is_none()
    }

    fn offset(&self, archive: usize, row: usize, ds: usize) -> Result<usize> {
        self.layout.cell_offset(archive, row, ds).ok_or_else(|| {
            DbError::OutOfBounds {
                path: self.path.display().to_string(),
                archive,
                row,
                ds,
            }
            .into()
        })
    }

    fn closed(&self) -> DbError {
        DbError::Closed {
            path: self.path.display().to_string(),
        }
    }
}

impl Database for RrdDb {
    type Def = RrdDef;

    fn open(path: &Path) -> Result<Self> {
        RrdDb::open(path)
    }

    fn create(def: &RrdDef) -> Result<Self> {
        RrdDb::create(def)
    }

    fn create_from_seed(path: &Path, seed_path: &Path) -> Result<Self> {
        RrdDb::create_from_seed(path, seed_path)
    }

    fn close(&self) -> Result<()> {
        RrdDb::close(self)
    }

    fn is_closed(&self) -> bool {
        RrdDb::is_closed(self)
    }

    fn path(&self) -> &Path {
        RrdDb::path(self)
    }
}
