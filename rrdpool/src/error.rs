//! Error types for the rrdpool handle pool and its database files.

use thiserror::Error;

/// The main error type for all rrdpool operations.
///
/// Pool bookkeeping failures, database file failures, definition validation
/// and seed import each have their own enum; this one wraps them so every
/// public operation can return [`Result`].
#[derive(Error, Debug)]
pub enum RrdError {
    /// Error raised by the handle pool itself.
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    /// Error opening, creating, closing or accessing a database file.
    #[error("database error: {0}")]
    Db(#[from] DbError),

    /// Error validating a database definition.
    #[error("definition error: {0}")]
    Def(#[from] DefError),

    /// Error reading a seed document.
    #[error("seed error: {0}")]
    Seed(#[from] SeedError),
}

/// Errors raised by the handle pool.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The path could not be resolved to its canonical form.
    #[error("failed to canonicalize '{path}': {source}")]
    Canonicalize {
        /// The path as supplied by the caller.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A new database was requested at a path whose handle is still in use.
    #[error("cannot create database '{path}': file is already active in the pool")]
    ActiveConflict {
        /// The canonical path of the active entry.
        path: String,
    },

    /// A handle was released after it had been closed.
    #[error("cannot release '{path}': handle is already closed")]
    AlreadyClosed {
        /// The path of the closed handle.
        path: String,
    },

    /// A resident handle was closed behind the pool's back.
    #[error("database '{path}' was closed while resident in the pool")]
    ClosedInPool {
        /// The canonical path of the dropped entry.
        path: String,
    },

    /// A handle was released that the pool does not know about.
    #[error("cannot release '{path}': file is not in the pool")]
    NotInPool {
        /// The canonical path that has no entry.
        path: String,
    },
}

/// Errors raised by a database file.
#[derive(Error, Debug)]
pub enum DbError {
    /// I/O on the database file failed.
    #[error("I/O error on database '{path}': {source}")]
    Io {
        /// The database file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The database file is corrupted or not a database file at all.
    #[error("database '{path}' is corrupted: {reason}")]
    Corrupted {
        /// The database file path.
        path: String,
        /// Description of what was invalid.
        reason: String,
    },

    /// The embedded definition header could not be encoded or decoded.
    #[error("invalid definition header in '{path}': {source}")]
    Header {
        /// The database file path.
        path: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The handle has been closed.
    #[error("database '{path}' is closed")]
    Closed {
        /// The database file path.
        path: String,
    },

    /// A cell address lies outside the database layout.
    #[error("cell archive={archive} row={row} ds={ds} is outside the layout of '{path}'")]
    OutOfBounds {
        /// The database file path.
        path: String,
        /// Requested archive index.
        archive: usize,
        /// Requested row index.
        row: usize,
        /// Requested data source index.
        ds: usize,
    },
}

/// Errors raised while validating a database definition.
#[derive(Error, Debug)]
pub enum DefError {
    /// The definition has no data sources.
    #[error("at least one data source must be defined")]
    NoDataSources,

    /// The definition has no archives.
    #[error("at least one archive must be defined")]
    NoArchives,

    /// A data source name is empty, too long, or uses invalid characters.
    #[error("invalid data source name '{name}': {reason}")]
    InvalidDsName {
        /// The offending name.
        name: String,
        /// Why the name is invalid.
        reason: String,
    },

    /// Two data sources share a name.
    #[error("duplicate data source name '{name}'")]
    DuplicateDs {
        /// The duplicated name.
        name: String,
    },

    /// Two archives have identical consolidation function and step count.
    #[error("duplicate archive definition: {consolidation_fn:?} with {steps} steps")]
    DuplicateArchive {
        /// The consolidation function of the duplicate.
        consolidation_fn: crate::def::ConsolidationFn,
        /// The step count of the duplicate.
        steps: u32,
    },

    /// A step, heartbeat, or archive parameter is out of range.
    #[error("invalid definition: {reason}")]
    InvalidParameter {
        /// Description of the invalid parameter.
        reason: String,
    },
}

/// Errors raised while importing a seed document.
#[derive(Error, Debug)]
pub enum SeedError {
    /// The seed file could not be read.
    #[error("failed to read seed '{path}': {source}")]
    Read {
        /// The seed file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The seed file is not a valid seed document.
    #[error("failed to parse seed '{path}': {source}")]
    Parse {
        /// The seed file path.
        path: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The seeded values do not match the seeded definition.
    #[error("seed '{path}' does not match its definition: {reason}")]
    Shape {
        /// The seed file path.
        path: String,
        /// Description of the mismatch.
        reason: String,
    },
}

/// Type alias for `Result<T, RrdError>`.
pub type Result<T> = std::result::Result<T, RrdError>;
