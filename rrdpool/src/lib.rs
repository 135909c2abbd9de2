//! # rrdpool
//!
//! Shared, reference-counted handle pool for round-robin database files.
//!
//! Round-robin databases keep numeric samples in fixed-size circular
//! archives. In a busy process many threads append samples to the same files
//! while others fetch ranges and render graphs from them, and re-opening a
//! file (reading its header, validating its definition, mapping its data) on
//! every access is prohibitively expensive. rrdpool keeps each file open once
//! and hands the same handle to every thread that asks for it.
//!
//! ## Key Properties
//!
//! - One open handle per canonical file path, shared via [`Arc`](std::sync::Arc)
//! - Released files stay open and are reused until the pool is over capacity
//! - A background thread evicts the longest-released files first
//! - A file with outstanding holders is never closed by eviction
//! - Creating a database over a file that is in use is rejected
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use rrdpool::{ArcDef, ConsolidationFn, DsDef, DsKind, Pool, RrdDef};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = Pool::global();
//!
//! // Create a database through the pool
//! let def = RrdDef::new(
//!     "./cpu.rrd",
//!     1_700_000_000,
//!     Duration::from_secs(60),
//!     vec![DsDef::new("usage", DsKind::Gauge, Duration::from_secs(120))?],
//!     vec![ArcDef::new(ConsolidationFn::Average, 0.5, 1, 1440)?],
//! )?;
//! let db = pool.request_new(&def)?;
//! db.write_cell(0, 0, 0, 85.5)?;
//! pool.release(&db)?;
//!
//! // Any thread can now share the open file
//! let db = pool.request("./cpu.rrd")?;
//! println!("{}", db.read_cell(0, 0, 0)?);
//! pool.release(&db)?;
//!
//! print!("{}", pool.dump());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`pool`] — The handle pool, the [`Database`] seam, and the global pool
//! - [`config`] — Pool configuration
//! - [`db`] — [`RrdDb`], the file-backed database handle
//! - [`def`] — Database definitions (data sources, archives)
//! - [`seed`] — JSON seed documents for pre-populated databases
//! - [`error`] — Error types

pub mod config;
pub mod db;
pub mod def;
mod entry;
pub mod error;
mod evict;
pub mod pool;
pub mod seed;

// Re-export primary API types at crate root for convenience.
pub use config::{INITIAL_CAPACITY, PoolConfig};
pub use db::RrdDb;
pub use def::{ArcDef, ConsolidationFn, DsDef, DsKind, RrdDef};
pub use error::{DbError, DefError, PoolError, Result, RrdError, SeedError};
pub use pool::{Database, DatabaseDef, EntrySnapshot, Pool};
pub use seed::Seed;
