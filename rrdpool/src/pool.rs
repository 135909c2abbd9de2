//! Shared, reference-counted pool of open database handles.
//!
//! Opening a database file means reading and validating its header and
//! mapping its data, which is too expensive to repeat on every access when
//! many threads update, fetch, and graph the same files. The pool opens each
//! file once and hands the same [`Arc`] handle to every thread asking for it.
//!
//! # Lifecycle
//!
//! - [`Pool::request`] returns the resident handle for a path, opening the
//!   file on first use, and counts the caller as a holder.
//! - [`Pool::release`] gives a handle back. A file nobody holds stays open and
//!   is handed out again on the next request.
//! - A background eviction thread closes released files, longest-released
//!   first, whenever more files than [`Pool::capacity`] are resident. Files
//!   that still have holders are never closed by eviction.
//!
//! Never call `close` on a pooled handle; the pool owns closing.
//!
//! # Locking
//!
//! One mutex guards the whole pool. Request, release, create, reset and the
//! eviction sweep each run as a single critical section, including any file
//! open or create they perform.
//!
//! # Example
//!
//! ```rust,no_run
//! use rrdpool::Pool;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = Pool::global();
//!
//! let db = pool.request("/var/lib/rrd/traffic.rrd")?;
//! let latest = db.read_cell(0, 0, 0)?;
//! println!("latest: {latest}");
//! pool.release(&db)?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::db::RrdDb;
use crate::entry::Entry;
use crate::error::{PoolError, Result, RrdError};
use crate::evict;

/// A definition that names the file it creates.
pub trait DatabaseDef {
    /// Path of the file the definition describes.
    fn path(&self) -> &Path;
}

/// A database file the pool can open, create, and close.
///
/// Implementations must be shareable across threads: the pool hands the
/// same instance to every holder of a path.
pub trait Database: Send + Sync + Sized + 'static {
    /// Definition type used to create new files.
    type Def: DatabaseDef;

    /// Opens an existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or is invalid.
    fn open(path: &Path) -> Result<Self>;

    /// Creates a new file from a definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the definition is invalid or the file cannot be
    /// written.
    fn create(def: &Self::Def) -> Result<Self>;

    /// Creates a new file at `path` from a seed document.
    ///
    /// # Errors
    ///
    /// Returns an error if the seed cannot be read or the file cannot be
    /// written.
    fn create_from_seed(path: &Path, seed_path: &Path) -> Result<Self>;

    /// Closes the file. Closing a closed handle must succeed.
    ///
    /// # Errors
    ///
    /// Returns an error if outstanding data cannot be flushed.
    fn close(&self) -> Result<()>;

    /// Returns `true` once the handle has been closed.
    fn is_closed(&self) -> bool;

    /// Path the handle was opened or created with.
    fn path(&self) -> &Path;
}

/// State guarded by the pool mutex.
#[derive(Debug)]
pub(crate) struct PoolState<D> {
    /// Resident entries keyed by canonical path.
    pub entries: HashMap<PathBuf, Entry<D>>,
    /// Soft bound on resident entries.
    pub capacity: usize,
    /// Set when the owning pool is dropped; stops the eviction thread.
    pub shutdown: bool,
    /// Logical clock stamped on entries when they are released.
    release_clock: u64,
}

impl<D> PoolState<D> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            shutdown: false,
            release_clock: 0,
        }
    }

    pub fn next_tick(&mut self) -> u64 {
        self.release_clock += 1;
        self.release_clock
    }
}

/// Pool state plus the condition variable the eviction thread waits on.
#[derive(Debug)]
pub(crate) struct Shared<D> {
    pub state: Mutex<PoolState<D>>,
    pub changed: Condvar,
}

/// Point-in-time view of one resident entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
    /// Canonical path of the file.
    pub path: PathBuf,
    /// Number of outstanding holders.
    pub usage_count: usize,
    /// How long the entry has been released, if it has no holders.
    pub idle_for: Option<Duration>,
}

impl fmt::Display for EntrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.path.display(), self.usage_count)
    }
}

/// Pool of shared database handles.
///
/// Most programs use the process-wide [`Pool::global`]. [`Pool::new`] builds
/// a private pool with its own eviction thread; dropping it stops that thread
/// and closes every resident file.
#[derive(Debug)]
pub struct Pool<D: Database = RrdDb> {
    shared: Arc<Shared<D>>,
    evictor: Option<JoinHandle<()>>,
}

impl Pool<RrdDb> {
    /// Returns the process-wide pool, creating it and starting its eviction
    /// thread on first use.
    ///
    /// # Panics
    ///
    /// Panics if the eviction thread cannot be spawned.
    pub fn global() -> &'static Pool<RrdDb> {
        static GLOBAL: OnceLock<Pool<RrdDb>> = OnceLock::new();
        GLOBAL.get_or_init(|| Pool::new(PoolConfig::default()))
    }
}

impl<D: Database> Pool<D> {
    /// Creates a pool and starts its eviction thread.
    ///
    /// # Panics
    ///
    /// Panics if the eviction thread cannot be spawned.
    pub fn new(config: PoolConfig) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState::new(config.capacity)),
            changed: Condvar::new(),
        });

        let evictor = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(config.evictor_thread_name.clone())
                .spawn(move || evict::run(&shared))
                .expect("failed to spawn pool eviction thread")
        };

        debug!(capacity = config.capacity, "pool created");

        Self {
            shared,
            evictor: Some(evictor),
        }
    }

    /// Returns a handle to the existing file at `path`.
    ///
    /// If the file is resident, its handle is shared and no I/O happens.
    /// Otherwise the file is opened and becomes resident. Either way the
    /// caller becomes a holder and must [`release`](Pool::release) the handle.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Canonicalize`] if the path cannot be resolved,
    /// [`PoolError::ClosedInPool`] if the resident handle was closed by a
    /// holder, and any error from opening the file.
    pub fn request<P: AsRef<Path>>(&self, path: P) -> Result<Arc<D>> {
        let path = path.as_ref();
        let key = canonical_path(path)?;
        let mut state = self.shared.state.lock();

        if let Some(entry) = state.entries.get_mut(&key)
            && !entry.db().is_closed()
        {
            let db = entry.acquire();
            debug!(path = %key.display(), usage = entry.usage_count(), "reusing pooled database");
            return Ok(db);
        }
        if state.entries.remove(&key).is_some() {
            warn!(path = %key.display(), "dropping pooled database closed outside the pool");
            return Err(PoolError::ClosedInPool {
                path: key.display().to_string(),
            }
            .into());
        }

        let db = Arc::new(D::open(path)?);
        self.insert(&mut state, key, Arc::clone(&db));
        Ok(db)
    }

    /// Creates a new file at `path` from a seed document and returns its
    /// handle.
    ///
    /// A released handle already resident for `path` is closed and replaced.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ActiveConflict`] if the file at `path` is in use,
    /// and any error from resolving the path or creating the file.
    pub fn request_from_seed<P: AsRef<Path>, S: AsRef<Path>>(
        &self,
        path: P,
        seed_path: S,
    ) -> Result<Arc<D>> {
        let path = path.as_ref();
        let key = canonical_path(path)?;
        let mut state = self.shared.state.lock();

        Self::evict_inactive(&mut state, &key)?;
        let db = Arc::new(D::create_from_seed(path, seed_path.as_ref())?);
        self.insert(&mut state, key, Arc::clone(&db));
        Ok(db)
    }

    /// Creates a new file from a definition and returns its handle.
    ///
    /// A released handle already resident for the definition's path is
    /// closed and replaced.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ActiveConflict`] if the file is in use, and any
    /// error from resolving the path or creating the file.
    pub fn request_new(&self, def: &D::Def) -> Result<Arc<D>> {
        let key = canonical_path(def.path())?;
        let mut state = self.shared.state.lock();

        Self::evict_inactive(&mut state, &key)?;
        let db = Arc::new(D::create(def)?);
        self.insert(&mut state, key, Arc::clone(&db));
        Ok(db)
    }

    /// Gives a handle back to the pool.
    ///
    /// Releasing `None` does nothing. The file is not closed here: once no
    /// holders remain it becomes eligible for eviction, and a later request
    /// for the same path reuses it.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::AlreadyClosed`] if the handle was closed, and
    /// [`PoolError::NotInPool`] if the pool does not hold this handle.
    pub fn release<'a>(&self, db: impl Into<Option<&'a Arc<D>>>) -> Result<()> {
        let Some(db) = db.into() else {
            return Ok(());
        };
        if db.is_closed() {
            return Err(PoolError::AlreadyClosed {
                path: db.path().display().to_string(),
            }
            .into());
        }

        let key = canonical_path(db.path())?;
        let mut state = self.shared.state.lock();

        let pooled = state
            .entries
            .get(&key)
            .is_some_and(|entry| Arc::ptr_eq(entry.db(), db));
        if !pooled {
            return Err(PoolError::NotInPool {
                path: key.display().to_string(),
            }
            .into());
        }

        let tick = state.next_tick();
        if let Some(entry) = state.entries.get_mut(&key) {
            entry.release(tick);
            debug!(path = %key.display(), usage = entry.usage_count(), "released pooled database");
        }

        self.shared.changed.notify_one();
        Ok(())
    }

    /// Closes every resident file, in use or not, and empties the pool.
    ///
    /// Handles still held by other threads become closed; only call this
    /// when nothing else is using the pool.
    ///
    /// # Errors
    ///
    /// Returns the first close error. Every file is closed and removed
    /// regardless.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        let mut first_error = None;

        for (path, entry) in state.entries.drain() {
            if let Err(e) = entry.db().close() {
                warn!(path = %path.display(), error = %e, "failed to close database during reset");
                first_error.get_or_insert(e);
            }
        }

        info!("pool reset, all databases closed");
        first_error.map_or(Ok(()), Err)
    }

    /// Returns the number of resident files tolerated before eviction.
    pub fn capacity(&self) -> usize {
        self.shared.state.lock().capacity
    }

    /// Sets the number of resident files tolerated before eviction.
    ///
    /// Lowering the capacity closes nothing by itself; the next request or
    /// release wakes the eviction thread, which then trims to the new bound.
    pub fn set_capacity(&self, capacity: usize) {
        self.shared.state.lock().capacity = capacity;
        debug!(capacity, "pool capacity changed");
    }

    /// Returns the number of resident files.
    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    /// Returns `true` if no file is resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the usage count of the file at `path`, or `None` if it is not
    /// resident.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Canonicalize`] if the path cannot be resolved.
    pub fn usage_count<P: AsRef<Path>>(&self, path: P) -> Result<Option<usize>> {
        let key = canonical_path(path.as_ref())?;
        let state = self.shared.state.lock();
        Ok(state.entries.get(&key).map(Entry::usage_count))
    }

    /// Returns a snapshot of every resident entry, sorted by path.
    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        let state = self.shared.state.lock();
        let mut snapshot: Vec<_> = state
            .entries
            .iter()
            .map(|(path, entry)| EntrySnapshot {
                path: path.clone(),
                usage_count: entry.usage_count(),
                idle_for: entry.released().map(|r| r.at.elapsed()),
            })
            .collect();
        drop(state);

        snapshot.sort_by(|a, b| a.path.cmp(&b.path));
        snapshot
    }

    /// Renders the pool contents, one `<path> [<usage count>]` line per
    /// resident file. For diagnostics only.
    pub fn dump(&self) -> String {
        self.snapshot()
            .iter()
            .map(|entry| format!("{entry}\n"))
            .collect()
    }

    /// Makes room for a new file at `key`: rejects the request if the
    /// resident entry is in use, otherwise closes and drops it.
    fn evict_inactive(state: &mut PoolState<D>, key: &Path) -> Result<()> {
        let Some(entry) = state.entries.get(key) else {
            return Ok(());
        };
        if !entry.is_eligible() {
            return Err(PoolError::ActiveConflict {
                path: key.display().to_string(),
            }
            .into());
        }

        if let Some(entry) = state.entries.remove(key) {
            debug!(path = %key.display(), "closing released database before recreating it");
            entry.db().close()?;
        }
        Ok(())
    }

    fn insert(&self, state: &mut PoolState<D>, key: PathBuf, db: Arc<D>) {
        debug!(path = %key.display(), resident = state.entries.len() + 1, "new pooled database");
        state.entries.insert(key, Entry::new(db));
        self.shared.changed.notify_one();
    }
}

impl<D: Database> Drop for Pool<D> {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.changed.notify_all();
        }

        if let Some(evictor) = self.evictor.take()
            && evictor.join().is_err()
        {
            warn!("pool eviction thread panicked");
        }

        if let Err(e) = self.reset() {
            warn!(error = %e, "failed to close databases while dropping pool");
        }
    }
}

/// Maximum number of dangling symlinks followed while resolving a path.
const MAX_SYMLINK_HOPS: usize = 40;

/// Resolves `path` to the absolute, symlink-free form used as the pool key.
///
/// A file that does not exist yet (about to be created) resolves through its
/// parent directory, which must exist. If the missing file is a dangling
/// symlink, the key is the path of the file the link points at, since that
/// is where a create writes.
///
/// # Errors
///
/// Returns [`PoolError::Canonicalize`] if the path cannot be resolved.
pub fn canonical_path(path: &Path) -> Result<PathBuf> {
    resolve(path).map_err(|source| {
        RrdError::from(PoolError::Canonicalize {
            path: path.display().to_string(),
            source,
        })
    })
}

fn resolve(path: &Path) -> io::Result<PathBuf> {
    let mut current = path.to_path_buf();

    for _ in 0..MAX_SYMLINK_HOPS {
        let not_found = match fs::canonicalize(&current) {
            Ok(resolved) => return Ok(resolved),
            Err(e) if e.kind() == io::ErrorKind::NotFound => e,
            Err(e) => return Err(e),
        };

        let Some(file_name) = current.file_name() else {
            return Err(not_found);
        };
        let parent = match current.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let dir = fs::canonicalize(parent)?;
        let candidate = dir.join(file_name);

        match fs::symlink_metadata(&candidate) {
            // Relative link targets are relative to the link's directory;
            // `join` keeps absolute targets as they are.
            Ok(meta) if meta.file_type().is_symlink() => {
                current = dir.join(fs::read_link(&candidate)?);
            }
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(candidate),
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::other(format!(
        "too many levels of symbolic links resolving '{}'",
        path.display()
    )))
}
