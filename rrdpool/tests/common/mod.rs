//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, const_mutex};
use rrdpool::{
    ArcDef, ConsolidationFn, Database, DatabaseDef, DbError, DsDef, DsKind, Result, RrdDef,
};

/// Installs a test-friendly tracing subscriber once per test binary.
///
/// Run with `RUST_LOG=rrdpool=debug` to see pool traffic.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Timeout for waiting on the eviction thread.
pub const EVICTION_TIMEOUT: Duration = Duration::from_secs(5);

/// A small two-archive definition at `path`.
pub fn sample_def(path: &Path) -> RrdDef {
    RrdDef::new(
        path,
        1_700_000_000,
        Duration::from_secs(60),
        vec![
            DsDef::new("temp", DsKind::Gauge, Duration::from_secs(120)).unwrap(),
            DsDef::new("load", DsKind::Gauge, Duration::from_secs(120)).unwrap(),
        ],
        vec![
            ArcDef::new(ConsolidationFn::Average, 0.5, 1, 60).unwrap(),
            ArcDef::new(ConsolidationFn::Max, 0.5, 10, 24).unwrap(),
        ],
    )
    .unwrap()
}

/// Calls made on [`MockDb`] for one path.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
    pub open: usize,
    pub create: usize,
    pub seed: usize,
    pub close: usize,
}

static CALLS: Mutex<BTreeMap<PathBuf, Calls>> = const_mutex(BTreeMap::new());

/// Returns the calls recorded for `path` (as passed to the pool).
pub fn calls(path: &Path) -> Calls {
    CALLS.lock().get(path).copied().unwrap_or_default()
}

fn record(path: &Path, update: impl FnOnce(&mut Calls)) {
    update(CALLS.lock().entry(path.to_path_buf()).or_default());
}

/// Instrumented database that only touches marker files.
///
/// Every call is counted per path so tests can assert how often the pool
/// opened, created, or closed a file. Closing a file whose name starts with
/// `broken` fails.
#[derive(Debug)]
pub struct MockDb {
    path: PathBuf,
    closed: AtomicBool,
}

pub struct MockDef(pub PathBuf);

impl DatabaseDef for MockDef {
    fn path(&self) -> &Path {
        &self.0
    }
}

impl MockDb {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            closed: AtomicBool::new(false),
        }
    }

    fn write_marker(path: &Path) -> Result<()> {
        fs::write(path, b"mock").map_err(|source| {
            DbError::Io {
                path: path.display().to_string(),
                source,
            }
            .into()
        })
    }
}

impl Database for MockDb {
    type Def = MockDef;

    fn open(path: &Path) -> Result<Self> {
        fs::metadata(path).map_err(|source| DbError::Io {
            path: path.display().to_string(),
            source,
        })?;
        record(path, |c| c.open += 1);
        Ok(Self::new(path))
    }

    fn create(def: &MockDef) -> Result<Self> {
        Self::write_marker(&def.0)?;
        record(&def.0, |c| c.create += 1);
        Ok(Self::new(&def.0))
    }

    fn create_from_seed(path: &Path, seed_path: &Path) -> Result<Self> {
        fs::metadata(seed_path).map_err(|source| DbError::Io {
            path: seed_path.display().to_string(),
            source,
        })?;
        Self::write_marker(path)?;
        record(path, |c| c.seed += 1);
        Ok(Self::new(path))
    }

    fn close(&self) -> Result<()> {
        record(&self.path, |c| c.close += 1);
        self.closed.store(true, Ordering::SeqCst);

        let broken = self
            .path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with("broken"));
        if broken {
            return Err(DbError::Io {
                path: self.path.display().to_string(),
                source: std::io::Error::other("simulated close failure"),
            }
            .into());
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Creates marker files `names` under `dir` and returns their paths.
pub fn marker_files(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            fs::write(&path, b"mock").unwrap();
            path
        })
        .collect()
}
