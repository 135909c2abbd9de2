//! Integration tests for the pool over real database files.

mod common;

use std::fs;
use std::sync::Arc;
use std::thread;

use common::{EVICTION_TIMEOUT, init_tracing, sample_def, wait_until};
use rrdpool::{DbError, Pool, PoolConfig, PoolError, RrdDb, RrdError};
use tempfile::tempdir;

fn pool() -> Pool {
    init_tracing();
    Pool::new(PoolConfig::default())
}

#[test]
fn test_request_shares_one_handle() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("shared.rrd");
    RrdDb::create(&sample_def(&path)).unwrap().close().unwrap();

    let pool = pool();
    let first = pool.request(&path).unwrap();
    // Another spelling of the same file resolves to the same entry.
    let second = pool
        .request(temp_dir.path().join(".").join("shared.rrd"))
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.usage_count(&path).unwrap(), Some(2));

    pool.release(&first).unwrap();
    pool.release(&second).unwrap();
    assert_eq!(pool.usage_count(&path).unwrap(), Some(0));
    assert!(!first.is_closed());
}

#[test]
fn test_threads_see_each_others_writes() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("threads.rrd");
    let pool = Arc::new(pool());

    let db = pool.request_new(&sample_def(&path)).unwrap();
    pool.release(&db).unwrap();

    let writers: Vec<_> = (0..4u8)
        .map(|row| {
            let pool = Arc::clone(&pool);
            let path = path.clone();
            thread::spawn(move || {
                let db = pool.request(&path).unwrap();
                let index = usize::from(row);
                db.write_cell(0, index, 0, f64::from(row) * 10.0).unwrap();
                db.write_cell(0, index, 1, f64::from(row) + 0.5).unwrap();
                pool.release(&db).unwrap();
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let reader = pool.request(&path).unwrap();
    assert!(Arc::ptr_eq(&reader, &db));
    for row in 0..4u8 {
        let index = usize::from(row);
        assert_eq!(reader.read_cell(0, index, 0).unwrap(), f64::from(row) * 10.0);
        assert_eq!(reader.read_cell(0, index, 1).unwrap(), f64::from(row) + 0.5);
    }
    pool.release(&reader).unwrap();
}

#[test]
fn test_create_conflict_leaves_file_untouched() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("busy.rrd");
    let pool = pool();

    let db = pool.request_new(&sample_def(&path)).unwrap();
    db.write_cell(1, 3, 0, 42.0).unwrap();
    db.sync().unwrap();
    let before = fs::read(&path).unwrap();

    let err = pool.request_new(&sample_def(&path)).unwrap_err();
    assert!(matches!(err, RrdError::Pool(PoolError::ActiveConflict { .. })));

    assert_eq!(fs::read(&path).unwrap(), before);
    assert!(!db.is_closed());
    assert_eq!(db.read_cell(1, 3, 0).unwrap(), 42.0);
    assert_eq!(pool.usage_count(&path).unwrap(), Some(1));
    pool.release(&db).unwrap();
}

#[test]
fn test_recreate_over_released_file() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("recreate.rrd");
    let pool = pool();

    let old = pool.request_new(&sample_def(&path)).unwrap();
    old.write_cell(0, 0, 0, 7.0).unwrap();
    pool.release(&old).unwrap();

    let new = pool.request_new(&sample_def(&path)).unwrap();
    assert!(old.is_closed());
    assert!(!Arc::ptr_eq(&old, &new));
    // The file was rewritten from scratch.
    assert!(new.read_cell(0, 0, 0).unwrap().is_nan());
    assert_eq!(pool.len(), 1);
    pool.release(&new).unwrap();
}

#[test]
fn test_request_from_seed() {
    let temp_dir = tempdir().unwrap();
    let seed_path = temp_dir.path().join("seed.json");
    fs::write(
        &seed_path,
        r#"{
            "start": 1700000000,
            "step": 300.0,
            "data_sources": [
                { "name": "rx", "kind": "COUNTER", "heartbeat": 600.0 },
                { "name": "tx", "kind": "COUNTER", "heartbeat": 600.0 }
            ],
            "archives": [
                { "consolidation_fn": "AVERAGE", "xff": 0.5, "steps": 1, "rows": 3,
                  "values": [[1.0, 2.0], [3.0, null], [5.0, 6.0]] }
            ]
        }"#,
    )
    .unwrap();
    let path = temp_dir.path().join("seeded.rrd");
    let pool = pool();

    let db = pool.request_from_seed(&path, &seed_path).unwrap();
    assert_eq!(db.definition().data_sources.len(), 2);
    assert_eq!(db.read_cell(0, 2, 1).unwrap(), 6.0);
    assert!(db.read_cell(0, 1, 1).unwrap().is_nan());

    // Seeding over an active file is refused.
    let err = pool.request_from_seed(&path, &seed_path).unwrap_err();
    assert!(matches!(err, RrdError::Pool(PoolError::ActiveConflict { .. })));
    pool.release(&db).unwrap();

    // A later plain request reuses the seeded handle.
    let again = pool.request(&path).unwrap();
    assert!(Arc::ptr_eq(&db, &again));
    pool.release(&again).unwrap();
}

#[test]
fn test_failed_create_leaves_no_entry() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("bad_seed.rrd");
    let seed_path = temp_dir.path().join("bad.json");
    fs::write(&seed_path, "not json").unwrap();
    let pool = pool();

    assert!(matches!(
        pool.request_from_seed(&path, &seed_path),
        Err(RrdError::Seed(_))
    ));
    assert!(pool.is_empty());
}

#[test]
fn test_release_errors() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("release.rrd");
    let pool = pool();

    let db = pool.request_new(&sample_def(&path)).unwrap();

    // Releasing nothing is a no-op.
    pool.release(None::<&Arc<RrdDb>>).unwrap();
    assert_eq!(pool.usage_count(&path).unwrap(), Some(1));

    // A handle opened outside the pool is not the pooled one.
    let foreign = Arc::new(RrdDb::open(&path).unwrap());
    assert!(matches!(
        pool.release(&foreign),
        Err(RrdError::Pool(PoolError::NotInPool { .. }))
    ));
    assert_eq!(pool.usage_count(&path).unwrap(), Some(1));
    foreign.close().unwrap();

    // A closed handle cannot be released.
    assert!(matches!(
        pool.release(&foreign),
        Err(RrdError::Pool(PoolError::AlreadyClosed { .. }))
    ));

    pool.release(&db).unwrap();
}

#[test]
fn test_handle_closed_by_holder_is_dropped() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("misused.rrd");
    let pool = pool();

    let db = pool.request_new(&sample_def(&path)).unwrap();
    db.close().unwrap();
    assert!(matches!(
        db.read_cell(0, 0, 0),
        Err(RrdError::Db(DbError::Closed { .. }))
    ));

    assert!(matches!(
        pool.request(&path),
        Err(RrdError::Pool(PoolError::ClosedInPool { .. }))
    ));
    assert!(pool.is_empty());

    // The stale entry is gone; the next request opens the file afresh.
    let fresh = pool.request(&path).unwrap();
    assert!(!fresh.is_closed());
    assert!(!Arc::ptr_eq(&db, &fresh));
    pool.release(&fresh).unwrap();
}

#[test]
fn test_capacity_evicts_real_files() {
    let temp_dir = tempdir().unwrap();
    init_tracing();
    let pool: Pool = Pool::new(PoolConfig::with_capacity(1));

    let first_path = temp_dir.path().join("first.rrd");
    let first = pool.request_new(&sample_def(&first_path)).unwrap();
    first.write_cell(0, 5, 1, 99.0).unwrap();
    pool.release(&first).unwrap();

    let second = pool
        .request_new(&sample_def(&temp_dir.path().join("second.rrd")))
        .unwrap();
    assert!(wait_until(EVICTION_TIMEOUT, || first.is_closed()));
    assert_eq!(pool.len(), 1);

    // Eviction flushed the data; reopening sees it.
    let reopened = pool.request(&first_path).unwrap();
    assert!(!Arc::ptr_eq(&first, &reopened));
    assert_eq!(reopened.read_cell(0, 5, 1).unwrap(), 99.0);

    pool.release(&second).unwrap();
    pool.release(&reopened).unwrap();
}

#[test]
fn test_reset_and_dump() {
    let temp_dir = tempdir().unwrap();
    let a_path = temp_dir.path().join("a.rrd");
    let b_path = temp_dir.path().join("b.rrd");
    let pool = pool();

    let a = pool.request_new(&sample_def(&a_path)).unwrap();
    let b = pool.request_new(&sample_def(&b_path)).unwrap();
    let b_again = pool.request(&b_path).unwrap();
    pool.release(&a).unwrap();

    let root = fs::canonicalize(temp_dir.path()).unwrap();
    let expected = format!(
        "{} [0]\n{} [2]\n",
        root.join("a.rrd").display(),
        root.join("b.rrd").display()
    );
    assert_eq!(pool.dump(), expected);

    let snapshot = pool.snapshot();
    assert!(snapshot[0].idle_for.is_some());
    assert!(snapshot[1].idle_for.is_none());

    pool.reset().unwrap();
    assert!(pool.is_empty());
    assert_eq!(pool.dump(), "");
    assert!(a.is_closed());
    assert!(b.is_closed());
    assert!(b_again.is_closed());
}

#[test]
fn test_global_pool_is_a_singleton() {
    init_tracing();
    let pool = Pool::global();
    assert!(std::ptr::eq(pool, Pool::global()));
    assert_eq!(pool.capacity(), rrdpool::INITIAL_CAPACITY);

    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("global.rrd");
    let db = pool.request_new(&sample_def(&path)).unwrap();
    let same = Pool::global().request(&path).unwrap();
    assert!(Arc::ptr_eq(&db, &same));
    pool.release(&db).unwrap();
    pool.release(&same).unwrap();
}

#[cfg(unix)]
#[test]
fn test_symlink_and_target_share_one_entry() {
    let temp_dir = tempdir().unwrap();
    let target = temp_dir.path().join("target.rrd");
    let link = temp_dir.path().join("alias.rrd");
    RrdDb::create(&sample_def(&target)).unwrap().close().unwrap();
    std::os::unix::fs::symlink(&target, &link).unwrap();
    let pool = pool();

    let via_link = pool.request(&link).unwrap();
    let via_target = pool.request(&target).unwrap();
    assert!(Arc::ptr_eq(&via_link, &via_target));
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.usage_count(&target).unwrap(), Some(2));

    // Creating through the link collides with the active target.
    let err = pool.request_new(&sample_def(&link)).unwrap_err();
    assert!(matches!(err, RrdError::Pool(PoolError::ActiveConflict { .. })));
    assert!(!via_target.is_closed());

    pool.release(&via_link).unwrap();
    pool.release(&via_target).unwrap();
    assert_eq!(pool.usage_count(&link).unwrap(), Some(0));
}

#[cfg(unix)]
#[test]
fn test_create_through_dangling_symlink() {
    let temp_dir = tempdir().unwrap();
    let target = temp_dir.path().join("real.rrd");
    let link = temp_dir.path().join("link.rrd");
    std::os::unix::fs::symlink(&target, &link).unwrap();
    let pool = pool();

    let created = pool.request_new(&sample_def(&link)).unwrap();
    assert!(target.exists());

    let again = pool.request(&link).unwrap();
    let direct = pool.request(&target).unwrap();
    assert!(Arc::ptr_eq(&created, &again));
    assert!(Arc::ptr_eq(&created, &direct));
    assert_eq!(pool.len(), 1);

    let root = fs::canonicalize(temp_dir.path()).unwrap();
    assert_eq!(pool.dump(), format!("{} [3]\n", root.join("real.rrd").display()));

    pool.release(&created).unwrap();
    pool.release(&again).unwrap();
    pool.release(&direct).unwrap();
    assert_eq!(pool.usage_count(&target).unwrap(), Some(0));
}
