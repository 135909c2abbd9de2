//! Background eviction of released database handles.
//!
//! Each pool runs one eviction thread. It sleeps on the pool's condition
//! variable until a request, create, or release signals a change, then sweeps
//! while holding the pool lock: as long as more files are resident than the
//! capacity allows, it closes the entry that was released longest ago. If the
//! best candidate is still in use then every entry is in use, so the sweep
//! stops and waits for the next release instead of blocking on a holder.

use tracing::{debug, warn};

use crate::entry::eviction_order;
use crate::pool::{Database, PoolState, Shared};

/// Eviction thread body. Returns once the owning pool shuts down.
pub(crate) fn run<D: Database>(shared: &Shared<D>) {
    debug!("eviction thread started");

    let mut state = shared.state.lock();
    loop {
        sweep(&mut state);
        if state.shutdown {
            break;
        }
        // Spurious wakeups just cause a sweep with nothing to do.
        shared.changed.wait(&mut state);
    }

    debug!("eviction thread stopped");
}

/// Closes released entries, oldest release first, until the pool is within
/// capacity or only active entries remain. Returns the number of entries
/// removed.
///
/// A close that fails is logged and the entry is dropped anyway, so a broken
/// file cannot stall the sweep.
pub(crate) fn sweep<D: Database>(state: &mut PoolState<D>) -> usize {
    let mut evicted = 0;

    while state.entries.len() > state.capacity {
        let Some((key, entry)) = state
            .entries
            .iter()
            .min_by(|(_, a), (_, b)| eviction_order(*a, *b))
        else {
            break;
        };

        if !entry.is_eligible() {
            debug!(
                resident = state.entries.len(),
                capacity = state.capacity,
                "all pooled databases are active, nothing to evict"
            );
            break;
        }

        let key = key.clone();
        if let Some(entry) = state.entries.remove(&key) {
            match entry.db().close() {
                Ok(()) => debug!(path = %key.display(), "evicted released database"),
                Err(e) => {
                    warn!(path = %key.display(), error = %e, "failed to close evicted database");
                }
            }
            evicted += 1;
        }
    }

    evicted
}
