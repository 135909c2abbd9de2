//! Pool bookkeeping for a single resident database file.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// When an entry's usage count last dropped to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Release {
    /// Pool-wide logical release clock; strictly increasing.
    pub tick: u64,
    /// Wall-clock time of the release, for diagnostics.
    pub at: Instant,
}

/// A resident database handle with its usage count.
///
/// `released` is set exactly when `usage_count == 0`. An entry with holders
/// is *active*; one without is *eligible* for eviction.
#[derive(Debug)]
pub(crate) struct Entry<D> {
    db: Arc<D>,
    usage_count: usize,
    released: Option<Release>,
}

impl<D> Entry<D> {
    /// Wraps a freshly opened handle, counting the caller as its first holder.
    pub fn new(db: Arc<D>) -> Self {
        Self {
            db,
            usage_count: 1,
            released: None,
        }
    }

    /// Records one more holder and returns a shared reference to the handle.
    pub fn acquire(&mut self) -> Arc<D> {
        self.usage_count += 1;
        self.released = None;
        Arc::clone(&self.db)
    }

    /// Records that one holder is done.
    ///
    /// Once the count reaches zero the entry is stamped with `tick`. Releasing
    /// an entry whose count is already zero leaves it unchanged.
    pub fn release(&mut self, tick: u64) {
        if self.usage_count == 0 {
            return;
        }
        self.usage_count -= 1;
        if self.usage_count == 0 {
            self.released = Some(Release {
                tick,
                at: Instant::now(),
            });
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.usage_count == 0
    }

    pub fn usage_count(&self) -> usize {
        self.usage_count
    }

    pub fn released(&self) -> Option<Release> {
        self.released
    }

    pub fn db(&self) -> &Arc<D> {
        &self.db
    }
}

/// Orders entries from most to least eligible for eviction.
///
/// Eligible entries sort before active ones, and among eligible entries the
/// one released first sorts first. Active entries all compare equal.
pub(crate) fn eviction_order<D>(a: &Entry<D>, b: &Entry<D>) -> Ordering {
    match (a.released, b.released) {
        (None, None) => Ordering::Equal,
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (Some(ra), Some(rb)) => ra.tick.cmp(&rb.tick),
    }
}
