//! Pool configuration.

use serde::{Deserialize, Serialize};

/// Default number of resident files before eviction starts.
pub const INITIAL_CAPACITY: usize = 50;

/// Default name of the eviction thread.
pub const DEFAULT_EVICTOR_THREAD_NAME: &str = "rrdpool-evict";

/// Configuration for a [`Pool`](crate::pool::Pool).
///
/// Missing fields fall back to their defaults, so the struct can be embedded
/// in a larger application config:
///
/// ```rust
/// use rrdpool::PoolConfig;
///
/// let config: PoolConfig = serde_json::from_str(r#"{ "capacity": 8 }"#).unwrap();
/// assert_eq!(config.capacity, 8);
/// assert_eq!(config.evictor_thread_name, "rrdpool-evict");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Soft upper bound on resident files.
    ///
    /// When more files than this are resident, the eviction thread closes
    /// released files, longest-released first. Files still in use are never
    /// closed, so the bound can be exceeded while every file is active.
    pub capacity: usize,

    /// Name given to the eviction thread.
    pub evictor_thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: INITIAL_CAPACITY,
            evictor_thread_name: DEFAULT_EVICTOR_THREAD_NAME.to_string(),
        }
    }
}

impl PoolConfig {
    /// Returns the default config with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }
}
