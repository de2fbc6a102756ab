//! Storage backends for the Graphite servers.
//!
//! A store receives the series ingested by the Carbon engine and answers the find and render
//! requests of the Render engine. Stores are selected by name with [`create_store`]:
//!
//!  - `memory`: keeps recent data points in memory, see [`MemoryStore`].
//!  - `empty`: discards all data, see [`EmptyStore`].
//!
//! ```
//! use graphite_store::{StoreConfig, create_store};
//!
//! let store = create_store("memory", &StoreConfig::default()).unwrap();
//! assert_eq!(store.kind(), "memory");
//! ```

#![warn(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use graphite_server::{CarbonListener, RenderListener};

mod empty;
mod memory;
mod pattern;
mod statsd;

pub use self::empty::*;
pub use self::memory::*;
pub use self::pattern::*;

/// Default resolution of stored data points.
pub const DEFAULT_RETENTION_INTERVAL: Duration = Duration::from_secs(300);

/// Default age after which stored data points are dropped.
pub const DEFAULT_RETENTION_PERIOD: Duration = Duration::from_secs(3600);

/// Retention settings of a store.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StoreConfig {
    /// Timestamps are aligned down to a multiple of this interval. Zero keeps them unchanged.
    pub retention_interval: Duration,
    /// Data points this much older than the newest data point of their series are dropped. Zero
    /// keeps all data points.
    pub retention_period: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retention_interval: DEFAULT_RETENTION_INTERVAL,
            retention_period: DEFAULT_RETENTION_PERIOD,
        }
    }
}

/// A backend that stores ingested series and answers render queries.
pub trait Store: CarbonListener + RenderListener {
    /// The name this store is created by.
    fn kind(&self) -> &'static str;
}

/// An error returned by [`create_store`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No store is registered under the requested name.
    #[error("Store ({0}) Not Found")]
    NotFound(String),
}

/// Creates the store registered under `kind`.
pub fn create_store(kind: &str, config: &StoreConfig) -> Result<Arc<dyn Store>, StoreError> {
    let store: Arc<dyn Store> = match kind {
        "memory" => Arc::new(MemoryStore::new(*config)),
        "empty" => Arc::new(EmptyStore),
        _ => return Err(StoreError::NotFound(kind.to_owned())),
    };

    graphite_log::debug!("created {kind} store");
    Ok(store)
}
