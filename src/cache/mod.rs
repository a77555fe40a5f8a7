//! Counter store and cache key layout.
//!
//! Two backends implement [`CounterStore`]:
//!
//! - **Redis**: shared across instances; required when more than one process
//!   serves traffic or runs reconciliation.
//! - **Memory**: DashMap-backed, single process only.
//!
//! ```toml
//! [cache]
//! backend = "redis"
//! redis_url = "redis://127.0.0.1:6379"
//! ```

mod keys;
mod memory;
mod redis_store;
mod store;

use std::sync::Arc;

pub use keys::{
    BASELINE_NAMESPACE, CLAIM_PREFIX, COUNTER_NAMESPACE, CounterKey, KeyParseError, claim_key,
    flag_key,
};
pub use memory::MemoryCounterStore;
pub use redis_store::{RedisCounterStore, RedisPoolOptions};
pub use store::{CounterStore, ScanPage, StoreError, parse_counter};

use crate::config::{CacheBackendKind, CacheSettings};

/// Build the configured store.
pub fn build_store(settings: &CacheSettings) -> Result<Arc<dyn CounterStore>, StoreError> {
    match settings.backend {
        CacheBackendKind::Redis => {
            let options = RedisPoolOptions {
                url: settings.redis_url.clone(),
                pool_size: settings.pool_size.get() as usize,
                timeout: settings.pool_timeout,
            };
            Ok(Arc::new(RedisCounterStore::connect(&options)?))
        }
        CacheBackendKind::Memory => Ok(Arc::new(MemoryCounterStore::new())),
    }
}
