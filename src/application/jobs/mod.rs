mod counter_sync;
mod scheduler;
mod sync_config;

pub use counter_sync::{CounterSync, SyncError, SyncReport};
pub use scheduler::{CounterSyncHandle, SyncState};
pub use sync_config::{
    DEFAULT_BATCH_SIZE, DEFAULT_KEY_PATTERN, DEFAULT_LOCK_KEY, DEFAULT_LOCK_TTL,
    DEFAULT_SYNC_INTERVAL, SyncConfig, default_field_mappings,
};
