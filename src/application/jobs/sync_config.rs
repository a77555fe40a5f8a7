//! Reconciliation policy, fixed at start-up.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::application::counts::DEFAULT_BASELINE_TTL;
use crate::config::CounterSyncSettings;
use crate::domain::types::CounterColumn;

pub const DEFAULT_KEY_PATTERN: &str = "counters:*";
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_LOCK_KEY: &str = "counter_sync_lock";
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Scan filter; matched keys must be `<namespace>:<resource>:<id>`.
    pub key_pattern: String,
    /// Cache field name to durable column.
    pub field_mappings: BTreeMap<String, CounterColumn>,
    pub batch_size: usize,
    pub interval: Duration,
    pub enable_lock: bool,
    pub lock_key: String,
    pub lock_ttl: Duration,
    /// Lifetime of the baselines written back after a merge.
    pub baseline_ttl: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            key_pattern: DEFAULT_KEY_PATTERN.to_string(),
            field_mappings: default_field_mappings(),
            batch_size: DEFAULT_BATCH_SIZE,
            interval: DEFAULT_SYNC_INTERVAL,
            enable_lock: false,
            lock_key: DEFAULT_LOCK_KEY.to_string(),
            lock_ttl: DEFAULT_LOCK_TTL,
            baseline_ttl: DEFAULT_BASELINE_TTL,
        }
    }
}

impl SyncConfig {
    /// Replace zero or empty values with their defaults.
    pub fn normalized(mut self) -> Self {
        if self.batch_size == 0 {
            self.batch_size = DEFAULT_BATCH_SIZE;
        }
        if self.interval.is_zero() {
            self.interval = DEFAULT_SYNC_INTERVAL;
        }
        if self.lock_ttl.is_zero() {
            self.lock_ttl = DEFAULT_LOCK_TTL;
        }
        if self.key_pattern.trim().is_empty() {
            self.key_pattern = DEFAULT_KEY_PATTERN.to_string();
        }
        if self.lock_key.trim().is_empty() {
            self.lock_key = DEFAULT_LOCK_KEY.to_string();
        }
        if self.baseline_ttl.is_zero() {
            self.baseline_ttl = DEFAULT_BASELINE_TTL;
        }
        self
    }
}

/// Deferred columns only; `likes` is maintained transactionally.
pub fn default_field_mappings() -> BTreeMap<String, CounterColumn> {
    BTreeMap::from([
        (
            CounterColumn::Downloads.as_str().to_string(),
            CounterColumn::Downloads,
        ),
        (
            CounterColumn::TotalDownloads.as_str().to_string(),
            CounterColumn::TotalDownloads,
        ),
    ])
}

impl From<&CounterSyncSettings> for SyncConfig {
    fn from(settings: &CounterSyncSettings) -> Self {
        Self {
            key_pattern: settings.key_pattern.clone(),
            field_mappings: settings.field_mappings.clone(),
            batch_size: settings.batch_size,
            interval: settings.interval,
            enable_lock: settings.enable_lock,
            lock_key: settings.lock_key.clone(),
            lock_ttl: settings.lock_ttl,
            baseline_ttl: settings.baseline_ttl,
        }
        .normalized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = SyncConfig::default();
        assert_eq!(config.key_pattern, "counters:*");
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.interval, Duration::from_secs(300));
        assert!(!config.enable_lock);
        assert_eq!(config.lock_key, "counter_sync_lock");
        assert_eq!(config.lock_ttl, Duration::from_secs(300));
        assert_eq!(config.field_mappings.len(), 2);
        assert!(!config.field_mappings.contains_key("likes"));
    }

    #[test]
    fn zero_values_fall_back_to_defaults() {
        let config = SyncConfig {
            batch_size: 0,
            interval: Duration::ZERO,
            lock_ttl: Duration::ZERO,
            key_pattern: " ".to_string(),
            ..Default::default()
        }
        .normalized();

        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.interval, DEFAULT_SYNC_INTERVAL);
        assert_eq!(config.lock_ttl, DEFAULT_LOCK_TTL);
        assert_eq!(config.key_pattern, DEFAULT_KEY_PATTERN);
    }

    #[test]
    fn explicit_values_are_kept() {
        let config = SyncConfig {
            batch_size: 200,
            interval: Duration::from_secs(30),
            ..Default::default()
        }
        .normalized();

        assert_eq!(config.batch_size, 200);
        assert_eq!(config.interval, Duration::from_secs(30));
    }
}
