//! Counter store contract.
//!
//! A thin asynchronous interface over a shared key-value store with hash
//! fields, atomic field increments, TTLs and cursor scans. Redis semantics are
//! the reference; the in-process store mirrors them.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache connection unavailable: {0}")]
    Pool(String),
    #[error("cache command failed: {0}")]
    Command(String),
    #[error("cached value at `{key}` is not an integer: `{value}`")]
    InvalidValue { key: String, value: String },
    #[error("key `{key}` holds the wrong kind of value")]
    WrongType { key: String },
}

impl StoreError {
    pub fn invalid_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One page of a cursor scan. A `cursor` of 0 marks the end of the scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub keys: Vec<String>,
    pub cursor: u64,
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set a string value. `None` keeps the key until deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Set only when the key does not exist. Returns whether the value was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
    -> Result<bool, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Atomically add `delta` to a hash field, creating key and field as needed.
    async fn increment_field(&self, key: &str, field: &str, delta: i64)
    -> Result<i64, StoreError>;

    async fn decrement_field(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        self.increment_field(key, field, -delta).await
    }

    async fn get_field(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// Set a hash field; `ttl` (when given) is applied to the whole key.
    async fn set_field(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Set a hash field only when it does not exist yet. Returns whether it was
    /// written; `ttl` (when given) is applied to the whole key either way.
    async fn set_field_if_absent(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    async fn delete_field(&self, key: &str, field: &str) -> Result<(), StoreError>;

    /// All fields of a hash; empty when the key does not exist.
    async fn get_all_fields(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Cursor scan. Start with cursor 0 and repeat with the returned cursor
    /// until it comes back as 0.
    async fn scan(&self, pattern: &str, cursor: u64, count: usize)
    -> Result<ScanPage, StoreError>;

    /// Rename `from` to `to` only when `to` does not exist. A missing `from`
    /// yields `false`.
    async fn rename_if_absent(&self, from: &str, to: &str) -> Result<bool, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Parse a cached counter value.
pub fn parse_counter(key: &str, value: &str) -> Result<i64, StoreError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| StoreError::invalid_value(key, value))
}
