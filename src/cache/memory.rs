//! In-process counter store for single-instance deployments and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;

use super::store::{CounterStore, ScanPage, StoreError, parse_counter};

/// Expiring writes between full sweeps of expired entries.
const SWEEP_INTERVAL: u64 = 1024;
/// Scan cursors left unfinished longer than this are released.
const SCAN_CURSOR_TTL: Duration = Duration::from_secs(300);
/// Upper bound on parked scan cursors; the oldest is released first.
const MAX_PENDING_SCANS: usize = 64;

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() >= expires_at)
    }
}

/// Remainder of a scan snapshot, parked under its cursor.
#[derive(Debug)]
struct PendingScan {
    keys: Vec<String>,
    issued: Instant,
}

/// DashMap-backed store.
///
/// Expired entries are evicted when touched, and all of them are swept on
/// every fresh scan and every [`SWEEP_INTERVAL`] expiring writes.
///
/// Scans snapshot the matching keys on cursor 0 and hand out the rest under
/// an opaque cursor, so keys renamed or deleted mid-scan never shift later
/// pages.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: DashMap<String, Entry>,
    scans: DashMap<u64, PendingScan>,
    next_scan: AtomicU64,
    expiring_writes: AtomicU64,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.live(key)
    }

    /// Remaining time to live, if the key exists and has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let entry = self.entries.get(key)?;
        if entry.is_expired() {
            return None;
        }
        entry
            .expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    fn live(&self, key: &str) -> bool {
        self.evict_if_expired(key);
        self.entries.contains_key(key)
    }

    fn evict_if_expired(&self, key: &str) {
        self.entries.remove_if(key, |_, entry| entry.is_expired());
    }

    fn sweep_expired(&self) {
        self.entries.retain(|_, entry| !entry.is_expired());
    }

    fn note_expiring_write(&self) {
        let writes = self.expiring_writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_INTERVAL == 0 {
            self.sweep_expired();
        }
    }

    fn matching_keys(&self, pattern: &str) -> Vec<String> {
        self.sweep_expired();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Park the rest of a snapshot and return its cursor.
    fn park_scan(&self, keys: Vec<String>) -> u64 {
        self.scans
            .retain(|_, scan| scan.issued.elapsed() < SCAN_CURSOR_TTL);
        while self.scans.len() >= MAX_PENDING_SCANS {
            let Some(oldest) = self.scans.iter().map(|scan| *scan.key()).min() else {
                break;
            };
            self.scans.remove(&oldest);
        }

        let cursor = self.next_scan.fetch_add(1, Ordering::Relaxed) + 1;
        self.scans.insert(
            cursor,
            PendingScan {
                keys,
                issued: Instant::now(),
            },
        );
        cursor
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.evict_if_expired(key);
        match self.entries.get(key).map(|entry| entry.value.clone()) {
            Some(Value::Text(value)) => Ok(Some(value)),
            Some(Value::Hash(_)) => Err(StoreError::WrongType {
                key: key.to_string(),
            }),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        if ttl.is_some() {
            self.note_expiring_write();
        }
        self.entries.insert(
            key.to_string(),
            Entry::new(Value::Text(value.to_string()), ttl),
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.note_expiring_write();
        self.evict_if_expired(key);
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(_) => Ok(false),
            MapEntry::Vacant(slot) => {
                slot.insert(Entry::new(Value::Text(value.to_string()), Some(ttl)));
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn increment_field(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> Result<i64, StoreError> {
        self.evict_if_expired(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Hash(HashMap::new()), None));
        let Value::Hash(fields) = &mut entry.value else {
            return Err(StoreError::WrongType {
                key: key.to_string(),
            });
        };

        let current = match fields.get(field) {
            Some(raw) => parse_counter(key, raw)?,
            None => 0,
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::Command(format!("increment on `{key}` would overflow")))?;
        fields.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn get_field(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.evict_if_expired(key);
        match self.entries.get(key).map(|entry| entry.value.clone()) {
            Some(Value::Hash(fields)) => Ok(fields.get(field).cloned()),
            Some(Value::Text(_)) => Err(StoreError::WrongType {
                key: key.to_string(),
            }),
            None => Ok(None),
        }
    }

    async fn set_field(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        if ttl.is_some() {
            self.note_expiring_write();
        }
        self.evict_if_expired(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Hash(HashMap::new()), None));
        let Value::Hash(fields) = &mut entry.value else {
            return Err(StoreError::WrongType {
                key: key.to_string(),
            });
        };
        fields.insert(field.to_string(), value.to_string());
        if let Some(ttl) = ttl {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn set_field_if_absent(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        if ttl.is_some() {
            self.note_expiring_write();
        }
        self.evict_if_expired(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Hash(HashMap::new()), None));
        let Value::Hash(fields) = &mut entry.value else {
            return Err(StoreError::WrongType {
                key: key.to_string(),
            });
        };
        let written = !fields.contains_key(field);
        if written {
            fields.insert(field.to_string(), value.to_string());
        }
        if let Some(ttl) = ttl {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(written)
    }

    async fn delete_field(&self, key: &str, field: &str) -> Result<(), StoreError> {
        self.evict_if_expired(key);
        let emptied = match self.entries.get_mut(key) {
            Some(mut entry) => match &mut entry.value {
                Value::Hash(fields) => {
                    fields.remove(field);
                    fields.is_empty()
                }
                Value::Text(_) => {
                    return Err(StoreError::WrongType {
                        key: key.to_string(),
                    });
                }
            },
            None => false,
        };
        if emptied {
            self.entries.remove_if(key, |_, entry| {
                matches!(&entry.value, Value::Hash(fields) if fields.is_empty())
            });
        }
        Ok(())
    }

    async fn get_all_fields(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.evict_if_expired(key);
        match self.entries.get(key).map(|entry| entry.value.clone()) {
            Some(Value::Hash(fields)) => Ok(fields),
            Some(Value::Text(_)) => Err(StoreError::WrongType {
                key: key.to_string(),
            }),
            None => Ok(HashMap::new()),
        }
    }

    async fn scan(
        &self,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> Result<ScanPage, StoreError> {
        let count = count.max(1);
        let mut pending = if cursor == 0 {
            self.matching_keys(pattern)
        } else {
            match self.scans.remove(&cursor) {
                Some((_, scan)) => scan.keys,
                None => return Ok(ScanPage::default()),
            }
        };

        let rest = pending.split_off(count.min(pending.len()));
        let keys: Vec<String> = pending.into_iter().filter(|key| self.live(key)).collect();

        if rest.is_empty() {
            return Ok(ScanPage { keys, cursor: 0 });
        }

        let cursor = self.park_scan(rest);
        Ok(ScanPage { keys, cursor })
    }

    async fn rename_if_absent(&self, from: &str, to: &str) -> Result<bool, StoreError> {
        if self.live(to) {
            return Ok(false);
        }
        self.evict_if_expired(from);
        let Some((_, entry)) = self.entries.remove(from) else {
            return Ok(false);
        };
        match self.entries.entry(to.to_string()) {
            MapEntry::Vacant(slot) => {
                slot.insert(entry);
                Ok(true)
            }
            MapEntry::Occupied(_) => {
                self.entries.insert(from.to_string(), entry);
                Ok(false)
            }
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Redis-style glob supporting `*` and `?`.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();

    let (mut p, mut c) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while c < candidate.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, c));
                p += 1;
            }
            Some('?') => {
                p += 1;
                c += 1;
            }
            Some(ch) if *ch == candidate[c] => {
                p += 1;
                c += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    c = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|ch| *ch == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_prefix_patterns() {
        assert!(glob_match("counters:*", "counters:mod:42"));
        assert!(!glob_match("counters:*", "counts:mod:42"));
        assert!(!glob_match("counters:*", "sync:counters:mod:42"));
        assert!(glob_match("sync:counters:*", "sync:counters:mod:42"));
        assert!(glob_match("like:?:42", "like:7:42"));
        assert!(!glob_match("like:?:42", "like:17:42"));
        assert!(glob_match("*", ""));
    }

    #[tokio::test]
    async fn increments_create_and_accumulate_fields() {
        let store = MemoryCounterStore::new();
        assert_eq!(
            store
                .increment_field("counters:mod:1", "likes", 1)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .decrement_field("counters:mod:1", "likes", 3)
                .await
                .unwrap(),
            -2
        );
        assert_eq!(
            store.get_field("counters:mod:1", "likes").await.unwrap(),
            Some("-2".to_string())
        );
    }

    #[tokio::test]
    async fn hash_operations_reject_string_keys() {
        let store = MemoryCounterStore::new();
        store.set("like:1:2", "1", None).await.unwrap();
        let err = store
            .increment_field("like:1:2", "likes", 1)
            .await
            .expect_err("wrong type");
        assert!(matches!(err, StoreError::WrongType { .. }));
    }

    #[tokio::test]
    async fn expired_keys_read_as_missing() {
        let store = MemoryCounterStore::new();
        store
            .set("like:1:2", "1", Some(Duration::from_millis(0)))
            .await
            .unwrap();
        assert_eq!(store.get("like:1:2").await.unwrap(), None);
        assert!(store.set_if_absent("lock", "a", Duration::ZERO).await.unwrap());
        assert!(store.set_if_absent("lock", "b", Duration::from_secs(5)).await.unwrap());
        assert!(!store.set_if_absent("lock", "c", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn scan_walks_all_pages_despite_concurrent_renames() {
        let store = MemoryCounterStore::new();
        for id in 0..5 {
            store
                .increment_field(&format!("counters:mod:{id}"), "downloads", 1)
                .await
                .unwrap();
        }
        store.set("counter_sync_lock", "x", None).await.unwrap();

        let mut seen = Vec::new();
        let mut cursor = 0;
        loop {
            let page = store.scan("counters:*", cursor, 2).await.unwrap();
            for key in &page.keys {
                assert!(store
                    .rename_if_absent(key, &format!("sync:{key}"))
                    .await
                    .unwrap());
            }
            seen.extend(page.keys);
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }

        assert_eq!(seen.len(), 5);
        assert!(store.contains_key("sync:counters:mod:4"));
    }

    #[tokio::test]
    async fn fresh_scan_sweeps_expired_entries() {
        let store = MemoryCounterStore::new();
        for user in 0..1000 {
            store
                .set(&format!("like:{user}:42"), "1", Some(Duration::from_millis(1)))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let page = store.scan("counters:*", 0, 100).await.unwrap();

        assert!(page.keys.is_empty());
        assert_eq!(store.entries.len(), 0);
    }

    #[tokio::test]
    async fn expiring_writes_sweep_without_a_scan() {
        let store = MemoryCounterStore::new();
        for user in 0..1000 {
            store
                .set(&format!("like:{user}:42"), "1", Some(Duration::from_millis(1)))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        for user in 0..SWEEP_INTERVAL {
            store
                .set(&format!("favorite:{user}:42"), "1", Some(Duration::from_secs(60)))
                .await
                .unwrap();
        }

        assert_eq!(store.entries.len(), SWEEP_INTERVAL as usize);
    }

    #[tokio::test]
    async fn abandoned_scan_cursors_are_bounded() {
        let store = MemoryCounterStore::new();
        for id in 0..3 {
            store
                .increment_field(&format!("counters:mod:{id}"), "downloads", 1)
                .await
                .unwrap();
        }

        let mut last = 0;
        for _ in 0..MAX_PENDING_SCANS * 2 {
            let page = store.scan("counters:*", 0, 1).await.unwrap();
            assert_ne!(page.cursor, 0);
            last = page.cursor;
        }
        assert!(store.scans.len() <= MAX_PENDING_SCANS);

        let page = store.scan("counters:*", last, 1).await.unwrap();
        assert_eq!(page.keys, vec!["counters:mod:1".to_string()]);
    }

    #[tokio::test]
    async fn rename_if_absent_refuses_existing_target_and_missing_source() {
        let store = MemoryCounterStore::new();
        store.increment_field("a", "f", 1).await.unwrap();
        store.increment_field("b", "f", 1).await.unwrap();
        assert!(!store.rename_if_absent("a", "b").await.unwrap());
        assert!(!store.rename_if_absent("missing", "c").await.unwrap());
        assert!(store.rename_if_absent("a", "c").await.unwrap());
        assert!(!store.contains_key("a"));
    }

    #[tokio::test]
    async fn set_field_if_absent_keeps_existing_value() {
        let store = MemoryCounterStore::new();
        assert!(
            store
                .set_field_if_absent("counts:mod:1", "likes", "10", None)
                .await
                .unwrap()
        );
        assert!(
            !store
                .set_field_if_absent("counts:mod:1", "likes", "3", Some(Duration::from_secs(60)))
                .await
                .unwrap()
        );
        assert_eq!(
            store.get_field("counts:mod:1", "likes").await.unwrap(),
            Some("10".to_string())
        );
        assert!(store.ttl("counts:mod:1").is_some());
    }

    #[tokio::test]
    async fn deleting_last_field_removes_key() {
        let store = MemoryCounterStore::new();
        store.increment_field("k", "a", 1).await.unwrap();
        store.delete_field("k", "a").await.unwrap();
        assert!(store.is_empty());
    }
}
