//! In-memory repository fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use modverse::application::repos::{
    CounterColumnsRepo, CounterUpdate, HealthRepo, ModRelationsRepo, RelationCommit, RepoError,
};
use modverse::domain::types::{CounterColumn, Relation, ResourceId, ResourceType, UserId};

/// Counter columns keyed by `(resource, id)`.
#[derive(Default)]
pub struct FakeColumns {
    rows: Mutex<HashMap<(ResourceType, ResourceId), HashMap<CounterColumn, i64>>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
    failing_reads: Mutex<HashSet<CounterColumn>>,
}

impl FakeColumns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row with every owned column set to zero, then apply `values`.
    pub fn insert_row(&self, resource: ResourceType, id: ResourceId, values: &[(CounterColumn, i64)]) {
        let mut row: HashMap<CounterColumn, i64> =
            resource.columns().iter().map(|column| (*column, 0)).collect();
        for (column, value) in values {
            row.insert(*column, *value);
        }
        self.rows.lock().unwrap().insert((resource, id), row);
    }

    pub fn value(&self, resource: ResourceType, id: ResourceId, column: CounterColumn) -> Option<i64> {
        self.rows
            .lock()
            .unwrap()
            .get(&(resource, id))
            .and_then(|row| row.get(&column).copied())
    }

    /// Apply `delta` clamped at zero; `None` when the row is missing.
    pub fn adjust(
        &self,
        resource: ResourceType,
        id: ResourceId,
        column: CounterColumn,
        delta: i64,
    ) -> Option<i64> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(&(resource, id))?;
        let entry = row.entry(column).or_insert(0);
        *entry = (*entry + delta).max(0);
        Some(*entry)
    }

    pub fn remove_row(&self, resource: ResourceType, id: ResourceId) {
        self.rows.lock().unwrap().remove(&(resource, id));
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make reads of `column` fail until switched back.
    pub fn fail_reads(&self, column: CounterColumn, fail: bool) {
        let mut failing = self.failing_reads.lock().unwrap();
        if fail {
            failing.insert(column);
        } else {
            failing.remove(&column);
        }
    }
}

#[async_trait]
impl CounterColumnsRepo for FakeColumns {
    async fn read_counter(
        &self,
        resource: ResourceType,
        id: ResourceId,
        column: CounterColumn,
    ) -> Result<Option<i64>, RepoError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing_reads.lock().unwrap().contains(&column) {
            return Err(RepoError::Timeout);
        }
        Ok(self.value(resource, id, column))
    }

    async fn write_counters(
        &self,
        resource: ResourceType,
        id: ResourceId,
        updates: &[CounterUpdate],
    ) -> Result<(), RepoError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepoError::from_persistence("simulated write failure"));
        }
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(&(resource, id)).ok_or(RepoError::NotFound)?;
        for update in updates {
            row.insert(update.column, update.value);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Relation rows; likes adjust `mods.likes` on the linked [`FakeColumns`].
pub struct FakeRelations {
    columns: std::sync::Arc<FakeColumns>,
    rows: Mutex<HashSet<(Relation, UserId, ResourceId)>>,
    exists_calls: AtomicUsize,
}

impl FakeRelations {
    pub fn new(columns: std::sync::Arc<FakeColumns>) -> Self {
        Self {
            columns,
            rows: Mutex::new(HashSet::new()),
            exists_calls: AtomicUsize::new(0),
        }
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub fn contains(&self, relation: Relation, user: UserId, mod_id: ResourceId) -> bool {
        self.rows.lock().unwrap().contains(&(relation, user, mod_id))
    }

    /// Insert a row without touching counters, as if written by another process.
    pub fn seed(&self, relation: Relation, user: UserId, mod_id: ResourceId) {
        self.rows.lock().unwrap().insert((relation, user, mod_id));
    }
}

#[async_trait]
impl ModRelationsRepo for FakeRelations {
    async fn relation_exists(
        &self,
        relation: Relation,
        user: UserId,
        mod_id: ResourceId,
    ) -> Result<bool, RepoError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.contains(relation, user, mod_id))
    }

    async fn create_relation(
        &self,
        relation: Relation,
        user: UserId,
        mod_id: ResourceId,
    ) -> Result<RelationCommit, RepoError> {
        if self.columns.value(ResourceType::Mod, mod_id, CounterColumn::Likes).is_none() {
            return Err(RepoError::InvalidInput {
                message: "violates foreign key constraint".to_string(),
            });
        }
        let inserted = self.rows.lock().unwrap().insert((relation, user, mod_id));
        if !inserted {
            return Err(RepoError::Duplicate {
                constraint: format!("{}_user_mod_key", relation.table()),
            });
        }
        let counter = relation
            .counter()
            .and_then(|column| self.columns.adjust(ResourceType::Mod, mod_id, column, 1));
        Ok(RelationCommit { counter })
    }

    async fn delete_relation(
        &self,
        relation: Relation,
        user: UserId,
        mod_id: ResourceId,
    ) -> Result<Option<RelationCommit>, RepoError> {
        let removed = self.rows.lock().unwrap().remove(&(relation, user, mod_id));
        if !removed {
            return Ok(None);
        }
        let counter = relation
            .counter()
            .and_then(|column| self.columns.adjust(ResourceType::Mod, mod_id, column, -1));
        Ok(Some(RelationCommit { counter }))
    }
}

/// Health check with a switchable outcome.
#[derive(Default)]
pub struct FakeHealth {
    down: AtomicBool,
}

impl FakeHealth {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl HealthRepo for FakeHealth {
    async fn ping(&self) -> Result<(), RepoError> {
        if self.down.load(Ordering::SeqCst) {
            Err(RepoError::Timeout)
        } else {
            Ok(())
        }
    }
}
