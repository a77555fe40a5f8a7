//! Cached counter reads and writes.
//!
//! Increments land in the `counters:` hash as pending deltas and never touch
//! Postgres. Reads add the pending delta to a cached durable baseline kept in
//! a separate `counts:` hash, so a delta is never mistaken for an absolute
//! value.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use thiserror::Error;
use tracing::debug;

use crate::application::repos::{CounterColumnsRepo, RepoError};
use crate::cache::{CounterKey, CounterStore, StoreError, parse_counter};
use crate::domain::error::DomainError;
use crate::domain::types::{CounterColumn, ResourceId, ResourceType};

pub const DEFAULT_BASELINE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const METRIC_BASELINE_LOOKUP: &str = "modverse_count_baseline_total";

#[derive(Debug, Error)]
pub enum CountError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{resource} {id} not found")]
    NotFound {
        resource: ResourceType,
        id: ResourceId,
    },
}

pub struct CountAccessor {
    store: Arc<dyn CounterStore>,
    columns: Arc<dyn CounterColumnsRepo>,
    baseline_ttl: Duration,
}

impl CountAccessor {
    pub fn new(store: Arc<dyn CounterStore>, columns: Arc<dyn CounterColumnsRepo>) -> Self {
        Self {
            store,
            columns,
            baseline_ttl: DEFAULT_BASELINE_TTL,
        }
    }

    pub fn with_baseline_ttl(mut self, ttl: Duration) -> Self {
        self.baseline_ttl = ttl;
        self
    }

    /// Add one to the pending delta. Returns the new delta.
    pub async fn increment(
        &self,
        resource: ResourceType,
        id: ResourceId,
        column: CounterColumn,
    ) -> Result<i64, CountError> {
        resource.ensure_owns(column)?;
        let key = CounterKey::new(resource, id).render();
        Ok(self.store.increment_field(&key, column.as_str(), 1).await?)
    }

    /// Subtract one from the pending delta. Returns the new delta.
    pub async fn decrement(
        &self,
        resource: ResourceType,
        id: ResourceId,
        column: CounterColumn,
    ) -> Result<i64, CountError> {
        resource.ensure_owns(column)?;
        let key = CounterKey::new(resource, id).render();
        Ok(self.store.decrement_field(&key, column.as_str(), 1).await?)
    }

    /// Durable baseline plus pending delta.
    pub async fn get_count(
        &self,
        resource: ResourceType,
        id: ResourceId,
        column: CounterColumn,
    ) -> Result<i64, CountError> {
        resource.ensure_owns(column)?;
        let key = CounterKey::new(resource, id);
        let baseline = self.baseline(&key, column).await?;

        let rendered = key.render();
        let delta = match self.store.get_field(&rendered, column.as_str()).await? {
            Some(raw) => parse_counter(&rendered, &raw)?,
            None => 0,
        };

        Ok(baseline.saturating_add(delta))
    }

    async fn baseline(&self, key: &CounterKey, column: CounterColumn) -> Result<i64, CountError> {
        let baseline_key = key.baseline_key();
        if let Some(raw) = self.store.get_field(&baseline_key, column.as_str()).await? {
            counter!(METRIC_BASELINE_LOOKUP, "result" => "hit").increment(1);
            return Ok(parse_counter(&baseline_key, &raw)?);
        }
        counter!(METRIC_BASELINE_LOOKUP, "result" => "miss").increment(1);

        let value = self
            .columns
            .read_counter(key.resource(), key.id(), column)
            .await?
            .ok_or(CountError::NotFound {
                resource: key.resource(),
                id: key.id(),
            })?;

        // A reconciliation cycle may have refreshed the baseline since the read.
        let written = self
            .store
            .set_field_if_absent(
                &baseline_key,
                column.as_str(),
                &value.to_string(),
                Some(self.baseline_ttl),
            )
            .await?;
        if written {
            debug!(key = %baseline_key, column = %column, value, "Cached counter baseline");
            return Ok(value);
        }

        match self.store.get_field(&baseline_key, column.as_str()).await? {
            Some(raw) => Ok(parse_counter(&baseline_key, &raw)?),
            None => Ok(value),
        }
    }

    /// Replace the cached baseline of one column with a value just committed
    /// to Postgres.
    pub async fn set_baseline(
        &self,
        resource: ResourceType,
        id: ResourceId,
        column: CounterColumn,
        value: i64,
    ) -> Result<(), CountError> {
        resource.ensure_owns(column)?;
        let baseline_key = CounterKey::new(resource, id).baseline_key();
        self.store
            .set_field(
                &baseline_key,
                column.as_str(),
                &value.to_string(),
                Some(self.baseline_ttl),
            )
            .await?;
        Ok(())
    }

    /// Drop the cached baseline of one column so the next read goes to Postgres.
    pub async fn invalidate_baseline(
        &self,
        resource: ResourceType,
        id: ResourceId,
        column: CounterColumn,
    ) -> Result<(), CountError> {
        let baseline_key = CounterKey::new(resource, id).baseline_key();
        self.store
            .delete_field(&baseline_key, column.as_str())
            .await?;
        Ok(())
    }
}
