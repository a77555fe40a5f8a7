//! Tri-state relation flags cached in front of the relation tables.
//!
//! A flag key is absent (unknown), `"0"` (no relation) or `"1"` (relation
//! exists). Reads fill misses from Postgres; writes go through after the
//! durable change has committed.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::repos::{ModRelationsRepo, RepoError};
use crate::cache::{CounterStore, StoreError, flag_key};
use crate::domain::types::{Relation, ResourceId, UserId};

pub const DEFAULT_FLAG_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const FLAG_TRUE: &str = "1";
const FLAG_FALSE: &str = "0";
const METRIC_FLAG_LOOKUP: &str = "modverse_flag_lookup_total";

#[derive(Debug, Error)]
pub enum FlagError {
    #[error("flag cache unavailable: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

pub struct FlagCache {
    store: Arc<dyn CounterStore>,
    relations: Arc<dyn ModRelationsRepo>,
    ttl: Duration,
}

impl FlagCache {
    pub fn new(store: Arc<dyn CounterStore>, relations: Arc<dyn ModRelationsRepo>) -> Self {
        Self {
            store,
            relations,
            ttl: DEFAULT_FLAG_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub async fn check_flag(
        &self,
        relation: Relation,
        user: UserId,
        mod_id: ResourceId,
    ) -> Result<bool, FlagError> {
        let key = flag_key(relation, user, mod_id);
        match self.store.get(&key).await?.as_deref() {
            Some(FLAG_TRUE) => {
                counter!(METRIC_FLAG_LOOKUP, "result" => "hit").increment(1);
                return Ok(true);
            }
            Some(FLAG_FALSE) => {
                counter!(METRIC_FLAG_LOOKUP, "result" => "hit").increment(1);
                return Ok(false);
            }
            Some(other) => {
                warn!(key = %key, value = other, "Ignoring unrecognised flag value");
            }
            None => {}
        }
        counter!(METRIC_FLAG_LOOKUP, "result" => "miss").increment(1);

        let exists = self
            .relations
            .relation_exists(relation, user, mod_id)
            .await?;
        self.write(&key, exists).await?;
        debug!(key = %key, exists, "Cached relation flag");
        Ok(exists)
    }

    /// Record that the relation now exists. Call after the durable insert.
    pub async fn set_flag(
        &self,
        relation: Relation,
        user: UserId,
        mod_id: ResourceId,
    ) -> Result<(), FlagError> {
        self.write(&flag_key(relation, user, mod_id), true).await
    }

    /// Record that the relation no longer exists. Call after the durable delete.
    pub async fn clear_flag(
        &self,
        relation: Relation,
        user: UserId,
        mod_id: ResourceId,
    ) -> Result<(), FlagError> {
        self.write(&flag_key(relation, user, mod_id), false).await
    }

    async fn write(&self, key: &str, value: bool) -> Result<(), FlagError> {
        let encoded = if value { FLAG_TRUE } else { FLAG_FALSE };
        self.store.set(key, encoded, Some(self.ttl)).await?;
        Ok(())
    }
}
