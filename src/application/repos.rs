//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::types::{CounterColumn, Relation, ResourceId, ResourceType, UserId};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Absolute value to store in one counter column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterUpdate {
    pub column: CounterColumn,
    pub value: i64,
}

/// Committed result of a relation write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationCommit {
    /// The relation's counter column after the commit; `None` when the
    /// relation has no counter.
    pub counter: Option<i64>,
}

/// Durable counter columns addressed by resource type and primary key.
#[async_trait]
pub trait CounterColumnsRepo: Send + Sync {
    /// Current value of `column`, or `None` when the row does not exist.
    async fn read_counter(
        &self,
        resource: ResourceType,
        id: ResourceId,
        column: CounterColumn,
    ) -> Result<Option<i64>, RepoError>;

    /// Store every update in a single statement. `NotFound` when the row is gone.
    async fn write_counters(
        &self,
        resource: ResourceType,
        id: ResourceId,
        updates: &[CounterUpdate],
    ) -> Result<(), RepoError>;
}

/// User-to-mod relations (likes, favorites).
#[async_trait]
pub trait ModRelationsRepo: Send + Sync {
    async fn relation_exists(
        &self,
        relation: Relation,
        user: UserId,
        mod_id: ResourceId,
    ) -> Result<bool, RepoError>;

    /// Insert the relation row and adjust the relation's counter column in the
    /// same transaction. `Duplicate` when the row already exists.
    async fn create_relation(
        &self,
        relation: Relation,
        user: UserId,
        mod_id: ResourceId,
    ) -> Result<RelationCommit, RepoError>;

    /// Delete the relation row and adjust the counter column in the same
    /// transaction. `None` when there was nothing to delete.
    async fn delete_relation(
        &self,
        relation: Relation,
        user: UserId,
        mod_id: ResourceId,
    ) -> Result<Option<RelationCommit>, RepoError>;
}

/// Connectivity check for the durable store.
#[async_trait]
pub trait HealthRepo: Send + Sync {
    async fn ping(&self) -> Result<(), RepoError>;
}
