use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};

use crate::application::repos::{CounterColumnsRepo, CounterUpdate, RepoError};
use crate::domain::types::{CounterColumn, ResourceId, ResourceType};

use super::{PostgresRepositories, map_sqlx_error};

// Identifiers pushed into SQL below come from `ResourceType::table` and
// `CounterColumn::as_str`, never from request input.

#[async_trait]
impl CounterColumnsRepo for PostgresRepositories {
    async fn read_counter(
        &self,
        resource: ResourceType,
        id: ResourceId,
        column: CounterColumn,
    ) -> Result<Option<i64>, RepoError> {
        resource
            .ensure_owns(column)
            .map_err(|err| RepoError::InvalidInput {
                message: err.to_string(),
            })?;

        let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
        qb.push(column.as_str());
        qb.push(" FROM ");
        qb.push(resource.table());
        qb.push(" WHERE id = ");
        qb.push_bind(id);

        qb.build_query_scalar::<i64>()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn write_counters(
        &self,
        resource: ResourceType,
        id: ResourceId,
        updates: &[CounterUpdate],
    ) -> Result<(), RepoError> {
        if updates.is_empty() {
            return Ok(());
        }
        for update in updates {
            resource
                .ensure_owns(update.column)
                .map_err(|err| RepoError::InvalidInput {
                    message: err.to_string(),
                })?;
        }

        let mut qb = QueryBuilder::<Postgres>::new("UPDATE ");
        qb.push(resource.table());
        qb.push(" SET ");
        {
            let mut assignments = qb.separated(", ");
            for update in updates {
                assignments.push(update.column.as_str());
                assignments.push_unseparated(" = ");
                assignments.push_bind_unseparated(update.value);
            }
            assignments.push("updated_at = NOW()");
        }
        qb.push(" WHERE id = ");
        qb.push_bind(id);

        let result = qb
            .build()
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}
