use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder, Transaction};

use crate::application::repos::{ModRelationsRepo, RelationCommit, RepoError};
use crate::domain::types::{Relation, ResourceId, UserId};

use super::{PostgresRepositories, map_sqlx_error};

#[async_trait]
impl ModRelationsRepo for PostgresRepositories {
    async fn relation_exists(
        &self,
        relation: Relation,
        user: UserId,
        mod_id: ResourceId,
    ) -> Result<bool, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT EXISTS (SELECT 1 FROM ");
        qb.push(relation.table());
        qb.push(" WHERE user_id = ");
        qb.push_bind(user);
        qb.push(" AND mod_id = ");
        qb.push_bind(mod_id);
        qb.push(")");

        qb.build_query_scalar::<bool>()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn create_relation(
        &self,
        relation: Relation,
        user: UserId,
        mod_id: ResourceId,
    ) -> Result<RelationCommit, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let mut qb = QueryBuilder::<Postgres>::new("INSERT INTO ");
        qb.push(relation.table());
        qb.push(" (user_id, mod_id) VALUES (");
        qb.push_bind(user);
        qb.push(", ");
        qb.push_bind(mod_id);
        qb.push(")");
        qb.build()
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let counter = adjust_relation_counter(&mut tx, relation, mod_id, 1).await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(RelationCommit { counter })
    }

    async fn delete_relation(
        &self,
        relation: Relation,
        user: UserId,
        mod_id: ResourceId,
    ) -> Result<Option<RelationCommit>, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let mut qb = QueryBuilder::<Postgres>::new("DELETE FROM ");
        qb.push(relation.table());
        qb.push(" WHERE user_id = ");
        qb.push_bind(user);
        qb.push(" AND mod_id = ");
        qb.push_bind(mod_id);
        let deleted = qb
            .build()
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

        if deleted == 0 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(None);
        }

        let counter = adjust_relation_counter(&mut tx, relation, mod_id, -1).await?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(Some(RelationCommit { counter }))
    }
}

/// Apply `delta` to the relation's counter column on `mods`, if it has one,
/// and return the new value.
async fn adjust_relation_counter(
    tx: &mut Transaction<'_, Postgres>,
    relation: Relation,
    mod_id: ResourceId,
    delta: i64,
) -> Result<Option<i64>, RepoError> {
    let Some(column) = relation.counter() else {
        return Ok(None);
    };

    let mut qb = QueryBuilder::<Postgres>::new("UPDATE mods SET ");
    qb.push(column.as_str());
    qb.push(" = GREATEST(");
    qb.push(column.as_str());
    qb.push(" + ");
    qb.push_bind(delta);
    qb.push(", 0), updated_at = NOW() WHERE id = ");
    qb.push_bind(mod_id);
    qb.push(" RETURNING ");
    qb.push(column.as_str());

    qb.build_query_scalar::<i64>()
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_sqlx_error)?
        .map(Some)
        .ok_or(RepoError::NotFound)
}
