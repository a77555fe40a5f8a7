use std::collections::HashSet;

use modverse::application::repos::{CounterColumnsRepo, CounterUpdate, ModRelationsRepo, RepoError};
use modverse::domain::types::{CounterColumn, Relation, ResourceType};
use modverse::infra::db::PostgresRepositories;
use sqlx::PgPool;

async fn insert_mod(pool: &PgPool, likes: i64) -> i64 {
    sqlx::query_scalar("INSERT INTO mods (name, likes) VALUES ('sample', $1) RETURNING id")
        .bind(likes)
        .fetch_one(pool)
        .await
        .expect("insert mod")
}

#[sqlx::test(migrations = "./migrations")]
async fn relation_indexes_exist(pool: PgPool) {
    let rows: Vec<String> = sqlx::query_scalar(
        "SELECT indexname FROM pg_indexes WHERE schemaname = 'public' AND tablename IN ('mod_likes', 'mod_favorites', 'mod_versions')",
    )
    .fetch_all(&pool)
    .await
    .expect("fetch relation indexes");

    let indexes: HashSet<String> = rows.into_iter().collect();
    for name in [
        "mod_likes_mod_id_idx",
        "mod_favorites_mod_id_idx",
        "mod_versions_mod_id_idx",
    ] {
        assert!(indexes.contains(name), "missing {name}");
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn write_counters_sets_absolute_values(pool: PgPool) {
    let repos = PostgresRepositories::new(pool.clone());
    let mod_id = insert_mod(&pool, 10).await;

    repos
        .write_counters(
            ResourceType::Mod,
            mod_id,
            &[
                CounterUpdate {
                    column: CounterColumn::Likes,
                    value: 12,
                },
                CounterUpdate {
                    column: CounterColumn::TotalDownloads,
                    value: 3,
                },
            ],
        )
        .await
        .expect("write counters");

    let likes = repos
        .read_counter(ResourceType::Mod, mod_id, CounterColumn::Likes)
        .await
        .expect("read likes");
    let downloads = repos
        .read_counter(ResourceType::Mod, mod_id, CounterColumn::TotalDownloads)
        .await
        .expect("read downloads");

    assert_eq!(likes, Some(12));
    assert_eq!(downloads, Some(3));
}

#[sqlx::test(migrations = "./migrations")]
async fn missing_rows_read_as_none_and_fail_writes(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);

    let value = repos
        .read_counter(ResourceType::Mod, 404, CounterColumn::Likes)
        .await
        .expect("read missing row");
    assert_eq!(value, None);

    let err = repos
        .write_counters(
            ResourceType::Mod,
            404,
            &[CounterUpdate {
                column: CounterColumn::Likes,
                value: 1,
            }],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
}

#[sqlx::test(migrations = "./migrations")]
async fn foreign_columns_are_rejected(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);

    let err = repos
        .read_counter(ResourceType::ModVersion, 1, CounterColumn::Likes)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidInput { .. }));
}

#[sqlx::test(migrations = "./migrations")]
async fn like_rows_move_the_likes_column(pool: PgPool) {
    let repos = PostgresRepositories::new(pool.clone());
    let mod_id = insert_mod(&pool, 10).await;

    let commit = repos
        .create_relation(Relation::Like, 7, mod_id)
        .await
        .expect("create like");
    assert_eq!(commit.counter, Some(11));
    assert!(
        repos
            .relation_exists(Relation::Like, 7, mod_id)
            .await
            .expect("exists")
    );

    let err = repos
        .create_relation(Relation::Like, 7, mod_id)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Duplicate { .. }));

    let likes = repos
        .read_counter(ResourceType::Mod, mod_id, CounterColumn::Likes)
        .await
        .expect("read likes");
    assert_eq!(likes, Some(11));

    let commit = repos
        .delete_relation(Relation::Like, 7, mod_id)
        .await
        .expect("delete like");
    assert_eq!(commit.map(|commit| commit.counter), Some(Some(10)));
    assert!(
        repos
            .delete_relation(Relation::Like, 7, mod_id)
            .await
            .expect("delete missing like")
            .is_none()
    );

    let likes = repos
        .read_counter(ResourceType::Mod, mod_id, CounterColumn::Likes)
        .await
        .expect("read likes");
    assert_eq!(likes, Some(10));
}

#[sqlx::test(migrations = "./migrations")]
async fn favorites_leave_counters_alone(pool: PgPool) {
    let repos = PostgresRepositories::new(pool.clone());
    let mod_id = insert_mod(&pool, 10).await;

    let commit = repos
        .create_relation(Relation::Favorite, 7, mod_id)
        .await
        .expect("create favorite");
    assert_eq!(commit.counter, None);

    let likes = repos
        .read_counter(ResourceType::Mod, mod_id, CounterColumn::Likes)
        .await
        .expect("read likes");
    assert_eq!(likes, Some(10));
}

#[sqlx::test(migrations = "./migrations")]
async fn relation_for_unknown_mod_is_invalid_input(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);

    let err = repos
        .create_relation(Relation::Favorite, 7, 404)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidInput { .. }));
}
