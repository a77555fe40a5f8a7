//! Redis-backed counter store over a deadpool connection pool.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime, Timeouts};
use redis::AsyncCommands;
use tracing::debug;

use super::store::{CounterStore, ScanPage, StoreError};

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Command(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for StoreError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        StoreError::Pool(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct RedisPoolOptions {
    pub url: String,
    pub pool_size: usize,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct RedisCounterStore {
    pool: Pool,
}

impl RedisCounterStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn connect(options: &RedisPoolOptions) -> Result<Self, StoreError> {
        let mut config = Config::from_url(options.url.as_str());
        let mut pool_config = PoolConfig::new(options.pool_size);
        let mut timeouts = Timeouts::default();
        timeouts.wait = Some(options.timeout);
        timeouts.create = Some(options.timeout);
        timeouts.recycle = Some(options.timeout);
        pool_config.timeouts = timeouts;
        config.pool = Some(pool_config);

        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|err| StoreError::Pool(err.to_string()))?;

        debug!(
            target = "modverse::cache::redis",
            pool_size = options.pool_size,
            "Redis pool created"
        );
        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<Connection, StoreError> {
        Ok(self.pool.get().await?)
    }
}

fn millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1)
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn increment_field(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> Result<i64, StoreError> {
        let mut conn = self.conn().await?;
        Ok(conn.hincr(key, field, delta).await?)
    }

    async fn get_field(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(conn.hget(key, field).await?)
    }

    async fn set_field(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic().hset(key, field, value).ignore();
        if let Some(ttl) = ttl {
            pipe.pexpire(key, millis(ttl)).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_field_if_absent(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic().hset_nx(key, field, value);
        if let Some(ttl) = ttl {
            pipe.pexpire(key, millis(ttl)).ignore();
        }
        let (written,): (bool,) = pipe.query_async(&mut conn).await?;
        Ok(written)
    }

    async fn delete_field(&self, key: &str, field: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.hdel(key, field).await?;
        Ok(())
    }

    async fn get_all_fields(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(conn.hgetall(key).await?)
    }

    async fn scan(
        &self,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> Result<ScanPage, StoreError> {
        let mut conn = self.conn().await?;
        let (cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count.max(1))
            .query_async(&mut conn)
            .await?;
        Ok(ScanPage { keys, cursor })
    }

    async fn rename_if_absent(&self, from: &str, to: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        match conn.rename_nx::<_, _, bool>(from, to).await {
            Ok(renamed) => Ok(renamed),
            Err(err) if err.to_string().contains("no such key") => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
