//! Start-up failures of the process adapters.

use std::io;
use std::net::SocketAddr;

use sqlx::migrate::MigrateError;
use thiserror::Error;
use tracing_subscriber::util::TryInitError;

use crate::cache::StoreError;
use crate::config::CacheBackendKind;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("database url is not configured")]
    MissingDatabaseUrl,
    #[error("failed to connect to postgres")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("failed to apply database migrations")]
    Migrate(#[source] MigrateError),
    #[error("{backend:?} counter store is unavailable")]
    StoreUnavailable {
        backend: CacheBackendKind,
        #[source]
        source: StoreError,
    },
    #[error("failed to bind HTTP listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to install tracing subscriber")]
    Telemetry(#[source] TryInitError),
}

impl InfraError {
    pub fn store_unavailable(backend: CacheBackendKind, source: StoreError) -> Self {
        Self::StoreUnavailable { backend, source }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn store_unavailable_keeps_the_store_error() {
        let err = InfraError::store_unavailable(
            CacheBackendKind::Redis,
            StoreError::Command("connection refused".to_string()),
        );

        assert_eq!(err.to_string(), "Redis counter store is unavailable");
        let source = err.source().expect("store error is the source");
        assert!(source.to_string().contains("connection refused"));
    }

    #[test]
    fn bind_failure_keeps_the_io_error() {
        let err = InfraError::Bind {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            source: io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
        };

        assert_eq!(
            err.to_string(),
            "failed to bind HTTP listener on 127.0.0.1:8080"
        );
        let source = err
            .source()
            .and_then(|source| source.downcast_ref::<io::Error>())
            .expect("io error is the source");
        assert_eq!(source.kind(), io::ErrorKind::AddrInUse);
    }
}
