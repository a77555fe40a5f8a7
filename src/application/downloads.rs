//! Download counting for mod versions.
//!
//! Each recorded download bumps `mod_version.downloads` and the parent
//! `mod.total_downloads` in the cache; the reconciliation job folds both into
//! Postgres later.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use crate::application::counts::{CountAccessor, CountError};
use crate::domain::types::{CounterColumn, ResourceId, ResourceType};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Count(#[from] CountError),
    #[error("download request timed out")]
    Timeout,
}

pub struct DownloadService {
    counts: Arc<CountAccessor>,
    request_timeout: Duration,
}

impl DownloadService {
    pub fn new(counts: Arc<CountAccessor>, request_timeout: Duration) -> Self {
        Self {
            counts,
            request_timeout,
        }
    }

    /// Count one download of `version_id` (belonging to `mod_id`) and return
    /// the version's current download count.
    pub async fn record_download(
        &self,
        mod_id: ResourceId,
        version_id: ResourceId,
    ) -> Result<i64, DownloadError> {
        timeout(self.request_timeout, self.record_inner(mod_id, version_id))
            .await
            .map_err(|_| DownloadError::Timeout)?
    }

    pub async fn count(
        &self,
        resource: ResourceType,
        id: ResourceId,
        column: CounterColumn,
    ) -> Result<i64, DownloadError> {
        timeout(
            self.request_timeout,
            self.counts.get_count(resource, id, column),
        )
        .await
        .map_err(|_| DownloadError::Timeout)?
        .map_err(DownloadError::from)
    }

    async fn record_inner(
        &self,
        mod_id: ResourceId,
        version_id: ResourceId,
    ) -> Result<i64, DownloadError> {
        // Both rows must exist before deltas are written for them.
        self.counts
            .get_count(ResourceType::ModVersion, version_id, CounterColumn::Downloads)
            .await?;
        self.counts
            .get_count(ResourceType::Mod, mod_id, CounterColumn::TotalDownloads)
            .await?;

        self.counts
            .increment(ResourceType::ModVersion, version_id, CounterColumn::Downloads)
            .await?;
        self.counts
            .increment(ResourceType::Mod, mod_id, CounterColumn::TotalDownloads)
            .await?;

        let count = self
            .counts
            .get_count(ResourceType::ModVersion, version_id, CounterColumn::Downloads)
            .await?;
        debug!(mod_id, version_id, count, "Recorded download");
        Ok(count)
    }
}
