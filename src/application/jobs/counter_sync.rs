//! Reconciliation of cached counter deltas into Postgres.
//!
//! One cycle:
//! 1. Optionally take the distributed lock (`SET NX` with TTL).
//! 2. Merge claims left behind by an interrupted cycle.
//! 3. Scan the key pattern; claim each key by renaming it to `sync:<key>`,
//!    then merge the claimed deltas into the owning row with one UPDATE.
//! 4. Release the lock.
//!
//! Renaming before reading means increments arriving mid-merge land in a
//! fresh live key and are picked up by the next cycle instead of being lost.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::repos::{CounterColumnsRepo, CounterUpdate, RepoError};
use crate::cache::{
    CLAIM_PREFIX, CounterKey, CounterStore, KeyParseError, StoreError, claim_key, parse_counter,
};

use super::sync_config::SyncConfig;

const METRIC_SYNC_CYCLES: &str = "modverse_counter_sync_cycles_total";
const METRIC_SYNC_KEYS: &str = "modverse_counter_sync_keys_total";
const METRIC_SYNC_CYCLE_MS: &str = "modverse_counter_sync_cycle_ms";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("counter sync lock `{key}` is held by another instance")]
    LockContended { key: String },
    #[error("failed to acquire counter sync lock: {0}")]
    Lock(#[source] StoreError),
    #[error("failed to scan `{pattern}`: {source}")]
    Scan {
        pattern: String,
        #[source]
        source: StoreError,
    },
}

/// Failure confined to one key; logged and counted, never propagated.
#[derive(Debug, Error)]
enum KeySyncError {
    #[error(transparent)]
    Parse(#[from] KeyParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("durable update failed: {0}")]
    Write(#[source] RepoError),
}

#[derive(Debug, Clone, Copy)]
enum ScanPhase {
    /// `sync:` claims orphaned by an interrupted cycle.
    Recover,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyOutcome {
    Merged,
    Skipped,
}

/// Tally of one reconciliation cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Keys returned by the scans (live and recovered claims).
    pub scanned: usize,
    /// Keys whose deltas reached Postgres.
    pub merged: usize,
    /// Malformed, vanished or empty keys.
    pub skipped: usize,
    /// Keys left for a later cycle after an error.
    pub failed: usize,
    /// Claims recovered from an interrupted cycle.
    pub recovered: usize,
}

impl SyncReport {
    fn record(&mut self, outcome: Result<KeyOutcome, KeySyncError>, key: &str) {
        match outcome {
            Ok(KeyOutcome::Merged) => {
                self.merged += 1;
                counter!(METRIC_SYNC_KEYS, "outcome" => "merged").increment(1);
            }
            Ok(KeyOutcome::Skipped) => {
                self.skipped += 1;
                counter!(METRIC_SYNC_KEYS, "outcome" => "skipped").increment(1);
            }
            Err(KeySyncError::Parse(err)) => {
                warn!(
                    target = "modverse::jobs::counter_sync",
                    key,
                    error = %err,
                    "Skipping malformed counter key"
                );
                self.skipped += 1;
                counter!(METRIC_SYNC_KEYS, "outcome" => "skipped").increment(1);
            }
            Err(err) => {
                error!(
                    target = "modverse::jobs::counter_sync",
                    key,
                    error = %err,
                    "Counter key sync failed"
                );
                self.failed += 1;
                counter!(METRIC_SYNC_KEYS, "outcome" => "failed").increment(1);
            }
        }
    }
}

pub struct CounterSync {
    store: Arc<dyn CounterStore>,
    columns: Arc<dyn CounterColumnsRepo>,
    config: SyncConfig,
}

impl CounterSync {
    pub fn new(
        store: Arc<dyn CounterStore>,
        columns: Arc<dyn CounterColumnsRepo>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            columns,
            config: config.normalized(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run one cycle and log its outcome. Lock contention is a normal result.
    pub async fn run_cycle(&self) -> Option<SyncReport> {
        let started_at = Instant::now();
        let result = self.sync_all().await;
        histogram!(METRIC_SYNC_CYCLE_MS)
            .record(started_at.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(report) => {
                counter!(METRIC_SYNC_CYCLES, "outcome" => "completed").increment(1);
                info!(
                    target = "modverse::jobs::counter_sync",
                    scanned = report.scanned,
                    merged = report.merged,
                    skipped = report.skipped,
                    failed = report.failed,
                    recovered = report.recovered,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "Counter sync cycle complete"
                );
                Some(report)
            }
            Err(SyncError::LockContended { key }) => {
                counter!(METRIC_SYNC_CYCLES, "outcome" => "contended").increment(1);
                info!(
                    target = "modverse::jobs::counter_sync",
                    lock_key = %key,
                    "Counter sync skipped: another instance holds the lock"
                );
                None
            }
            Err(err) => {
                counter!(METRIC_SYNC_CYCLES, "outcome" => "failed").increment(1);
                error!(
                    target = "modverse::jobs::counter_sync",
                    error = %err,
                    "Counter sync cycle failed"
                );
                None
            }
        }
    }

    /// One full reconciliation cycle.
    pub async fn sync_all(&self) -> Result<SyncReport, SyncError> {
        let lock_token = if self.config.enable_lock {
            Some(self.acquire_lock().await?)
        } else {
            None
        };

        let result = self.sync_unlocked().await;

        if let Some(token) = lock_token {
            self.release_lock(&token).await;
        }
        result
    }

    async fn sync_unlocked(&self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();

        let claim_pattern = format!("{CLAIM_PREFIX}{}", self.config.key_pattern);
        self.scan_all(&claim_pattern, ScanPhase::Recover, &mut report)
            .await?;

        let pattern = self.config.key_pattern.clone();
        self.scan_all(&pattern, ScanPhase::Live, &mut report).await?;

        Ok(report)
    }

    async fn acquire_lock(&self) -> Result<String, SyncError> {
        let token = Uuid::new_v4().to_string();
        let acquired = self
            .store
            .set_if_absent(&self.config.lock_key, &token, self.config.lock_ttl)
            .await
            .map_err(SyncError::Lock)?;
        if !acquired {
            return Err(SyncError::LockContended {
                key: self.config.lock_key.clone(),
            });
        }
        debug!(
            target = "modverse::jobs::counter_sync",
            lock_key = %self.config.lock_key,
            token = %token,
            "Counter sync lock acquired"
        );
        Ok(token)
    }

    async fn release_lock(&self, token: &str) {
        if let Err(err) = self.store.delete(&self.config.lock_key).await {
            warn!(
                target = "modverse::jobs::counter_sync",
                lock_key = %self.config.lock_key,
                token,
                error = %err,
                "Failed to release counter sync lock; it expires with its TTL"
            );
        }
    }

    async fn scan_all(
        &self,
        pattern: &str,
        phase: ScanPhase,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let mut cursor = 0;
        loop {
            let page = self
                .store
                .scan(pattern, cursor, self.config.batch_size)
                .await
                .map_err(|source| SyncError::Scan {
                    pattern: pattern.to_string(),
                    source,
                })?;

            for key in page.keys {
                report.scanned += 1;
                let outcome = match phase {
                    ScanPhase::Recover => {
                        let outcome = self.recover_claim(&key).await;
                        if matches!(outcome, Ok(KeyOutcome::Merged)) {
                            report.recovered += 1;
                        }
                        outcome
                    }
                    ScanPhase::Live => self.sync_key(&key).await,
                };
                report.record(outcome, &key);
            }

            cursor = page.cursor;
            if cursor == 0 {
                return Ok(());
            }
        }
    }

    async fn sync_key(&self, key: &str) -> Result<KeyOutcome, KeySyncError> {
        let counter_key = CounterKey::parse(key)?;
        let claim = claim_key(key);
        if !self.store.rename_if_absent(key, &claim).await? {
            // Gone since the scan, or an earlier claim is still pending.
            debug!(
                target = "modverse::jobs::counter_sync",
                key, "Counter key not claimed"
            );
            return Ok(KeyOutcome::Skipped);
        }
        self.merge_claim(&counter_key, &claim).await
    }

    async fn recover_claim(&self, claim: &str) -> Result<KeyOutcome, KeySyncError> {
        let counter_key = CounterKey::parse_claim(claim)?;
        info!(
            target = "modverse::jobs::counter_sync",
            claim, "Recovering counter claim from an interrupted cycle"
        );
        self.merge_claim(&counter_key, claim).await
    }

    async fn merge_claim(
        &self,
        key: &CounterKey,
        claim: &str,
    ) -> Result<KeyOutcome, KeySyncError> {
        let fields = self.store.get_all_fields(claim).await?;
        if fields.is_empty() {
            self.store.delete(claim).await?;
            return Ok(KeyOutcome::Skipped);
        }

        let resource = key.resource();
        let mut updates: Vec<CounterUpdate> = Vec::new();
        let mut applied: Vec<(String, i64)> = Vec::new();
        let mut retry: Vec<(String, i64)> = Vec::new();

        for (field, raw) in &fields {
            let Some(column) = self.config.field_mappings.get(field).copied() else {
                debug!(
                    target = "modverse::jobs::counter_sync",
                    key = %key,
                    field = %field,
                    "Dropping unmapped counter field"
                );
                continue;
            };
            if !resource.owns(column) {
                warn!(
                    target = "modverse::jobs::counter_sync",
                    key = %key,
                    column = %column,
                    "Dropping counter field for a column the resource does not have"
                );
                continue;
            }
            let delta = match parse_counter(claim, raw) {
                Ok(delta) => delta,
                Err(err) => {
                    warn!(
                        target = "modverse::jobs::counter_sync",
                        key = %key,
                        field = %field,
                        error = %err,
                        "Dropping unparseable counter delta"
                    );
                    continue;
                }
            };
            if delta == 0 {
                continue;
            }

            match self.columns.read_counter(resource, key.id(), column).await {
                Ok(Some(durable)) => {
                    updates.push(CounterUpdate {
                        column,
                        value: durable.saturating_add(delta),
                    });
                    applied.push((field.clone(), delta));
                }
                Ok(None) => {
                    warn!(
                        target = "modverse::jobs::counter_sync",
                        key = %key,
                        column = %column,
                        delta,
                        "Dropping delta for a missing row"
                    );
                }
                Err(err) => {
                    warn!(
                        target = "modverse::jobs::counter_sync",
                        key = %key,
                        column = %column,
                        error = %err,
                        "Durable read failed; delta kept for the next cycle"
                    );
                    retry.push((field.clone(), delta));
                }
            }
        }

        if !updates.is_empty() {
            match self.columns.write_counters(resource, key.id(), &updates).await {
                Ok(()) => self.refresh_baselines(key, &updates).await,
                Err(RepoError::NotFound) => {
                    warn!(
                        target = "modverse::jobs::counter_sync",
                        key = %key,
                        columns = updates.len(),
                        "Row vanished before the durable update; dropping its deltas"
                    );
                    updates.clear();
                }
                Err(err) => {
                    retry.extend(applied);
                    self.return_deltas(key, claim, &retry).await?;
                    return Err(KeySyncError::Write(err));
                }
            }
        }

        self.return_deltas(key, claim, &retry).await?;
        self.store.delete(claim).await?;

        if updates.is_empty() {
            Ok(KeyOutcome::Skipped)
        } else {
            debug!(
                target = "modverse::jobs::counter_sync",
                key = %key,
                columns = updates.len(),
                "Merged counter deltas"
            );
            Ok(KeyOutcome::Merged)
        }
    }

    /// Fold unmerged deltas back into the live key and drop them from the claim.
    async fn return_deltas(
        &self,
        key: &CounterKey,
        claim: &str,
        deltas: &[(String, i64)],
    ) -> Result<(), KeySyncError> {
        if deltas.is_empty() {
            return Ok(());
        }
        let live = key.render();
        for (field, delta) in deltas {
            self.store.increment_field(&live, field, *delta).await?;
            self.store.delete_field(claim, field).await?;
        }
        if self.store.get_all_fields(claim).await?.is_empty() {
            self.store.delete(claim).await?;
        }
        Ok(())
    }

    async fn refresh_baselines(&self, key: &CounterKey, updates: &[CounterUpdate]) {
        let baseline_key = key.baseline_key();
        for update in updates {
            if let Err(err) = self
                .store
                .set_field(
                    &baseline_key,
                    update.column.as_str(),
                    &update.value.to_string(),
                    Some(self.config.baseline_ttl),
                )
                .await
            {
                warn!(
                    target = "modverse::jobs::counter_sync",
                    key = %baseline_key,
                    error = %err,
                    "Failed to refresh counter baseline; dropping it instead"
                );
                if let Err(err) = self
                    .store
                    .delete_field(&baseline_key, update.column.as_str())
                    .await
                {
                    error!(
                        target = "modverse::jobs::counter_sync",
                        key = %baseline_key,
                        column = %update.column,
                        error = %err,
                        "Failed to drop stale counter baseline; reads may lag until it expires"
                    );
                }
            }
        }
    }
}
