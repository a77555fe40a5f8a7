//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{collections::BTreeMap, net::SocketAddr, num::NonZeroU32, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::jobs::{
    DEFAULT_BATCH_SIZE, DEFAULT_KEY_PATTERN, DEFAULT_LOCK_KEY, DEFAULT_LOCK_TTL,
    DEFAULT_SYNC_INTERVAL, default_field_mappings,
};
use crate::cache::COUNTER_NAMESPACE;
use crate::domain::types::CounterColumn;

pub use cli::{CacheOverrides, CliArgs, Command, ServeArgs, ServeOverrides, SyncArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "modverse";
const ENV_PREFIX: &str = "MODVERSE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_REDIS_POOL_SIZE: u32 = 16;
const DEFAULT_REDIS_POOL_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_FLAG_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_COUNT_TTL_SECS: u64 = 24 * 60 * 60;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub counter_sync: CounterSyncSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    Redis,
    Memory,
}

impl FromStr for CacheBackendKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown backend `{other}` (expected redis|memory)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackendKind,
    pub redis_url: String,
    pub pool_size: NonZeroU32,
    pub pool_timeout: Duration,
    /// Upper bound for one request-path cache/database operation.
    pub request_timeout: Duration,
    pub flag_ttl: Duration,
    pub count_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct CounterSyncSettings {
    pub enabled: bool,
    pub key_pattern: String,
    pub field_mappings: BTreeMap<String, CounterColumn>,
    pub interval: Duration,
    pub batch_size: usize,
    pub enable_lock: bool,
    pub lock_key: String,
    pub lock_ttl: Duration,
    pub baseline_ttl: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Sync(args)) => raw.apply_sync_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    let settings = Settings::from_raw(raw)?;
    if matches!(cli.command, Some(Command::Sync(_))) {
        settings.ensure_shared_store()?;
    }
    Ok(settings)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    counter_sync: RawCounterSyncSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(enabled) = overrides.counter_sync_enabled {
            self.counter_sync.enabled = Some(enabled);
        }
        if let Some(seconds) = overrides.counter_sync_interval_seconds {
            self.counter_sync.interval_seconds = Some(seconds);
        }

        self.apply_cache_overrides(&overrides.cache);
    }

    fn apply_sync_overrides(&mut self, args: &SyncArgs) {
        if let Some(url) = args.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(enable) = args.enable_lock {
            self.counter_sync.enable_lock = Some(enable);
        }
        self.apply_cache_overrides(&args.cache);
    }

    fn apply_cache_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
    }
}

impl Settings {
    /// A one-shot `sync` run only sees deltas written by other processes, so
    /// it needs the shared backend.
    pub fn ensure_shared_store(&self) -> Result<(), LoadError> {
        match self.cache.backend {
            CacheBackendKind::Redis => Ok(()),
            CacheBackendKind::Memory => Err(LoadError::invalid(
                "cache.backend",
                "`sync` needs the shared redis backend; an in-process store starts empty",
            )),
        }
    }

    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            cache,
            counter_sync,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let cache = build_cache_settings(cache)?;
        let counter_sync = build_counter_sync_settings(counter_sync, cache.count_ttl)?;

        Ok(Self {
            server,
            logging,
            database,
            cache,
            counter_sync,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend {
        Some(value) => CacheBackendKind::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.backend", reason))?,
        None => CacheBackendKind::Redis,
    };

    let redis_url = cache
        .redis_url
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());
    if backend == CacheBackendKind::Redis && redis_url.is_empty() {
        return Err(LoadError::invalid(
            "cache.redis_url",
            "must be set when the redis backend is selected",
        ));
    }

    let pool_size = non_zero_u32(
        cache.pool_size.unwrap_or(DEFAULT_REDIS_POOL_SIZE).into(),
        "cache.pool_size",
    )?;

    let pool_timeout = positive_duration(
        cache.pool_timeout_ms.unwrap_or(DEFAULT_REDIS_POOL_TIMEOUT_MS),
        Duration::from_millis,
        "cache.pool_timeout_ms",
    )?;
    let request_timeout = positive_duration(
        cache
            .request_timeout_seconds
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        Duration::from_secs,
        "cache.request_timeout_seconds",
    )?;
    let flag_ttl = positive_duration(
        cache.flag_ttl_seconds.unwrap_or(DEFAULT_FLAG_TTL_SECS),
        Duration::from_secs,
        "cache.flag_ttl_seconds",
    )?;
    let count_ttl = positive_duration(
        cache.count_ttl_seconds.unwrap_or(DEFAULT_COUNT_TTL_SECS),
        Duration::from_secs,
        "cache.count_ttl_seconds",
    )?;

    Ok(CacheSettings {
        backend,
        redis_url,
        pool_size,
        pool_timeout,
        request_timeout,
        flag_ttl,
        count_ttl,
    })
}

fn build_counter_sync_settings(
    sync: RawCounterSyncSettings,
    baseline_ttl: Duration,
) -> Result<CounterSyncSettings, LoadError> {
    let key_pattern = sync
        .key_pattern
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_KEY_PATTERN.to_string());
    validate_key_pattern(&key_pattern)?;

    let field_mappings = match sync.field_mappings {
        Some(raw) => parse_field_mappings(raw)?,
        None => default_field_mappings(),
    };

    // Zero means "use the default" for these two, matching unset.
    let interval = match sync.interval_seconds {
        Some(0) | None => DEFAULT_SYNC_INTERVAL,
        Some(seconds) => Duration::from_secs(seconds),
    };
    let batch_size = match sync.batch_size {
        Some(0) | None => DEFAULT_BATCH_SIZE,
        Some(size) => usize::try_from(size).map_err(|_| {
            LoadError::invalid(
                "counter_sync.batch_size",
                "value exceeds supported range for usize",
            )
        })?,
    };

    let lock_key = sync
        .lock_key
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_LOCK_KEY.to_string());
    let lock_ttl = match sync.lock_ttl_seconds {
        Some(0) => {
            return Err(LoadError::invalid(
                "counter_sync.lock_ttl_seconds",
                "must be greater than zero",
            ));
        }
        Some(seconds) => Duration::from_secs(seconds),
        None => DEFAULT_LOCK_TTL,
    };

    Ok(CounterSyncSettings {
        enabled: sync.enabled.unwrap_or(true),
        key_pattern,
        field_mappings,
        interval,
        batch_size,
        enable_lock: sync.enable_lock.unwrap_or(false),
        lock_key,
        lock_ttl,
        baseline_ttl,
    })
}

/// The pattern must pin the delta namespace literally; anything looser can
/// match baseline (`counts:`) or claim (`sync:`) hashes.
fn validate_key_pattern(pattern: &str) -> Result<(), LoadError> {
    let prefix = format!("{COUNTER_NAMESPACE}:");
    if pattern.starts_with(&prefix) {
        Ok(())
    } else {
        Err(LoadError::invalid(
            "counter_sync.key_pattern",
            format!("`{pattern}` must start with `{prefix}`"),
        ))
    }
}

fn parse_field_mappings(
    raw: BTreeMap<String, String>,
) -> Result<BTreeMap<String, CounterColumn>, LoadError> {
    raw.into_iter()
        .map(|(field, column)| {
            let field = field.trim().to_string();
            if field.is_empty() {
                return Err(LoadError::invalid(
                    "counter_sync.field_mappings",
                    "cache field names must not be empty",
                ));
            }
            let column = CounterColumn::from_str(column.trim()).map_err(|err| {
                LoadError::invalid(
                    "counter_sync.field_mappings",
                    format!("field `{field}`: {err}"),
                )
            })?;
            Ok((field, column))
        })
        .collect()
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    redis_url: Option<String>,
    pool_size: Option<u32>,
    pool_timeout_ms: Option<u64>,
    request_timeout_seconds: Option<u64>,
    flag_ttl_seconds: Option<u64>,
    count_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCounterSyncSettings {
    enabled: Option<bool>,
    key_pattern: Option<String>,
    field_mappings: Option<BTreeMap<String, String>>,
    interval_seconds: Option<u64>,
    batch_size: Option<u64>,
    enable_lock: Option<bool>,
    lock_key: Option<String>,
    lock_ttl_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn positive_duration(
    value: u64,
    unit: fn(u64) -> Duration,
    key: &'static str,
) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(unit(value))
}
