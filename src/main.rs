use std::{error::Error as StdError, process, sync::Arc};

use modverse::{
    application::{
        counts::CountAccessor,
        downloads::DownloadService,
        error::AppError,
        favorites::ModFavoriteService,
        flags::FlagCache,
        jobs::{CounterSync, SyncConfig, SyncError},
        likes::ModLikeService,
        repos::{CounterColumnsRepo, HealthRepo, ModRelationsRepo},
    },
    cache::{CounterStore, build_store},
    config,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, AppState},
        telemetry,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let message = error_chain(error);
    if dispatcher::has_been_set() {
        error!(error = %message, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %message, "application error");
    });
}

fn error_chain(error: &AppError) -> String {
    let mut message = error.to_string();
    let mut source = StdError::source(error);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Sync(_) => run_sync(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let store = init_store(&settings).await?;

    let columns: Arc<dyn CounterColumnsRepo> = repositories.clone();
    let relations: Arc<dyn ModRelationsRepo> = repositories.clone();
    let db: Arc<dyn HealthRepo> = repositories.clone();

    let counts = Arc::new(
        CountAccessor::new(store.clone(), columns.clone())
            .with_baseline_ttl(settings.cache.count_ttl),
    );
    let flags = Arc::new(
        FlagCache::new(store.clone(), relations.clone()).with_ttl(settings.cache.flag_ttl),
    );
    let request_timeout = settings.cache.request_timeout;

    let state = AppState {
        likes: Arc::new(ModLikeService::new(
            relations.clone(),
            flags.clone(),
            counts.clone(),
            request_timeout,
        )),
        favorites: Arc::new(ModFavoriteService::new(
            relations,
            flags,
            request_timeout,
        )),
        downloads: Arc::new(DownloadService::new(counts, request_timeout)),
        store: store.clone(),
        db,
    };

    let shutdown = CancellationToken::new();
    let sync_handle = if settings.counter_sync.enabled {
        let sync = Arc::new(CounterSync::new(
            store,
            columns,
            SyncConfig::from(&settings.counter_sync),
        ));
        Some(sync.start(&shutdown))
    } else {
        info!(
            target = "modverse::serve",
            "Counter sync disabled by configuration"
        );
        None
    };

    let result = serve_http(&settings, state, shutdown.clone()).await;

    shutdown.cancel();
    if let Some(handle) = sync_handle {
        let graceful = settings.server.graceful_shutdown;
        if tokio::time::timeout(graceful, handle.join()).await.is_err() {
            warn!(
                target = "modverse::serve",
                timeout_secs = graceful.as_secs(),
                "Counter sync did not stop within the shutdown timeout"
            );
        }
    }

    result
}

async fn run_sync(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let store = init_store(&settings).await?;

    let sync = CounterSync::new(
        store,
        repositories,
        SyncConfig::from(&settings.counter_sync),
    );

    match sync.sync_all().await {
        Ok(report) => {
            info!(
                target = "modverse::sync",
                scanned = report.scanned,
                merged = report.merged,
                skipped = report.skipped,
                failed = report.failed,
                recovered = report.recovered,
                "Counter sync complete"
            );
            Ok(())
        }
        Err(SyncError::LockContended { key }) => {
            info!(
                target = "modverse::sync",
                lock_key = %key,
                "Counter sync skipped: lock held by another instance"
            );
            Ok(())
        }
        Err(err) => Err(AppError::unexpected(format!("counter sync failed: {err}"))),
    }
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or(InfraError::MissingDatabaseUrl)?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(InfraError::DatabaseConnect)?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(InfraError::Migrate)?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

async fn init_store(settings: &config::Settings) -> Result<Arc<dyn CounterStore>, AppError> {
    let backend = settings.cache.backend;
    let store = build_store(&settings.cache)
        .map_err(|err| InfraError::store_unavailable(backend, err))?;
    store
        .ping()
        .await
        .map_err(|err| InfraError::store_unavailable(backend, err))?;

    info!(
        target = "modverse::serve",
        backend = ?settings.cache.backend,
        "Counter store ready"
    );
    Ok(store)
}

async fn serve_http(
    settings: &config::Settings,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|source| InfraError::Bind {
            addr: settings.server.addr,
            source,
        })?;

    info!(
        target = "modverse::serve",
        addr = %settings.server.addr,
        "HTTP server listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!(target = "modverse::serve", "Shutdown signal received");
                }
                _ = shutdown.cancelled() => {}
            }
        })
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}
