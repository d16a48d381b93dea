use std::sync::Arc;

use clap::Parser;
use journal::{
    config::{redact_url, CliArgs, Settings},
    routes::build_router,
    service::EntryService,
    storage, telemetry,
};

fn main() -> anyhow::Result<()> {
    let cli = CliArgs::parse();
    let settings = Settings::load(&cli)?;
    // the reporting client has to exist before the runtime starts its threads
    let _report_guard = telemetry::init_error_reporting(&settings)?;
    telemetry::init_logging(&settings);

    if let Some(ref dsn) = settings.sentry_dsn {
        tracing::info!(
            dsn = %redact_url(dsn),
            report_target = telemetry::ERROR_REPORT_TARGET,
            "Error reporting enabled"
        );
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(serve(settings))
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    tracing::info!(url = %redact_url(&settings.database_url()), "DB URL in use (async)");
    tracing::info!(url = %redact_url(&settings.sync_database_url()), "DB URL in use (sync)");
    tracing::info!(level = settings.log_level.as_str(), "Log level");

    let metrics = if settings.prometheus_enabled {
        match telemetry::install_metrics_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!("Prometheus metrics disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    // the blocking drivers connect on their own threads
    let url = settings.sync_database_url();
    let backend = tokio::task::spawn_blocking(move || storage::open(&url)).await??;
    tracing::info!(backend = backend.name(), "Storage ready");
    let store = backend.into_store();

    let service = Arc::new(EntryService::new(store.clone()));
    let app = build_router(service, metrics);

    let addr = settings.listen_addr();
    tracing::info!("API listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // the postgres client owns a runtime, which must not be dropped on an async worker
    tokio::task::spawn_blocking(move || drop(store)).await?;
    tracing::info!("API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
