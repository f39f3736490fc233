use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use backmeup_api::app::{create_app, AppState};
use backmeup_api::config::Config;
use backmeup_api::jobs::{register_configured_jobs, JobScheduler, SchedulerSettings};
use backmeup_api::middleware::{self, logging::init_logging};
use backmeup_api::services::NotificationListener;
use domain::services::{MetricsAggregator, StatusRegistry};
use persistence::LocalStorage;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Arc::new(Config::load()?);

    init_logging(&config.logging)?;
    info!("Starting BackMeUp v{}", env!("CARGO_PKG_VERSION"));

    middleware::init_metrics()?;

    let storage = LocalStorage::new(config.storage_root());
    info!(root = %storage.root().display(), "Using local backup storage");

    let scheduler = Arc::new(JobScheduler::new(
        storage.clone(),
        SchedulerSettings::from(&config.scheduler),
    ));
    let status = Arc::new(StatusRegistry::new());
    let metrics = Arc::new(MetricsAggregator::new());
    scheduler.subscribe(status.clone());
    scheduler.subscribe(metrics.clone());

    let notifier = NotificationListener::new(&config.jobs)?;
    if !notifier.is_empty() {
        scheduler.subscribe(Arc::new(notifier));
    }

    if register_configured_jobs(&scheduler, &config.jobs, &storage) == 0 {
        warn!("No backup jobs could be registered; only the HTTP surface will run");
    }

    scheduler.start()?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    if config.server.enabled {
        let app = create_app(AppState {
            config: config.clone(),
            scheduler: scheduler.clone(),
            status,
            metrics,
        });

        let addr = config.bind_address();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("Server listening on {}", addr);

        let graceful = shutdown.clone();
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { graceful.cancelled().await })
            .await
        {
            error!(error = %e, "HTTP server failed");
        }
    } else {
        shutdown.cancelled().await;
    }

    scheduler.stop(config.scheduler.shutdown_grace()).await;
    info!("BackMeUp stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
