use anyhow::{Context, Result};
use cloud_sync_service::api::start_api_server;
use cloud_sync_service::{AppState, CloudSyncService, Config, S3ObjectStore};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level, &config.service.log_format);

    info!(
        service = %config.service.name,
        bucket = %config.s3.bucket,
        max_bandwidth_mbps = config.sync.max_bandwidth_mbps,
        "Starting cloud sync service"
    );

    // Initialize metrics
    if config.service.metrics_port != 0 {
        init_metrics(config.service.metrics_port)?;
    }

    let store = Arc::new(
        S3ObjectStore::new(&config.s3)
            .await
            .context("Failed to initialize S3 client")?,
    );

    // Unreachable storage is retried per task, so only warn here
    if let Err(e) = store.check_bucket().await {
        warn!(bucket = %store.bucket(), error = %e, "Bucket check failed");
    }

    let service = Arc::new(CloudSyncService::new(&config, store));
    service.start();

    // Spawn API server task
    let (api_shutdown_tx, mut api_shutdown_rx) = watch::channel(false);
    let api_handle = if config.api.enabled {
        let api_state = AppState {
            service: service.clone(),
        };
        let api_config = config.api.clone();
        Some(tokio::spawn(async move {
            let shutdown = async move {
                let _ = api_shutdown_rx.changed().await;
            };
            if let Err(e) = start_api_server(api_state, &api_config, shutdown).await {
                error!(error = %e, "API server error");
            }
        }))
    } else {
        None
    };

    info!("Cloud sync service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down cloud sync service");

    let _ = api_shutdown_tx.send(true);
    service.shutdown().await;
    if let Some(handle) = api_handle {
        let _ = handle.await;
    }

    info!("Cloud sync service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, log_format: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format == "pretty" {
        registry.with(fmt::layer().pretty()).init();
    } else {
        registry.with(fmt::layer().json()).init();
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
