use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal, sync::watch};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use home_climate_service::{
    api::{self, AppState},
    assets::AssetCache,
    config::Config,
    db,
    documents::DocumentStore,
    home::ConfigStore,
    notify::{Dispatcher, Inbox, RoutingNotifier, WebhookNotifier},
    poll::PollLoop,
    telemetry::TelemetryStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Env vars may also be set externally, so a missing .env is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let pool = db::create_pool(&config.database_url).await?;
    let telemetry = TelemetryStore::new(pool, config.store_timeout);
    info!("Telemetry archive ready");

    let home = Arc::new(ConfigStore::required(&config.home_config_path));
    // Surface a broken configuration at startup rather than on the first request.
    match home.load().await {
        Ok(doc) => info!(home = %doc.home_name, sensors = doc.sensors.len(), "Home configuration loaded"),
        Err(e) => tracing::warn!(error = %e, "Home configuration unavailable; requests will fail until it is fixed"),
    }

    let inbox = Inbox::new();
    let webhook = WebhookNotifier::new(config.delivery_timeout).context("failed to build HTTP client")?;
    let dispatcher = Arc::new(Dispatcher::new(
        DocumentStore::with_default(&config.subscriptions_path),
        Arc::new(RoutingNotifier::new(webhook, inbox.clone())),
        config.delivery_timeout,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (poll, poll_handle) = PollLoop::new(
        home.clone(),
        telemetry.clone(),
        dispatcher.clone(),
        config.poll_interval,
    );
    let poll_task = tokio::spawn(poll.run(shutdown_rx));

    let state = AppState {
        config: home,
        telemetry,
        dispatcher,
        inbox,
        poll: poll_handle,
        assets: AssetCache::new(&config.static_dir),
    };

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    poll_task.await.context("poll loop panicked")?;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
