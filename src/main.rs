use anyhow::Result;
use tokio::{net::TcpListener, signal};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sensor_relay::{
    api::{self, AppState},
    broadcast::BroadcastHub,
    config::Config,
    ingest::{bus, IngestService},
    mqtt::MqttBridge,
    series_store::SeriesStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (ignore error if file absent; env vars may be set externally)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    info!(
        retention = ?config.store_policy.retention,
        coalesce = ?config.store_policy.coalesce,
        broadcast_secondary = config.broadcast_secondary,
        "Configuration loaded"
    );

    // One store and one hub for the whole process, shared by every producer
    let store = SeriesStore::new(config.store_policy);
    let hub = BroadcastHub::new(config.ws_buffer);
    let service = IngestService::new(store, hub, config.broadcast_secondary);

    // Bus ingestion: bridge → bounded queue → worker
    match &config.mqtt {
        Some(mqtt) => {
            let (sender, worker) = bus::delivery_queue(config.delivery_queue, service.clone());
            tokio::spawn(worker.run());

            let bridge = MqttBridge::new(mqtt);
            tokio::spawn(async move {
                if let Err(e) = bridge.run(sender).await {
                    error!(error = %e, "MQTT bridge stopped");
                }
            });
        }
        None => info!("MQTT_HOST not set; bus ingestion disabled"),
    }

    let state = AppState {
        service,
        index_html_path: config.index_html_path.clone(),
    };

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
