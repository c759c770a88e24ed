mod bootstrap;
mod clarifai;
mod graph;
mod health;
mod webhook;

use anyhow::Result;
use potholer_core::config::{AppConfig, LoadOptions};
use potholer_core::PendingReportStore;

fn init_logging(config: &AppConfig) {
    use potholer_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging comes up first so bootstrap failures are reported through it
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "potholer-server listening for webhook events"
    );
    axum::serve(listener, app.router()).with_graceful_shutdown(wait_for_shutdown()).await?;
    app.drain_batches().await;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        pending_reports = app.store.pending_count().await,
        "potholer-server stopping"
    );

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "failed to listen for shutdown signal; serving until killed"
        );
        std::future::pending::<()>().await;
    }
}
