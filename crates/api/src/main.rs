use anyhow::Context;
use tracing::info;

use journal_api::app::{build_app, services};
use journal_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    journal_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let wiring = services::build_services(&config).await?;
    let app = build_app(wiring.services.clone());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    info!(addr = %listener.local_addr()?, persistent = config.use_persistent_stores, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    wiring.shutdown().await;
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
