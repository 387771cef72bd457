//! Service Manager server binary

use sm_adapters::AppConfig;
use sm_server::{api_router, initialize_server};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::load().map_err(|err| {
        error!(error = %err, "failed to load configuration");
        err
    })?;

    let components = initialize_server(&config);

    let maintainer = components.maintainer.clone();
    let maintainer_shutdown = components.state.shutdown.clone();
    tokio::spawn(async move {
        maintainer.run(maintainer_shutdown).await;
    });

    let app = api_router(components.state);
    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(%address, "service manager listening");

    let shutdown_tx = components.shutdown_tx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}
