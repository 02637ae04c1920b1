use anyhow::{Context, Result};
use env_logger::Env;
use log::{info, warn};
use tokio::net::TcpListener;

use locshare::config::ServerConfig;
use locshare::server;
use locshare::service::RelayService;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = ServerConfig::load()?;
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let service = RelayService::new(config);
    let maintenance = service.spawn_maintenance();

    server::serve(listener, service, shutdown_signal())
        .await
        .context("relay server stopped unexpectedly")?;

    maintenance.abort();
    info!("relay shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
