//! Process entry point: load configuration, build the router, serve.

use anyhow::Result;
use tracing::info;
use wormhole_relay::{build_router, AppState, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    tracing_subscriber::fmt().with_env_filter(config.log.clone()).init();

    let addr = config.bind_addr()?;
    let base_domain = config.base_domain.clone();
    let app = build_router(AppState::new(config));

    info!(%addr, %base_domain, "wormhole relay listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
