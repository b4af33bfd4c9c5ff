use anyhow::Context;
use sketchface::config::{self, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sketchface::init_tracing();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = ServerConfig::from_env().context("Invalid configuration")?;
    sketchface::server::start_server(config).await?;

    Ok(())
}
