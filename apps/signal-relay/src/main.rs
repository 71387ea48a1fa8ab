use anyhow::Result;
use clap::Parser;
use signal_relay::config::{Cli, ServerConfig};
use signal_relay::telemetry::Telemetry;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = Telemetry::init()?;
    let config = ServerConfig::try_from(Cli::parse())?;

    info!(
        listen_addr = %config.listen_addr,
        ice_servers = ?config.ice_servers,
        max_sessions = ?config.max_sessions,
        "starting signal relay"
    );

    signal_relay::run(config, Some(telemetry.metrics_handle())).await
}
