use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub ice_servers: Vec<String>,
    pub max_sessions: Option<usize>,
    pub shutdown_grace: Duration,
}

#[derive(Debug, Parser)]
#[command(
    name = "signal-relay",
    author,
    version,
    about = "Signaling relay for WebRTC peer sessions"
)]
pub struct Cli {
    /// Address to bind the signaling listener to.
    #[arg(long, env = "SIGNAL_RELAY_LISTEN_ADDR", default_value = "0.0.0.0:50051")]
    pub listen_addr: String,

    /// STUN/TURN urls handed to every peer connection.
    #[arg(
        long = "ice-server",
        env = "SIGNAL_RELAY_ICE_SERVERS",
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302"
    )]
    pub ice_servers: Vec<String>,

    /// Maximum number of live sessions (0 = unlimited).
    #[arg(long, env = "SIGNAL_RELAY_MAX_SESSIONS", default_value_t = 0)]
    pub max_sessions: usize,

    /// Seconds to wait after the shutdown signal before tearing sessions down.
    #[arg(long, env = "SIGNAL_RELAY_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
    pub shutdown_grace_secs: u64,
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;

        let ice_servers: Vec<String> = cli
            .ice_servers
            .into_iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        for url in &ice_servers {
            if !(url.starts_with("stun:") || url.starts_with("turn:") || url.starts_with("turns:")) {
                bail!("invalid ice server url: {url}");
            }
        }

        Ok(ServerConfig {
            listen_addr,
            ice_servers,
            max_sessions: (cli.max_sessions > 0).then_some(cli.max_sessions),
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
        })
    }
}
