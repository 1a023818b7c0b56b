mod server;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use tracing::info;

use rtspgate_core::{logging, Config};

use server::GatewayServer;

#[derive(Parser, Debug)]
#[command(name = "rtspgate")]
#[command(about = "RTMP to RTSP conversion gateway", long_about = None)]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(long, short, env = "RTSPGATE_CONFIG")]
    config: Option<String>,

    /// Control API listen address
    #[arg(long, env = "RTSPGATE_HTTP_ADDR")]
    http_addr: Option<SocketAddr>,

    /// RTMP ingest listen address
    #[arg(long, env = "RTSPGATE_RTMP_ADDR")]
    rtmp_addr: Option<SocketAddr>,

    /// RTSP egress listen address
    #[arg(long, env = "RTSPGATE_RTSP_ADDR")]
    rtsp_addr: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RTSPGATE_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Args {
    /// Flags win over the file and `RTSPGATE_*` section variables.
    fn apply(&self, config: &mut Config) {
        if let Some(addr) = self.http_addr {
            config.server.host = addr.ip().to_string();
            config.server.http_port = addr.port();
        }
        if let Some(addr) = self.rtmp_addr {
            config.ingest.host = addr.ip().to_string();
            config.ingest.port = addr.port();
        }
        if let Some(addr) = self.rtsp_addr {
            config.egress.host = addr.ip().to_string();
            config.egress.port = addr.port();
        }
        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    args.apply(&mut config);
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration (fail fast on misconfigurations)
    let config = load_config(&args)?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("rtspgate starting...");
    info!("HTTP address: {}", config.http_address());
    info!("RTMP address: {}", config.ingest_address());
    info!("RTSP address: {}", config.egress_address());

    // 3. Start the gateway and the control API, then wait for a signal
    let server = GatewayServer::start(config).await?;
    server.run_until_shutdown().await
}
