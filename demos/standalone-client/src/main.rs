#![allow(missing_docs)]
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clientcred_core::ClientConfig;
use tracing::{info, warn};

use standalone_client::run;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().pretty().init();

    let AppArgs { config, host, port } = AppArgs::parse().context("parsing arguments")?;
    let config = ClientConfig::from_file(&config)
        .with_context(|| format!("loading configuration from {}", config.display()))?;
    let addr = SocketAddr::from((host, port));
    run(addr, config).await?;

    info!("Bye!");
    Ok(())
}

#[derive(Debug)]
struct AppArgs {
    config: PathBuf,
    host: IpAddr,
    port: u16,
}

impl AppArgs {
    fn parse() -> Result<Self> {
        let mut pargs = pico_args::Arguments::from_env();

        let config = pargs
            .opt_value_from_str(["-c", "--config"])
            .context("parsing config argument")?;

        let host = pargs
            .opt_value_from_str(["-h", "--host"])
            .context("parsing host argument")?;

        let port = pargs
            .opt_value_from_str(["-p", "--port"])
            .context("parsing port argument")?;

        let result = Self {
            config: config.unwrap_or_else(|| PathBuf::from("standalone-client.yml")),
            host: host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            port: port.unwrap_or(8084),
        };

        let remaining = pargs.finish();
        if !remaining.is_empty() {
            warn!(?remaining, "Warning: unused arguments left");
        }
        Ok(result)
    }
}
