//! signcap_relay - local classification relay
//!
//! Serves `POST /api/classify` and forwards each uploaded `file` to the
//! configured prediction service, answering with the normalized label.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use signcap::{RelayServer, SigncapConfig, UpstreamGateway};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Relay hand captures to a sign-language prediction service"
)]
struct Args {
    /// JSON or TOML config file.
    #[arg(long, env = "SIGNCAP_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Listen address (overrides relay.addr).
    #[arg(long, value_name = "HOST:PORT")]
    addr: Option<String>,

    /// Prediction endpoint (overrides upstream.url).
    #[arg(long, value_name = "URL")]
    upstream_url: Option<String>,

    /// Form field carrying the image upstream, `imagen` or `file`.
    #[arg(long, value_name = "NAME")]
    image_field: Option<String>,

    /// Upstream request timeout in seconds.
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = SigncapConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        cfg.relay.addr = addr;
    }
    if let Some(url) = args.upstream_url {
        cfg.upstream.url = url;
    }
    if let Some(field) = args.image_field {
        cfg.upstream.image_field = field;
    }
    if let Some(secs) = args.timeout_secs {
        cfg.upstream.timeout_secs = secs.max(1);
    }
    cfg.validate()?;

    log::info!(
        "forwarding to {} (field '{}', timeout {}s)",
        cfg.upstream.url,
        cfg.upstream.image_field,
        cfg.upstream.timeout_secs
    );
    let gateway = Arc::new(UpstreamGateway::new(cfg.upstream.clone()));
    let handle = RelayServer::new(cfg.relay.clone(), gateway).spawn()?;
    log::info!("signcap_relay serving http://{}/api/classify", handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("signcap_relay waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping relay...");
    handle.stop()?;
    Ok(())
}
