use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use certvisor::{Configuration, Controller, SubscriberChain, WatcherChain, logging};

#[derive(Parser, Debug)]
#[command(name = "certvisor", version, about = "Distributes renewed certificates to containers")]
struct Cli {
    /// Configuration file (default: searched in the standard locations)
    #[arg(short, long, env = "CERTVISOR_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Force debug logging
    #[arg(short, long)]
    debug: bool,

    /// Validate the configuration and exit
    #[arg(short, long)]
    test: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, path) =
        Configuration::discover(cli.config.as_deref()).context("failed loading configuration")?;
    logging::init(&config.log, cli.debug).context("failed initializing logging")?;

    match &path {
        Some(path) => info!(path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found, using defaults"),
    }

    let watchers = WatcherChain::from_config(&config.watchers);
    let subscribers = SubscriberChain::from_config(&config.subscribers, &config.runtime);
    if watchers.is_empty() {
        warn!("no certificate watchers enabled");
    }
    if subscribers.is_empty() {
        warn!("no subscribers enabled");
    }

    if cli.test {
        info!(
            watchers = watchers.len(),
            subscribers = subscribers.len(),
            "configuration is valid"
        );
        return Ok(());
    }

    let controller = Controller::new(config.runtime, watchers, subscribers);
    match controller.run_until_signal().await {
        Ok(()) => {
            info!("shutdown complete");
            Ok(())
        }
        Err(err) => {
            error!(label = err.as_label(), error = %err, "forced shutdown");
            std::process::exit(1);
        }
    }
}
