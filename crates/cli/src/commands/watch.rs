// `chatfeed watch`: follow the relay stream until interrupted.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use chatfeed_client::config::ClientConfig;
use chatfeed_client::runtime::spawn_feed;
use clap::Args;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tracing::info;

use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Relay base URL (overrides the config file).
    #[arg(long)]
    server: Option<String>,
    /// Path to a config file (default: ~/.chatfeed/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

pub fn run(args: WatchArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let result = super::load_config(args.config.as_deref(), args.server.as_deref())
        .and_then(|config| super::runtime()?.block_on(watch(config, format)));

    if let Err(error) = &result {
        output::print_error(format, "WATCH_FAILED", &format!("{error:#}"));
    }
    result
}

async fn watch(config: ClientConfig, format: OutputFormat) -> anyhow::Result<()> {
    let (tx, mut updates) = mpsc::unbounded_channel();
    let handle = spawn_feed(&config, tx)?;
    let mut rng = StdRng::from_entropy();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else { break };
                let mut stdout = io::stdout().lock();
                output::write_update(&mut stdout, format, &update, &mut rng)
                    .and_then(|()| stdout.flush())
                    .context("failed to write to stdout")?;
            }
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
        }
    }

    handle.wait().await
}
