// `chatfeed clear`: drop every message on the relay.

use std::path::PathBuf;

use anyhow::Context;
use chatfeed_client::config::endpoint_url;
use chatfeed_common::protocol::stream::{ClearResponse, CLEAR_PATH};
use clap::Args;
use url::Url;

use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct ClearArgs {
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

pub fn run(args: ClearArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let result = super::load_config(args.config.as_deref(), args.server.as_deref()).and_then(|config| {
        let server = config.server_url()?;
        super::runtime()?.block_on(clear_messages(&server))
    });

    match result {
        Ok(response) => {
            output::write_output(&mut std::io::stdout().lock(), format, &response, format_human)?;
            Ok(())
        }
        Err(error) => {
            output::print_error(format, "CLEAR_FAILED", &format!("{error:#}"));
            Err(error)
        }
    }
}

pub async fn clear_messages(server: &Url) -> anyhow::Result<ClearResponse> {
    let url = endpoint_url(server, CLEAR_PATH).context("invalid clear URL")?;
    let response = reqwest::Client::new()
        .post(url.clone())
        .send()
        .await
        .with_context(|| format!("failed to reach relay at {url}"))?
        .error_for_status()
        .context("relay rejected clear request")?;
    let body: ClearResponse = response.json().await.context("malformed clear response")?;
    if !body.success {
        anyhow::bail!("relay reported the clear as unsuccessful");
    }
    Ok(body)
}

fn format_human(_: &ClearResponse) -> String {
    "Messages cleared.".to_string()
}
