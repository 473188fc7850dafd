// CLI subcommand dispatch.

use std::path::Path;

use anyhow::Context;
use chatfeed_client::config::{parse_server_url, ClientConfig};
use clap::Subcommand;

pub mod clear;
pub mod watch;

#[derive(Subcommand)]
pub enum Command {
    /// Follow the relay and print messages as they arrive
    Watch(watch::WatchArgs),
    /// Clear every message on the relay
    Clear(clear::ClearArgs),
}

pub fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Watch(args) => watch::run(args),
        Command::Clear(args) => clear::run(args),
    }
}

/// Config from `--config` (or the default location), with `--server` taking
/// precedence over the file.
pub(crate) fn load_config(config: Option<&Path>, server: Option<&str>) -> anyhow::Result<ClientConfig> {
    let mut loaded = ClientConfig::load(config).context("failed to load client config")?;
    if let Some(server) = server {
        parse_server_url(server).context("invalid --server")?;
        loaded.server_url = server.to_string();
    }
    Ok(loaded)
}

pub(crate) fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to build tokio runtime")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn server_flag_overrides_config_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "server_url = \"http://relay.local:5000\"\n").unwrap();

        let from_file = load_config(Some(&path), None).unwrap();
        assert_eq!(from_file.server_url, "http://relay.local:5000");

        let overridden = load_config(Some(&path), Some("https://chat.example.com")).unwrap();
        assert_eq!(overridden.server_url, "https://chat.example.com");
    }

    #[test]
    fn invalid_server_flag_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "").unwrap();
        assert!(load_config(Some(&path), Some("ws://nope")).is_err());
    }
}
