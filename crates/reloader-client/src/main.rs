//! Reloader client: entry point.
//!
//! Connects to a running monitor and prints every markup document it
//! receives to standard output.  Useful on its own to check that saves on the
//! development machine reach a device, and as a reference for embedding the
//! client library in an application.
//!
//! # Usage
//!
//! ```text
//! reloader-client [OPTIONS]
//!
//! Options:
//!       --host <HOST>            Monitor host [default: 127.0.0.1]
//!       --port <PORT>            Monitor port [default: 5500]
//!       --url <URL>              Monitor address as tcp://host:port or http://host[:port]
//!       --no-auto-reconnect      Make one connection attempt and read until it drops
//!       --constrained            Reopen the connection every 60 polls
//!       --poll-interval-ms <MS>  Time between polls [default: 500]
//!       --log-level <LVL>        Log level when RUST_LOG is unset [default: info]
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use reloader_client::application::receive_updates::{
    ReceiveUpdatesUseCase, UpdateError, UpdateHandler,
};
use reloader_client::infrastructure::network::{
    ClientConfig, ConnectOutcome, Endpoint, EndpointError, ResilientClient, DEFAULT_PORT,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Reloader client.
#[derive(Debug, Parser)]
#[command(
    name = "reloader-client",
    about = "Receives markup pushed by a Reloader monitor and prints it",
    version
)]
struct Cli {
    /// Monitor host name or IP address.
    #[arg(long, default_value = "127.0.0.1", env = "RELOADER_HOST")]
    host: String,

    /// Monitor TCP port.
    #[arg(long, default_value_t = DEFAULT_PORT, env = "RELOADER_PORT")]
    port: u16,

    /// Monitor address as a URL.  Takes precedence over --host and --port.
    #[arg(long, env = "RELOADER_URL")]
    url: Option<String>,

    /// Make a single connection attempt and stop when it closes.
    #[arg(long)]
    no_auto_reconnect: bool,

    /// Periodically reopen the connection even when it looks healthy.
    #[arg(long)]
    constrained: bool,

    /// Milliseconds between polls of the connection.
    #[arg(long, default_value_t = 500)]
    poll_interval_ms: u64,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, default_value = "info", env = "RELOADER_LOG_LEVEL")]
    log_level: String,
}

impl Cli {
    fn endpoint(&self) -> Result<Endpoint, EndpointError> {
        match &self.url {
            Some(url) => Endpoint::from_url(url),
            None => Endpoint::new(self.host.as_str(), self.port),
        }
    }

    fn client_config(&self) -> Result<ClientConfig, EndpointError> {
        let mut config = ClientConfig::new(self.endpoint()?);
        config.auto_reconnect = !self.no_auto_reconnect;
        config.poll_interval = Duration::from_millis(self.poll_interval_ms.max(1));
        if self.constrained {
            config = config.constrained();
        }
        Ok(config)
    }
}

// ── Console handler ───────────────────────────────────────────────────────────

/// Prints each received document, separated by a blank line.
struct ConsoleHandler;

#[async_trait]
impl UpdateHandler for ConsoleHandler {
    async fn apply(&self, markup: String) -> Result<(), UpdateError> {
        info!(bytes = markup.len(), "update received");
        println!("{markup}\n");
        Ok(())
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = cli.client_config().context("invalid monitor address")?;
    info!(endpoint = %config.endpoint, "Reloader client starting");
    let client = ResilientClient::new(config);

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for Ctrl-C: {e}");
                return;
            }
            info!("shutdown signal received");
            client.dispose();
        });
    }

    let use_case = ReceiveUpdatesUseCase::new(ConsoleHandler);

    if client.config().auto_reconnect {
        let updates = Arc::clone(&client).start_polling()?;
        let summary = use_case.run(updates).await;
        info!(applied = summary.applied, "Reloader client stopped");
        return Ok(());
    }

    // Without auto-reconnect: one attempt, then read until the connection ends.
    if client.start().await != ConnectOutcome::Connected {
        anyhow::bail!("could not connect to {}", client.config().endpoint);
    }
    while let Some(markup) = client.read_message().await {
        if let Err(e) = ConsoleHandler.apply(markup).await {
            warn!("{e}");
        }
    }
    client.dispose();
    info!("connection closed; Reloader client stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["reloader-client"]);
        let config = cli.client_config().unwrap();

        assert_eq!(config.endpoint, Endpoint::new("127.0.0.1", 5500).unwrap());
        assert!(config.auto_reconnect);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.resync_every, None);
    }

    #[test]
    fn test_url_takes_precedence_over_host_and_port() {
        let cli = Cli::parse_from([
            "reloader-client",
            "--host",
            "10.0.0.9",
            "--url",
            "tcp://192.168.1.20:6000",
        ]);

        let endpoint = cli.endpoint().unwrap();

        assert_eq!(endpoint.host(), "192.168.1.20");
        assert_eq!(endpoint.port(), 6000);
    }

    #[test]
    fn test_flags_shape_client_config() {
        let cli = Cli::parse_from([
            "reloader-client",
            "--no-auto-reconnect",
            "--constrained",
            "--poll-interval-ms",
            "250",
        ]);

        let config = cli.client_config().unwrap();

        assert!(!config.auto_reconnect);
        assert_eq!(config.resync_every, Some(60));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_url_is_reported() {
        let cli = Cli::parse_from(["reloader-client", "--url", "ftp://host:21"]);
        assert!(matches!(cli.endpoint(), Err(EndpointError::UnsupportedScheme(_))));
    }
}
