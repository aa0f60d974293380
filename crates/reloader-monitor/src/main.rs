//! Reloader monitor: entry point.
//!
//! Watches a folder for markup changes and pushes each changed file to every
//! connected client until Ctrl-C is pressed.
//!
//! # Usage
//!
//! ```text
//! reloader-monitor [OPTIONS]
//!
//! Options:
//!   -p, --path <DIR>        Directory to watch [default: current directory]
//!       --host <HOST>       Address to listen on [default: private IPv4]
//!       --port <PORT>       TCP port [default: 5500]
//!   -c, --config <FILE>     Config file [default: reloader.toml]
//!       --log-level <LVL>   Log level when RUST_LOG is unset [default: info]
//! ```
//!
//! Values are resolved in this order: command line, environment variable,
//! config file, built-in default.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()          -- reloader.toml, defaults when absent
//!  └─ Monitor::start()
//!       ├─ BroadcastServer   (accept loop + keep-alive)
//!       └─ FileWatcher       (notify thread + debounce task)
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use reloader_monitor::infrastructure::network::broadcast_server::ServerNotification;
use reloader_monitor::infrastructure::storage::config::{
    load_config, MonitorFileConfig, DEFAULT_CONFIG_FILE,
};
use reloader_monitor::{Monitor, MonitorConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Reloader monitor.
///
/// Watches a directory and broadcasts changed markup files to running apps.
#[derive(Debug, Parser)]
#[command(
    name = "reloader-monitor",
    about = "Watches a folder and pushes changed markup files to connected apps",
    version
)]
struct Cli {
    /// Directory to watch recursively.
    #[arg(short, long, env = "RELOADER_PATH")]
    path: Option<PathBuf>,

    /// Host or IP address to listen on.
    ///
    /// Defaults to this machine's private IPv4 address so devices on the same
    /// network can connect.
    #[arg(long, env = "RELOADER_HOST")]
    host: Option<String>,

    /// TCP port to listen on.
    #[arg(long, env = "RELOADER_PORT")]
    port: Option<u16>,

    /// Path to the TOML config file.  A missing file means "all defaults".
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, env = "RELOADER_CONFIG")]
    config: PathBuf,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, env = "RELOADER_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Applies command-line overrides on top of the file config.
    fn apply(self, mut file: MonitorFileConfig) -> MonitorFileConfig {
        if let Some(path) = self.path {
            file.watcher.path = Some(path);
        }
        if let Some(host) = self.host {
            file.server.host = Some(host);
        }
        if let Some(port) = self.port {
            file.server.port = port;
        }
        if let Some(level) = self.log_level {
            file.logging.level = level;
        }
        file
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file = load_config(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    let settings = cli.apply(file);

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level)),
        )
        .init();

    let cwd = std::env::current_dir().context("failed to read the current directory")?;
    let config = MonitorConfig {
        server: settings.server_config(),
        watcher: settings.watcher_config(&cwd),
    };

    info!("Reloader monitor starting");
    let (mut monitor, notifications) = Monitor::new(config);

    // ── Notification pump ─────────────────────────────────────────────────────
    // Started first so setup failures raised by `start` are logged too.
    let pump = tokio::spawn(log_notifications(notifications));

    let addr = match monitor.start().await {
        Ok(addr) => addr,
        Err(e) => {
            drop(monitor);
            // The pump ends once every sender is gone.
            let _ = tokio::time::timeout(Duration::from_secs(1), pump).await;
            return Err(e).context("failed to start monitor");
        }
    };
    info!("Reloader monitor ready on {addr}.  Press Ctrl-C to exit.");

    // ── Ctrl-C / SIGTERM handler ──────────────────────────────────────────────
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl-C: {e}; shutting down");
    } else {
        info!("shutdown signal received");
    }

    monitor.stop().await;
    drop(monitor);
    pump.abort();

    info!("Reloader monitor stopped");
    Ok(())
}

/// Logs every server notification until the channel closes.  Returns how
/// many were seen.
async fn log_notifications(mut notifications: UnboundedReceiver<ServerNotification>) -> usize {
    let mut seen = 0;
    while let Some(notification) = notifications.recv().await {
        seen += 1;
        match notification {
            ServerNotification::ClientConnected(client) => info!("connected: {client}"),
            ServerNotification::ClientDisconnected(client) => info!("disconnected: {client}"),
            ServerNotification::Error(message) => error!("{message}"),
        }
    }
    seen
}

// ── Tests ─────────────────────────────────────────────────────────────────────
