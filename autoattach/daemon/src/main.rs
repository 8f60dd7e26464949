//! wayvnc Auto-Attach Daemon
//!
//! Keeps a running wayvnc attached to a Wayland display. On start it
//! attaches to the first display that accepts it; whenever wayvnc reports
//! `detached` (the compositor went away) it waits for a display to come
//! back and attaches again.
//!
//! # Usage
//!
//! ```bash
//! # Stock wayvnc socket, displays under /run/user
//! wayvnc-autoattach
//!
//! # Custom socket path
//! wayvnc-autoattach --socket-path /tmp/wayvnc/wayvncctl.sock
//!
//! # wayvnc runs as its own user and needs access to the display
//! wayvnc-autoattach --acl-user vnc
//!
//! # Verbose logging
//! RUST_LOG=debug wayvnc-autoattach
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown
//!
//! # Exit Status
//!
//! Non-zero when the control connection fails; the service manager is
//! expected to restart the daemon.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use autoattach_core::{
    default_config_path, load_config_from_path, AutoAttachConfig, ConfigSource, Supervisor,
};

/// Keeps wayvnc attached to an available Wayland display
#[derive(Parser, Debug)]
#[command(name = "wayvnc-autoattach")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// wayvnc control socket path
    #[arg(short = 's', long, env = "WAYVNC_CTL_SOCKET", value_name = "PATH")]
    socket_path: Option<PathBuf>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "AUTOATTACH_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Glob matching candidate Wayland displays
    #[arg(long, value_name = "GLOB")]
    display_pattern: Option<String>,

    /// Grant this user access to each display before attaching
    #[arg(long, value_name = "USER")]
    acl_user: Option<String>,

    /// Pause between failed attach passes, in milliseconds
    #[arg(long, value_name = "MS")]
    retry_interval_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "AUTOATTACH_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    /// Apply command-line values on top of the loaded configuration
    fn apply(&self, config: &mut AutoAttachConfig) {
        let mut applied = false;

        if let Some(ref path) = self.socket_path {
            config.socket_path = path.clone();
            applied = true;
        }
        if let Some(ref pattern) = self.display_pattern {
            config.display_pattern = pattern.clone();
            config.displays = None;
            applied = true;
        }
        if let Some(ref user) = self.acl_user {
            config.acl_user = Some(user.clone());
            applied = true;
        }
        if let Some(ms) = self.retry_interval_ms {
            config.retry_interval = Duration::from_millis(ms);
            applied = true;
        }

        if applied {
            config.set_source(ConfigSource::Cli);
        }
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "wayvnc_autoattach={level},autoattach_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Cancel `token` on SIGTERM or SIGINT
fn spawn_signal_handler(token: CancellationToken) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
            _ = sigint.recv() => info!("Received SIGINT, initiating shutdown"),
        }
        token.cancel();
    });

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!("wayvnc-autoattach starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(config_path).context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        socket_path = %config.socket_path.display(),
        source = %config.source(),
        "Configuration loaded"
    );

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone())?;

    let result = Supervisor::new(config).run(&cancel).await;

    match result {
        Ok(()) => {
            info!("wayvnc-autoattach stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Stopped with error");
            Err(e).context("Control connection failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from([
            "wayvnc-autoattach",
            "--socket-path",
            "/tmp/wayvnc/wayvncctl.sock",
            "--display-pattern",
            "/run/user/1000/wayland-*",
            "--retry-interval-ms",
            "500",
        ]);

        let mut config = AutoAttachConfig::default();
        config.displays = Some(vec![PathBuf::from("/run/user/0/wayland-0")]);
        args.apply(&mut config);

        assert_eq!(config.socket_path, PathBuf::from("/tmp/wayvnc/wayvncctl.sock"));
        assert_eq!(config.display_pattern, "/run/user/1000/wayland-*");
        assert!(config.displays.is_none());
        assert_eq!(config.retry_interval, Duration::from_millis(500));
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_no_overrides_keeps_source() {
        let args = Args::parse_from(["wayvnc-autoattach"]);
        let mut config = AutoAttachConfig::default();
        args.apply(&mut config);
        assert_eq!(config.source(), ConfigSource::Default);
    }
}
