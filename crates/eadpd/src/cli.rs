//! Command-line interface for the gateway daemon.
//!
//! ```bash
//! # Start the gateway (foreground)
//! eadpd start
//!
//! # Start with a config file, daemonized
//! eadpd start -d --config /etc/eadp/eadpd.toml
//!
//! # Stop the running gateway
//! eadpd stop
//!
//! # Check gateway status
//! eadpd status
//!
//! # Validate configuration without starting
//! eadpd check-config --config ./eadpd.toml
//! ```

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use eadp_bus::transport_from_url;

use crate::config::{ConfigOverrides, GatewayConfig};
use crate::logging;
use crate::server::GatewayServer;

/// EADP gateway - TCP line protocol access to a KNX bus
#[derive(Parser, Debug)]
#[command(name = "eadpd", version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start the gateway
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        #[command(flatten)]
        settings: SettingsArgs,
    },
    /// Stop the running gateway
    Stop,
    /// Show gateway status
    Status,
    /// Load and validate the configuration, then exit
    CheckConfig {
        #[command(flatten)]
        settings: SettingsArgs,
    },
}

/// Flags that select or override configuration.
#[derive(clap::Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsArgs {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:6721
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Bus URL: ip:<host>[:<port>], local:<path> or sim:
    #[arg(short, long)]
    pub bus: Option<String>,
}

impl SettingsArgs {
    /// File, then environment, then flags.
    pub fn load(&self) -> Result<GatewayConfig> {
        let mut config = GatewayConfig::load(self.config.as_deref())?;
        ConfigOverrides {
            listen: self.listen.clone(),
            bus_url: self.bus.clone(),
        }
        .apply(&mut config);
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// PID File
// ============================================================================

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("eadp")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("eadpd.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("eadpd.out")
}

fn read_pid(path: &Path) -> Option<u32> {
    let mut file = File::open(path).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file(path: &Path) {
    let _ = fs::remove_file(path);
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

fn is_daemon_running(path: &Path) -> Option<u32> {
    if let Some(pid) = read_pid(path) {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file(path);
    }
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {pid}");
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

// ============================================================================
// Entry Point
// ============================================================================

/// Parses arguments and runs the selected command.
pub fn run() -> Result<()> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        settings: SettingsArgs::default(),
    });
    let pid_path = pid_file_path();

    match command {
        Command::Start { daemon, settings } => {
            if let Some(pid) = is_daemon_running(&pid_path) {
                eprintln!("Gateway is already running (PID {pid})");
                eprintln!("Use 'eadpd stop' to stop it first.");
                process::exit(1);
            }

            // Fail before forking so errors reach the terminal
            let config = settings.load()?;

            if daemon {
                daemonize()?;
            }

            write_pid(&pid_path)?;

            let result = run_daemon(config);

            remove_pid_file(&pid_path);

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running(&pid_path) {
                println!("Stopping gateway (PID {pid})...");
                stop_daemon(pid)?;

                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Gateway stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Gateway did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Gateway is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running(&pid_path) {
                println!("Gateway is running (PID {pid})");
                println!("PID file: {}", pid_path.display());
                Ok(())
            } else {
                println!("Gateway is not running.");
                process::exit(1);
            }
        }
        Command::CheckConfig { settings } => {
            let config = settings.load()?;
            config.load_policy()?;
            println!("Configuration OK");
            println!("  listen:          {}", config.listen);
            println!("  bus:             {}", config.bus_url);
            println!("  max connections: {}", config.max_connections);
            Ok(())
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let out_path = log_file_path();

    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }

    let stdout = File::create(&out_path).context("Failed to create output file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create output file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config: GatewayConfig) -> Result<()> {
    let _log_guard = logging::init(&config.log)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "EADP gateway starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let transport = transport_from_url(&config.bus_url)?;
    info!(bus = %transport.describe(), "Bus transport configured");

    let server = GatewayServer::bind(&config, Arc::clone(&transport), cancel_token).await?;

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("EADP gateway stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
