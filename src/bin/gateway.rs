//! gateway - LAN proxy gateway control tool
//!
//! Starts and stops the proxy engine, prepares the host for forwarding LAN
//! traffic, reports status and manages the boot-time service.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use libgateway::network::NetworkTopology;
use libgateway::process::{self, ProcessState};
use libgateway::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Log lines shown when the engine dies during startup
const STARTUP_LOG_LINES: usize = 20;

#[derive(Parser)]
#[command(name = "gateway")]
#[command(about = "LAN proxy gateway - run the proxy engine as a transparent gateway", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Verbose output (same as --log-level debug)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy engine and enable gateway forwarding
    Start {
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Engine data directory
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
        /// Engine log file (truncated on start)
        #[arg(long)]
        log_file: Option<PathBuf>,
    },
    /// Stop the proxy engine and restore forwarding and firewall state
    Stop {
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Show network topology, forwarding, engine and service state
    Status {
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Boot-time service management
    #[command(subcommand)]
    Service(ServiceCommands),
}

#[derive(Subcommand)]
enum ServiceCommands {
    /// Register and start the gateway as an OS service
    Install {
        /// Configuration file passed to the service
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Engine data directory passed to the service
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
        /// Directory for service logs (default: ./logs)
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Stop and remove the OS service
    Uninstall,
}

#[derive(Serialize)]
struct StatusReport {
    os: TargetOs,
    arch: String,
    topology: NetworkTopology,
    ip_forwarding: Option<bool>,
    engine: ProcessState,
    service_installed: bool,
    service_definition: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    match cli.command {
        Commands::Start { config, data_dir, log_file } => {
            cmd_start(config.as_deref(), data_dir, log_file).await
        }
        Commands::Stop { config } => cmd_stop(config.as_deref()).await,
        Commands::Status { config, json } => cmd_status(config.as_deref(), json).await,
        Commands::Service(ServiceCommands::Install { config, data_dir, log_dir }) => {
            cmd_service_install(config, data_dir, log_dir).await
        }
        Commands::Service(ServiceCommands::Uninstall) => cmd_service_uninstall().await,
    }
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.verbose { "debug" } else { &cli.log_level };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gateway={},libgateway={}", log_level, log_level)));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<GatewayConfig> {
    GatewayConfig::load_or_default(path).context("Failed to load configuration")
}

async fn cmd_start(config_path: Option<&Path>, data_dir: Option<PathBuf>, log_file: Option<PathBuf>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(data_dir) = data_dir {
        config.engine.data_dir = data_dir;
    }
    if let Some(log_file) = log_file {
        config.engine.log_file = log_file;
    }

    let platform = PlatformProvider::native(&config)?;
    platform.require_elevated().await?;

    let binary = platform
        .process()
        .find_binary()
        .await
        .context("Proxy engine not found, install mihomo first")?;
    info!("Using engine {}", binary.display());

    config.ensure_directories()?;

    let previous = platform.process().is_running().await;
    if previous.running {
        info!("Stopping previous instance (pid {:?})", previous.pid);
        platform.process().stop_process().await?;
    }

    platform
        .network()
        .enable_ip_forwarding()
        .await
        .context("Failed to enable IP forwarding")?;
    platform.network().disable_firewall_interference().await;

    let pid = platform
        .process()
        .start_process(&binary, &config.engine.data_dir, &config.engine.log_file)
        .await?;

    let state = process::wait_until_running(platform.process(), config.engine.startup_delay()).await;
    if !state.running {
        eprintln!("Engine (pid {}) exited during startup. Last log lines:", pid);
        match process::tail_log(&config.engine.log_file, STARTUP_LOG_LINES).await {
            Ok(lines) => lines.iter().for_each(|l| eprintln!("  {}", l)),
            Err(e) => eprintln!("  (cannot read {}: {})", config.engine.log_file.display(), e),
        }
        bail!("proxy engine failed to start, see {}", config.engine.log_file.display());
    }

    let topology = platform.network().topology().await;
    println!("Gateway started (engine pid {})", state.pid.unwrap_or(pid));
    print_topology(&topology);
    if topology.tun_interface.is_none() {
        warn!("No TUN interface in {} yet, the engine may still be initializing", network::TUN_NETWORK);
    }
    Ok(())
}

async fn cmd_stop(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let platform = PlatformProvider::native(&config)?;
    platform.require_elevated().await?;

    platform.process().stop_process().await?;
    platform.network().clear_firewall_rules().await;
    platform
        .network()
        .disable_ip_forwarding()
        .await
        .context("Failed to disable IP forwarding")?;

    println!("Gateway stopped");
    Ok(())
}

async fn cmd_status(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let platform = PlatformProvider::native(&config)?;

    let ip_forwarding = match platform.network().is_ip_forwarding_enabled().await {
        Ok(enabled) => Some(enabled),
        Err(e) => {
            warn!("Cannot read IP forwarding state: {}", e);
            None
        }
    };

    let report = StatusReport {
        os: platform.os(),
        arch: network::detect_arch(),
        topology: platform.network().topology().await,
        ip_forwarding,
        engine: platform.process().is_running().await,
        service_installed: platform.service().is_installed().await,
        service_definition: platform.service().definition_location(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Platform:        {} ({})", report.os, report.arch);
    print_topology(&report.topology);
    println!(
        "IP forwarding:   {}",
        match report.ip_forwarding {
            Some(true) => "enabled",
            Some(false) => "disabled",
            None => "unknown",
        }
    );
    match report.engine.pid {
        Some(pid) if report.engine.running => println!("Engine:          running (pid {})", pid),
        _ => println!("Engine:          stopped"),
    }
    println!(
        "Service:         {} ({})",
        if report.service_installed { "installed" } else { "not installed" },
        report.service_definition
    );
    Ok(())
}

async fn cmd_service_install(config: Option<PathBuf>, data_dir: Option<PathBuf>, log_dir: Option<PathBuf>) -> Result<()> {
    let gateway_config = load_config(config.as_deref())?;
    let platform = PlatformProvider::native(&gateway_config)?;
    platform.require_elevated().await?;

    // The service starts with --config, which must name a readable file
    let config_file = match config {
        Some(path) => path,
        None => {
            let path = PathBuf::from(libgateway::config::DEFAULT_CONFIG_PATH);
            if gateway_config
                .save_if_missing(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?
            {
                info!("Wrote default configuration to {}", path.display());
            }
            path
        }
    };
    let data_dir = data_dir.unwrap_or_else(|| gateway_config.engine.data_dir.clone());
    let log_dir = log_dir.or_else(|| gateway_config.service.log_dir.clone());

    let descriptor = ServiceDescriptor::resolve(&config_file, &data_dir, None, log_dir.as_deref())?;
    platform.service().install(&descriptor).await?;

    println!("Service installed: {}", platform.service().definition_location());
    println!("Logs: {}", descriptor.log_dir.display());
    Ok(())
}

async fn cmd_service_uninstall() -> Result<()> {
    let platform = PlatformProvider::native(&GatewayConfig::default())?;
    platform.require_elevated().await?;
    platform.service().uninstall().await?;
    println!("Service uninstalled");
    Ok(())
}

fn print_topology(topology: &NetworkTopology) {
    let show = |value: Option<String>| value.unwrap_or_else(|| "undetected".to_string());
    println!("Interface:       {}", show(topology.default_interface.clone()));
    println!("Interface IP:    {}", show(topology.interface_ip.map(|ip| ip.to_string())));
    println!("Gateway:         {}", show(topology.gateway_ip.map(|ip| ip.to_string())));
    println!("TUN interface:   {}", show(topology.tun_interface.clone()));
}
