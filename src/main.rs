mod api;
mod client;
mod commands;
mod config;
mod domain;
mod error;
mod logging;
mod monitor;
mod platform;
mod remote;
mod server;

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::domain::device::{DeviceInput, DeviceUpdate};
use crate::domain::registry::RemoteAction;

#[derive(Parser)]
#[command(
    name = "switchboard",
    version,
    about = "Device registry with health monitoring, remote power control and Wake-on-LAN"
)]
struct Cli {
    /// Path to config file (default: ~/.config/switchboard/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Registry file (overrides config)
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// Log more to stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show registered devices
    List {
        /// Ping every device once before printing
        #[arg(long)]
        probe: bool,
    },

    /// Register a device
    Add {
        /// IP address or hostname
        #[arg(long)]
        ip: String,

        /// Display name (default: "Unnamed Device")
        #[arg(long, default_value = "")]
        nickname: String,

        /// Account used for remote commands
        #[arg(long, default_value = "")]
        username: String,

        #[arg(long, default_value = "")]
        password: String,

        /// Hardware address for Wake-on-LAN (AA:BB:CC:DD:EE:FF)
        #[arg(long, default_value = "")]
        mac: String,
    },

    /// Change fields of a registered device
    Edit {
        /// Device index as shown by `list`
        index: usize,

        #[arg(long)]
        ip: Option<String>,

        #[arg(long)]
        nickname: Option<String>,

        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        password: Option<String>,

        #[arg(long)]
        mac: Option<String>,
    },

    /// Remove a device from the registry
    Remove { index: usize },

    /// Restart a device over WinRM
    Reboot { index: usize },

    /// Shut a device down over WinRM
    Shutdown { index: usize },

    /// Broadcast a Wake-on-LAN packet for a device
    Wake { index: usize },

    /// Probe devices repeatedly and print their status
    Monitor {
        /// Run a single sweep and exit
        #[arg(long)]
        once: bool,
    },

    /// Run the switchboard daemon (REST + GraphQL + health monitor)
    Daemon {
        /// HTTP listen address (overrides config)
        #[arg(long)]
        http_addr: Option<String>,

        /// Log level (overrides config)
        #[arg(long)]
        log_level: Option<String>,
    },

    /// Query a switchboard daemon's REST API
    Query {
        /// Target node name (from config nodes map; defaults to localhost)
        #[arg(long, global = true)]
        node: Option<String>,

        /// Output format (table or json)
        #[arg(long, global = true, default_value = "table")]
        format: String,

        #[command(subcommand)]
        command: commands::query::QueryCommands,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = config::load(cli.config.as_deref())?;
    if let Some(path) = cli.registry {
        cfg.registry.file = path;
    }

    if !matches!(cli.command, Commands::Daemon { .. }) {
        logging::init_cli(cli.verbose);
    }

    match cli.command {
        Commands::List { probe } => commands::devices::list(&cfg, probe),
        Commands::Add {
            ip,
            nickname,
            username,
            password,
            mac,
        } => commands::devices::add(
            &cfg,
            DeviceInput {
                nickname,
                ip_address: ip,
                username,
                password,
                mac_address: mac,
            },
        ),
        Commands::Edit {
            index,
            ip,
            nickname,
            username,
            password,
            mac,
        } => commands::devices::edit(
            &cfg,
            index,
            DeviceUpdate {
                nickname,
                ip_address: ip,
                username,
                password,
                mac_address: mac,
            },
        ),
        Commands::Remove { index } => commands::devices::remove(&cfg, index),
        Commands::Reboot { index } => commands::actions::run(&cfg, index, RemoteAction::Reboot),
        Commands::Shutdown { index } => {
            commands::actions::run(&cfg, index, RemoteAction::Shutdown)
        }
        Commands::Wake { index } => commands::actions::run(&cfg, index, RemoteAction::Wake),
        Commands::Monitor { once } => commands::monitor::run(&cfg, once),
        Commands::Daemon {
            http_addr,
            log_level,
        } => commands::daemon::run(cfg, http_addr, log_level),
        Commands::Query {
            node,
            format,
            command,
        } => commands::query::run(&cfg, node.as_deref(), &format, &command),
    }
}
