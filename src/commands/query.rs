//! `switchboard query`: drive a switchboard daemon via its REST API.

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use super::devices::print_devices;
use crate::client::SwitchboardClient;
use crate::config::Config;
use crate::domain::device::{DeviceInput, DeviceUpdate, DeviceView};
use crate::domain::registry::{RegistryEvent, RemoteAction};

#[derive(Subcommand)]
pub enum QueryCommands {
    /// Daemon health check
    Health,
    /// Registered devices and their last known status
    Devices,
    /// Register a device on the daemon
    Add {
        #[arg(long)]
        ip: String,
        #[arg(long, default_value = "")]
        nickname: String,
        #[arg(long, default_value = "")]
        username: String,
        #[arg(long, default_value = "")]
        password: String,
        #[arg(long, default_value = "")]
        mac: String,
    },
    /// Change fields of a device on the daemon
    Edit {
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
    /// Remove a device from the daemon
    Remove { index: usize },
    /// Restart a device
    Reboot { index: usize },
    /// Shut a device down
    Shutdown { index: usize },
    /// Send a Wake-on-LAN packet for a device
    Wake { index: usize },
    /// Follow registry changes until interrupted
    Events,
}

pub fn run(config: &Config, node: Option<&str>, format: &str, command: &QueryCommands) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_async(config, node, format, command))
}

async fn run_async(
    config: &Config,
    node: Option<&str>,
    format: &str,
    command: &QueryCommands,
) -> Result<()> {
    let client = SwitchboardClient::from_node(node, &config.nodes)?;
    let json = format == "json";

    match command {
        QueryCommands::Health => {
            let health = client.health().await?;
            if json {
                return print_json(&health);
            }
            println!(
                "{} {} (v{}, {} devices)",
                "ok".green().bold(),
                health.status,
                health.version,
                health.devices
            );
        }
        QueryCommands::Devices => {
            let devices = client.devices().await?;
            if json {
                return print_json(&devices);
            }
            print_devices(&devices);
        }
        QueryCommands::Add {
            ip,
            nickname,
            username,
            password,
            mac,
        } => {
            let input = DeviceInput {
                nickname: nickname.clone(),
                ip_address: ip.clone(),
                username: username.clone(),
                password: password.clone(),
                mac_address: mac.clone(),
            };
            let device = client.add_device(&input).await?;
            changed(&device, "Added", json)?;
        }
        QueryCommands::Edit {
            index,
            ip,
            nickname,
            username,
            password,
            mac,
        } => {
            let update = DeviceUpdate {
                nickname: nickname.clone(),
                ip_address: ip.clone(),
                username: username.clone(),
                password: password.clone(),
                mac_address: mac.clone(),
            };
            let device = client.edit_device(*index, &update).await?;
            changed(&device, "Updated", json)?;
        }
        QueryCommands::Remove { index } => {
            client.remove_device(*index).await?;
            if json {
                return print_json(&serde_json::json!({ "removed": index }));
            }
            println!("{} Removed #{}", "ok".green().bold(), index);
        }
        QueryCommands::Reboot { index } => action(&client, *index, RemoteAction::Reboot, json).await?,
        QueryCommands::Shutdown { index } => {
            action(&client, *index, RemoteAction::Shutdown, json).await?
        }
        QueryCommands::Wake { index } => action(&client, *index, RemoteAction::Wake, json).await?,
        QueryCommands::Events => follow(&client, json).await?,
    }
    Ok(())
}

fn changed(device: &DeviceView, verb: &str, json: bool) -> Result<()> {
    if json {
        return print_json(device);
    }
    println!(
        "{} {} #{} {} ({})",
        "ok".green().bold(),
        verb,
        device.index,
        device.nickname.bold(),
        device.ip_address
    );
    Ok(())
}

async fn follow(client: &SwitchboardClient, json: bool) -> Result<()> {
    let mut events = client.events().await?;
    loop {
        let event = tokio::select! {
            event = events.next() => event?,
            _ = tokio::signal::ctrl_c() => return Ok(()),
        };
        let Some(event) = event else {
            println!("{} daemon closed the event stream", "!!".yellow().bold());
            return Ok(());
        };
        if json {
            print_json(&event)?;
            continue;
        }
        let what = match event {
            RegistryEvent::ListChanged => "device list changed",
            RegistryEvent::StatusChanged => "health sweep finished",
        };
        println!(
            "{} {} {}",
            "::".blue().bold(),
            chrono::Local::now().format("%H:%M:%S"),
            what
        );
    }
}

async fn action(
    client: &SwitchboardClient,
    index: usize,
    action: RemoteAction,
    json: bool,
) -> Result<()> {
    let report = client.action(index, action).await?;
    if json {
        return print_json(&report);
    }
    println!("{} {}", "ok".green().bold(), report.message);
    Ok(())
}

fn print_json<T: serde::Serialize>(data: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::api::rest::{self, AppState};
    use crate::config::{NodeTarget, WakeConfig};
    use crate::domain::device_store::DeviceStore;
    use crate::domain::registry::RegistryController;
    use crate::remote::testing::FakeShell;
    use crate::remote::RemoteActionClient;

    async fn daemon(dir: &tempfile::TempDir) -> (Config, Arc<RegistryController>) {
        let store = Arc::new(DeviceStore::new(dir.path().join("devices.json")));
        let actions = RemoteActionClient::new(Arc::new(FakeShell::exiting(0)), WakeConfig::default());
        let registry = Arc::new(RegistryController::new(store, actions));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = rest::router(AppState {
            registry: registry.clone(),
        });
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut config = Config::default();
        config.nodes.insert(
            "bench".to_string(),
            NodeTarget {
                url: format!("http://{}", addr),
            },
        );
        (config, registry)
    }

    #[tokio::test]
    async fn manages_devices_on_a_named_node() {
        let dir = tempfile::tempdir().unwrap();
        let (config, registry) = daemon(&dir).await;

        let add = QueryCommands::Add {
            ip: "10.0.0.9".to_string(),
            nickname: "bench".to_string(),
            username: String::new(),
            password: String::new(),
            mac: String::new(),
        };
        run_async(&config, Some("bench"), "json", &add).await.unwrap();
        assert_eq!(registry.list_devices().await[0].device.ip_address, "10.0.0.9");

        let edit = QueryCommands::Edit {
            index: 0,
            ip: None,
            nickname: Some("renamed".to_string()),
            username: None,
            password: None,
            mac: Some("AA-BB-CC-DD-EE-FF".to_string()),
        };
        run_async(&config, Some("bench"), "table", &edit).await.unwrap();
        let device = registry.device(0).await.unwrap().device;
        assert_eq!(device.nickname, "renamed");
        assert_eq!(device.ip_address, "10.0.0.9");

        run_async(&config, Some("bench"), "table", &QueryCommands::Remove { index: 0 })
            .await
            .unwrap();
        assert!(registry.list_devices().await.is_empty());

        let err = run_async(&config, Some("bench"), "table", &QueryCommands::Remove { index: 0 })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"), "{err}");
    }
}
