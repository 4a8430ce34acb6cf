//! `switchboard reboot|shutdown|wake <index>`

use anyhow::Result;
use colored::Colorize;

use super::open_registry;
use crate::config::Config;
use crate::domain::registry::RemoteAction;

pub fn run(config: &Config, index: usize, action: RemoteAction) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let registry = open_registry(config).await?;
        let target = registry.device(index).await?.device;

        let verb = match action {
            RemoteAction::Reboot => "Restarting",
            RemoteAction::Shutdown => "Shutting down",
            RemoteAction::Wake => "Waking",
        };
        println!(
            "{} {} {} ({})",
            "::".blue().bold(),
            verb,
            target.nickname.bold(),
            target.ip_address.dimmed()
        );

        let result = match action {
            RemoteAction::Reboot => registry.reboot(Some(index)).await,
            RemoteAction::Shutdown => registry.shutdown(Some(index)).await,
            RemoteAction::Wake => registry.wake(Some(index)).await,
        };

        match result {
            Ok(report) => {
                println!("{} {}", "ok".green().bold(), report.message);
                Ok(())
            }
            Err(e) => {
                let marker = if e.is_warning() {
                    "!!".yellow().bold()
                } else {
                    "!!".red().bold()
                };
                println!("{} {}", marker, e);
                std::process::exit(1);
            }
        }
    })
}
