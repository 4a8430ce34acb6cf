//! `switchboard list|add|edit|remove`

use anyhow::Result;
use colored::Colorize;

use super::open_registry;
use crate::config::Config;
use crate::domain::device::{DeviceInput, DeviceStatus, DeviceUpdate, DeviceView};
use crate::monitor::HealthMonitor;

pub fn list(config: &Config, probe: bool) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let registry = open_registry(config).await?;
        if probe {
            let monitor =
                HealthMonitor::from_config(&config.monitor, registry.store(), registry.event_sender());
            monitor.sweep().await;
        }
        let devices: Vec<DeviceView> = registry
            .list_devices()
            .await
            .into_iter()
            .map(DeviceView::from)
            .collect();
        print_devices(&devices);
        Ok(())
    })
}

pub fn add(config: &Config, input: DeviceInput) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let registry = open_registry(config).await?;
        let index = registry.add_device(input).await?;
        let device = registry.device(index).await?.device;
        println!(
            "{} Added {} ({}) as #{}",
            "ok".green().bold(),
            device.nickname.bold(),
            device.ip_address,
            index
        );
        Ok(())
    })
}

pub fn edit(config: &Config, index: usize, update: DeviceUpdate) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let registry = open_registry(config).await?;
        let device = registry.edit_device(Some(index), update).await?;
        println!(
            "{} Updated #{} {} ({})",
            "ok".green().bold(),
            index,
            device.nickname.bold(),
            device.ip_address
        );
        Ok(())
    })
}

pub fn remove(config: &Config, index: usize) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let registry = open_registry(config).await?;
        let device = registry.remove_device(Some(index)).await?;
        println!(
            "{} Removed {} ({})",
            "ok".green().bold(),
            device.nickname.bold(),
            device.ip_address
        );
        Ok(())
    })
}

pub(crate) fn print_devices(devices: &[DeviceView]) {
    if devices.is_empty() {
        println!("{} No devices registered", "::".blue().bold());
        return;
    }

    println!(
        "  {:>3}  {:<24} {:<16} {:<18} {}",
        "#", "NICKNAME", "IP ADDRESS", "MAC ADDRESS", "STATUS"
    );
    for d in devices {
        let status = format!("{:<8}", d.status.as_str());
        let status = match d.status {
            DeviceStatus::Online => status.green(),
            DeviceStatus::Offline => status.red(),
            DeviceStatus::Unknown => status.dimmed(),
        };
        let checked = d
            .last_checked
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "  {:>3}  {:<24} {:<16} {:<18} {} {}",
            d.index,
            d.nickname,
            d.ip_address,
            d.mac_address,
            status,
            checked.dimmed()
        );
    }
}
