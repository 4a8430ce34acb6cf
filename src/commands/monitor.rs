//! `switchboard monitor`: foreground health sweeps with a live table.

use anyhow::Result;
use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use super::devices::print_devices;
use super::open_registry;
use crate::config::Config;
use crate::domain::device::DeviceView;
use crate::domain::registry::{RegistryController, RegistryEvent};
use crate::monitor::HealthMonitor;

pub fn run(config: &Config, once: bool) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let registry = open_registry(config).await?;
        let monitor =
            HealthMonitor::from_config(&config.monitor, registry.store(), registry.event_sender());

        if once {
            monitor.sweep().await;
            render(&registry).await;
            return Ok(());
        }

        println!(
            "{} Probing every {}s, Ctrl+C to stop",
            "::".blue().bold(),
            config.monitor.interval_secs.max(1)
        );

        let mut events = registry.subscribe();
        monitor.spawn();

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(RegistryEvent::StatusChanged) => render(&registry).await,
                    Ok(RegistryEvent::ListChanged) => {}
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "renderer fell behind"),
                    Err(RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        Ok(())
    })
}

async fn render(registry: &RegistryController) {
    let devices: Vec<DeviceView> = registry
        .list_devices()
        .await
        .into_iter()
        .map(DeviceView::from)
        .collect();
    println!();
    println!(
        "{} {}",
        "::".blue().bold(),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    print_devices(&devices);
}
