pub mod actions;
pub mod daemon;
pub mod devices;
pub mod monitor;
pub mod query;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::domain::device_store::DeviceStore;
use crate::domain::registry::RegistryController;
use crate::remote::RemoteActionClient;

/// Controller over the configured registry file, loaded and ready.
///
/// Unlike the daemon, a one-shot command refuses to start from an
/// unreadable file: its first save would replace the operator's data.
pub(crate) async fn open_registry(config: &Config) -> Result<RegistryController> {
    let store = Arc::new(DeviceStore::new(config.registry.file.clone()));
    let actions = RemoteActionClient::winrm(&config.winrm, config.wake.clone())?;
    let registry = RegistryController::new(store, actions);
    registry
        .load()
        .await
        .context("fix or move the registry file, then retry")?;
    Ok(registry)
}
