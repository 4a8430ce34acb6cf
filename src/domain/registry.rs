//! Registry controller: the single entry point for collaborators.
//!
//! CRUD goes to the `DeviceStore` and is persisted after every successful
//! mutation; power and wake actions go to the `RemoteActionClient`. Every
//! change is announced on a broadcast channel so renderers can refresh.

use std::sync::Arc;

use async_graphql::{Enum, SimpleObject};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::device::{Device, DeviceInput, DeviceSnapshot, DeviceUpdate};
use super::device_store::DeviceStore;
use crate::error::RegistryError;
use crate::remote::{PowerAction, RemoteActionClient};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryEvent {
    /// A device was added, edited or removed.
    ListChanged,
    /// A health sweep finished.
    StatusChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Enum)]
#[serde(rename_all = "lowercase")]
pub enum RemoteAction {
    Reboot,
    Shutdown,
    Wake,
}

/// Outcome of a successful remote action, ready to show to the operator.
#[derive(Debug, Clone, Serialize, Deserialize, SimpleObject)]
pub struct ActionReport {
    pub index: usize,
    pub nickname: String,
    pub ip_address: String,
    pub action: RemoteAction,
    pub message: String,
}

pub struct RegistryController {
    store: Arc<DeviceStore>,
    actions: RemoteActionClient,
    events: broadcast::Sender<RegistryEvent>,
}

impl RegistryController {
    pub fn new(store: Arc<DeviceStore>, actions: RemoteActionClient) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            actions,
            events,
        }
    }

    pub fn store(&self) -> Arc<DeviceStore> {
        self.store.clone()
    }

    /// Sender for producers outside the controller (the health monitor).
    pub fn event_sender(&self) -> broadcast::Sender<RegistryEvent> {
        self.events.clone()
    }

    /// Subscribe to "device list or status changed" notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Populate the registry from its backing file. On failure the registry
    /// stays empty and the error is returned for the caller to report.
    pub async fn load(&self) -> Result<usize, RegistryError> {
        let result = self.store.load().await;
        let _ = self.events.send(RegistryEvent::ListChanged);
        result
    }

    pub async fn list_devices(&self) -> Vec<DeviceSnapshot> {
        self.store.list().await
    }

    pub async fn device(&self, index: usize) -> Result<DeviceSnapshot, RegistryError> {
        let mut list = self.store.list().await;
        let len = list.len();
        if index >= len {
            return Err(RegistryError::Index { index, len });
        }
        Ok(list.swap_remove(index))
    }

    pub async fn add_device(&self, input: DeviceInput) -> Result<usize, RegistryError> {
        let device = input.into_device()?;
        let index = self.store.add(device).await?;
        info!(index, "device added");
        self.commit().await?;
        Ok(index)
    }

    pub async fn edit_device(
        &self,
        selection: Option<usize>,
        update: DeviceUpdate,
    ) -> Result<Device, RegistryError> {
        let index = selection.ok_or(RegistryError::Selection)?;
        let device = self.store.update(index, &update).await?;
        info!(index, "device updated");
        self.commit().await?;
        Ok(device)
    }

    pub async fn remove_device(&self, selection: Option<usize>) -> Result<Device, RegistryError> {
        let index = selection.ok_or(RegistryError::Selection)?;
        let device = self.store.remove(index).await?;
        info!(index, ip = %device.ip_address, "device removed");
        self.commit().await?;
        Ok(device)
    }

    pub async fn reboot(&self, selection: Option<usize>) -> Result<ActionReport, RegistryError> {
        self.power(selection, PowerAction::Restart).await
    }

    pub async fn shutdown(&self, selection: Option<usize>) -> Result<ActionReport, RegistryError> {
        self.power(selection, PowerAction::Shutdown).await
    }

    pub async fn wake(&self, selection: Option<usize>) -> Result<ActionReport, RegistryError> {
        let index = selection.ok_or(RegistryError::Selection)?;
        let device = self.store.get(index).await?;
        if device.mac_address.is_empty() {
            return Err(RegistryError::Validation(format!(
                "{} has no MAC address",
                device.nickname
            )));
        }

        if let Err(e) = self.actions.send_wake_packet(&device.mac_address).await {
            warn!(index, mac = %device.mac_address, error = %e, "wake packet failed");
            return Err(e.into());
        }

        info!(index, mac = %device.mac_address, "wake packet sent");
        Ok(ActionReport {
            index,
            message: format!("Wake-on-LAN packet sent to {}", device.nickname),
            nickname: device.nickname,
            ip_address: device.ip_address,
            action: RemoteAction::Wake,
        })
    }

    async fn power(
        &self,
        selection: Option<usize>,
        action: PowerAction,
    ) -> Result<ActionReport, RegistryError> {
        let index = selection.ok_or(RegistryError::Selection)?;
        let device = self.store.get(index).await?;

        info!(index, ip = %device.ip_address, action = %action, "running remote command");
        if let Err(e) = self
            .actions
            .execute_remote_command(&device, &action.command_line())
            .await
        {
            warn!(
                index,
                ip = %device.ip_address,
                action = %action,
                error = %e,
                "remote command failed"
            );
            return Err(e.into());
        }

        Ok(ActionReport {
            index,
            message: format!(
                "{} command executed successfully on {}",
                action, device.nickname
            ),
            nickname: device.nickname,
            ip_address: device.ip_address,
            action: match action {
                PowerAction::Restart => RemoteAction::Reboot,
                PowerAction::Shutdown => RemoteAction::Shutdown,
            },
        })
    }

    /// Persist after a mutation and announce it. A failed save is returned
    /// but the in-memory change stands.
    async fn commit(&self) -> Result<(), RegistryError> {
        let persisted = self.store.persist().await;
        let _ = self.events.send(RegistryEvent::ListChanged);
        if let Err(e) = &persisted {
            warn!(error = %e, "registry change may not survive a restart");
        }
        persisted
    }
}
