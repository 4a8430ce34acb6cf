//! Device: a registry entry and the views handed to collaborators.
//!
//! `Device` holds the identity fields that are persisted. Reachability
//! (`DeviceStatus`) is volatile and lives next to it in the store, never in
//! the backing file.

use async_graphql::{Enum, InputObject, SimpleObject};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

pub const DEFAULT_NICKNAME: &str = "Unnamed Device";

/// Persisted identity of a remote machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    #[serde(default = "default_nickname")]
    pub nickname: String,
    pub ip_address: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub mac_address: String,
}

fn default_nickname() -> String {
    DEFAULT_NICKNAME.to_string()
}

/// Last observed reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Enum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Unknown,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl DeviceStatus {
    pub fn from_reachable(reachable: bool) -> Self {
        if reachable {
            Self::Online
        } else {
            Self::Offline
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
        }
    }
}

/// Fields submitted when adding a device.
#[derive(Debug, Clone, Default, Serialize, Deserialize, InputObject)]
pub struct DeviceInput {
    #[serde(default)]
    #[graphql(default)]
    pub nickname: String,
    pub ip_address: String,
    #[serde(default)]
    #[graphql(default)]
    pub username: String,
    #[serde(default)]
    #[graphql(default)]
    pub password: String,
    #[serde(default)]
    #[graphql(default)]
    pub mac_address: String,
}

impl DeviceInput {
    /// Trim every field and build a `Device`, rejecting an empty IP address.
    pub fn into_device(self) -> Result<Device, RegistryError> {
        let ip_address = self.ip_address.trim().to_string();
        if ip_address.is_empty() {
            return Err(RegistryError::Validation(
                "IP address is required".to_string(),
            ));
        }
        let nickname = self.nickname.trim();
        Ok(Device {
            nickname: if nickname.is_empty() {
                default_nickname()
            } else {
                nickname.to_string()
            },
            ip_address,
            username: self.username.trim().to_string(),
            password: self.password.trim().to_string(),
            mac_address: self.mac_address.trim().to_string(),
        })
    }
}

/// Partial edit of a device's identity fields. `None` keeps the current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, InputObject)]
pub struct DeviceUpdate {
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub mac_address: Option<String>,
}

impl DeviceUpdate {
    /// Apply the edit to a copy of `current`; the caller commits it only if
    /// this succeeds, so a rejected edit never leaves a half-updated entry.
    pub fn apply_to(&self, current: &Device) -> Result<Device, RegistryError> {
        let pick = |new: &Option<String>, old: &str| -> String {
            new.as_deref().map(str::trim).unwrap_or(old).to_string()
        };

        let mut device = Device {
            nickname: pick(&self.nickname, &current.nickname),
            ip_address: pick(&self.ip_address, &current.ip_address),
            username: pick(&self.username, &current.username),
            password: pick(&self.password, &current.password),
            mac_address: pick(&self.mac_address, &current.mac_address),
        };

        if device.ip_address.is_empty() {
            return Err(RegistryError::Validation(
                "IP address is required".to_string(),
            ));
        }
        if device.nickname.is_empty() {
            device.nickname = default_nickname();
        }
        Ok(device)
    }
}

/// Owned copy of one registry entry, taken under the store lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub index: usize,
    pub device: Device,
    pub status: DeviceStatus,
    pub last_checked: Option<DateTime<Utc>>,
}

/// What the API surfaces render. The password is reduced to a flag.
#[derive(Debug, Clone, Serialize, Deserialize, SimpleObject)]
pub struct DeviceView {
    pub index: usize,
    pub nickname: String,
    pub ip_address: String,
    pub username: String,
    pub has_password: bool,
    pub mac_address: String,
    pub status: DeviceStatus,
    pub last_checked: Option<DateTime<Utc>>,
}

impl From<DeviceSnapshot> for DeviceView {
    fn from(snapshot: DeviceSnapshot) -> Self {
        let DeviceSnapshot {
            index,
            device,
            status,
            last_checked,
        } = snapshot;
        Self {
            index,
            has_password: !device.password.is_empty(),
            nickname: device.nickname,
            ip_address: device.ip_address,
            username: device.username,
            mac_address: device.mac_address,
            status,
            last_checked,
        }
    }
}
