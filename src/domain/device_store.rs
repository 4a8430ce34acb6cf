//! DeviceStore: the ordered device registry and its backing file.
//!
//! One `RwLock` guards the whole collection, so a structural mutation from
//! the controller and a status write from the health monitor never
//! interleave. Readers get owned snapshots, never the live vector.
//!
//! Only identity fields reach the file; status is recomputed by the first
//! sweep after startup.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::device::{Device, DeviceSnapshot, DeviceStatus, DeviceUpdate};
use crate::error::RegistryError;

#[derive(Debug, Clone)]
struct Entry {
    device: Device,
    status: DeviceStatus,
    last_checked: Option<DateTime<Utc>>,
}

impl Entry {
    fn new(device: Device) -> Self {
        Self {
            device,
            status: DeviceStatus::Unknown,
            last_checked: None,
        }
    }
}

pub struct DeviceStore {
    path: PathBuf,
    entries: RwLock<Vec<Entry>>,
    write_lock: Mutex<()>,
}

impl DeviceStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            entries: RwLock::new(Vec::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consistent copy of every entry, in insertion order.
    pub async fn list(&self) -> Vec<DeviceSnapshot> {
        self.entries
            .read()
            .await
            .iter()
            .enumerate()
            .map(|(index, entry)| DeviceSnapshot {
                index,
                device: entry.device.clone(),
                status: entry.status,
                last_checked: entry.last_checked,
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn get(&self, index: usize) -> Result<Device, RegistryError> {
        let entries = self.entries.read().await;
        entries
            .get(index)
            .map(|e| e.device.clone())
            .ok_or(RegistryError::Index {
                index,
                len: entries.len(),
            })
    }

    /// Append a device and return its index.
    pub async fn add(&self, device: Device) -> Result<usize, RegistryError> {
        if device.ip_address.trim().is_empty() {
            return Err(RegistryError::Validation(
                "IP address is required".to_string(),
            ));
        }
        let mut entries = self.entries.write().await;
        entries.push(Entry::new(device));
        Ok(entries.len() - 1)
    }

    /// Edit identity fields in place. Changing the IP address resets the
    /// status, since the old observation belonged to another host.
    pub async fn update(
        &self,
        index: usize,
        update: &DeviceUpdate,
    ) -> Result<Device, RegistryError> {
        let mut entries = self.entries.write().await;
        let len = entries.len();
        let entry = entries
            .get_mut(index)
            .ok_or(RegistryError::Index { index, len })?;

        let device = update.apply_to(&entry.device)?;
        if device.ip_address != entry.device.ip_address {
            entry.status = DeviceStatus::Unknown;
            entry.last_checked = None;
        }
        entry.device = device.clone();
        Ok(device)
    }

    pub async fn remove(&self, index: usize) -> Result<Device, RegistryError> {
        let mut entries = self.entries.write().await;
        if index >= entries.len() {
            return Err(RegistryError::Index {
                index,
                len: entries.len(),
            });
        }
        Ok(entries.remove(index).device)
    }

    /// Record an observation for every entry dialed at `ip`. Returns false
    /// when no entry matches (e.g. it was removed mid-sweep); the write is
    /// dropped in that case.
    pub async fn set_status(&self, ip: &str, status: DeviceStatus) -> bool {
        let now = Utc::now();
        let mut matched = false;
        let mut entries = self.entries.write().await;
        for entry in entries.iter_mut().filter(|e| e.device.ip_address == ip) {
            entry.status = status;
            entry.last_checked = Some(now);
            matched = true;
        }
        if !matched {
            debug!(ip, "status write dropped, device no longer registered");
        }
        matched
    }

    /// Overwrite the backing file with the current identity fields.
    ///
    /// Serializes under the write lock to a `.tmp` sibling, then renames it
    /// over the real file so a crash never leaves a truncated registry.
    pub async fn persist(&self) -> Result<(), RegistryError> {
        let _guard = self.write_lock.lock().await;

        let devices: Vec<Device> = self
            .entries
            .read()
            .await
            .iter()
            .map(|e| e.device.clone())
            .collect();

        let content = serde_json::to_string_pretty(&devices).map_err(|e| self.io_error(e))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error(e))?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &content)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), count = devices.len(), "registry persisted");
        Ok(())
    }

    /// Replace the in-memory registry with the file's contents.
    ///
    /// A missing file is an empty registry. Unreadable or malformed content
    /// is returned as an error and leaves the registry empty.
    pub async fn load(&self) -> Result<usize, RegistryError> {
        let mut entries = self.entries.write().await;
        entries.clear();

        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(self.io_error(e)),
        };

        let devices: Vec<Device> =
            serde_json::from_str(&content).map_err(|e| RegistryError::Parse {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })?;

        if let Some(pos) = devices.iter().position(|d| d.ip_address.trim().is_empty()) {
            return Err(RegistryError::Parse {
                path: self.path.display().to_string(),
                message: format!("record {} has an empty ip_address", pos),
            });
        }

        entries.extend(devices.into_iter().map(Entry::new));
        Ok(entries.len())
    }

    fn io_error(&self, e: impl std::fmt::Display) -> RegistryError {
        RegistryError::Io {
            path: self.path.display().to_string(),
            message: e.to_string(),
        }
    }
}
