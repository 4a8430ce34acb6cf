use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub winrm: WinRmConfig,
    #[serde(default)]
    pub wake: WakeConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// Named daemons reachable with `switchboard query --node <name>`.
    #[serde(default)]
    pub nodes: HashMap<String, NodeTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub file: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            file: base.join("switchboard").join("device_address_book.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub probe_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
            probe_timeout_ms: 1000,
        }
    }
}

/// How WinRM requests authenticate against the target listener.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WinRmAuth {
    /// NTLMv2 handshake with sealed message bodies; works against a stock
    /// listener that refuses unencrypted traffic.
    #[default]
    Ntlm,
    /// Plain `Authorization: Basic`; the listener must allow both Basic
    /// and unencrypted bodies.
    Basic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WinRmConfig {
    pub auth: WinRmAuth,
    pub port: u16,
    pub path: String,
    pub operation_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for WinRmConfig {
    fn default() -> Self {
        Self {
            auth: WinRmAuth::Ntlm,
            port: 5985,
            path: "/wsman".to_string(),
            operation_timeout_secs: 60,
            connect_timeout_secs: 10,
        }
    }
}

impl WinRmConfig {
    pub fn endpoint(&self, host: &str) -> String {
        format!("http://{}:{}{}", host, self.port, self.path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeConfig {
    pub broadcast_addr: String,
    pub port: u16,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            broadcast_addr: "255.255.255.255".to_string(),
            port: 9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub http_addr: String,
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:9180".to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTarget {
    pub url: String,
}

impl Config {
    pub fn path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("could not determine config directory")?;
        Ok(config_dir.join("switchboard").join("config.yaml"))
    }
}

/// Load configuration: defaults, then the YAML file (custom path or default
/// location), then `SWITCHBOARD_*` environment variables.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => Config::path()?,
    };
    figment_for(&path)
        .extract()
        .with_context(|| format!("loading configuration from {}", path.display()))
}

fn figment_for(path: &Path) -> Figment {
    Figment::from(Serialized::defaults(Config::default()))
        .merge(Yaml::file(path))
        .merge(Env::prefixed("SWITCHBOARD_").split("__"))
}
