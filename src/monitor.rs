//! Periodic reachability sweeps over the registry.
//!
//! Each sweep snapshots the device list, probes every distinct IP address
//! once, and writes the result back keyed by that address. A device removed
//! or re-addressed mid-sweep simply loses the write. The loop runs as a
//! detached task for the life of the process; nothing joins it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::domain::device::DeviceStatus;
use crate::domain::device_store::DeviceStore;
use crate::domain::registry::RegistryEvent;
use crate::platform::{self, Os};

/// Bounded-time liveness check. Any failure to probe counts as unreachable.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self, host: &str) -> bool;
}

/// One ICMP echo request through the system `ping`.
pub struct PingProbe {
    os: Os,
    timeout: Duration,
}

impl PingProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            os: platform::detect(),
            timeout,
        }
    }
}

#[async_trait]
impl ReachabilityProbe for PingProbe {
    async fn probe(&self, host: &str) -> bool {
        // never let an address be read as a ping option
        if host.is_empty() || host.starts_with('-') {
            return false;
        }

        let mut cmd = Command::new("ping");
        cmd.args(platform::ping_args(self.os, host, self.timeout))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);

        // ping's own wait is whole seconds on unix; allow it to finish
        let deadline = self.timeout + Duration::from_millis(500);
        match tokio::time::timeout(deadline, cmd.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!(host, error = %e, "ping could not be started");
                false
            }
            Err(_) => {
                debug!(host, "ping timed out");
                false
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub probed: usize,
    pub online: usize,
    pub offline: usize,
    /// Results whose device disappeared before the write.
    pub dropped: usize,
}

pub struct HealthMonitor {
    store: Arc<DeviceStore>,
    probe: Arc<dyn ReachabilityProbe>,
    interval: Duration,
    events: broadcast::Sender<RegistryEvent>,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<DeviceStore>,
        probe: Arc<dyn ReachabilityProbe>,
        interval: Duration,
        events: broadcast::Sender<RegistryEvent>,
    ) -> Self {
        Self {
            store,
            probe,
            interval,
            events,
        }
    }

    /// Monitor using the system `ping` with the configured timings.
    pub fn from_config(
        config: &MonitorConfig,
        store: Arc<DeviceStore>,
        events: broadcast::Sender<RegistryEvent>,
    ) -> Self {
        let probe = PingProbe::new(Duration::from_millis(config.probe_timeout_ms));
        Self::new(
            store,
            Arc::new(probe),
            // zero would sweep back to back
            Duration::from_secs(config.interval_secs.max(1)),
            events,
        )
    }

    /// One full pass over the devices registered when the sweep starts.
    pub async fn sweep(&self) -> SweepSummary {
        let snapshot = self.store.list().await;
        let mut summary = SweepSummary::default();
        let mut seen = HashSet::new();

        for entry in snapshot {
            let ip = entry.device.ip_address;
            if !seen.insert(ip.clone()) {
                continue;
            }

            let status = DeviceStatus::from_reachable(self.probe.probe(&ip).await);
            summary.probed += 1;
            match status {
                DeviceStatus::Online => summary.online += 1,
                _ => summary.offline += 1,
            }

            if !self.store.set_status(&ip, status).await {
                summary.dropped += 1;
            }
        }

        // no receivers just means nobody is rendering right now
        let _ = self.events.send(RegistryEvent::StatusChanged);
        summary
    }

    /// Sweep, sleep, repeat. Never returns.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "health monitor started");
        loop {
            let summary = self.sweep().await;
            debug!(
                probed = summary.probed,
                online = summary.online,
                offline = summary.offline,
                dropped = summary.dropped,
                "sweep completed"
            );
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Start the loop as a detached background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use tokio::sync::Notify;

    use super::*;
    use crate::domain::device::Device;

    /// Answers from a fixed table; unknown hosts are unreachable.
    struct TableProbe {
        reachable: HashMap<String, bool>,
        probed: Mutex<Vec<String>>,
    }

    impl TableProbe {
        fn new(entries: &[(&str, bool)]) -> Self {
            Self {
                reachable: entries.iter().map(|(h, r)| (h.to_string(), *r)).collect(),
                probed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ReachabilityProbe for TableProbe {
        async fn probe(&self, host: &str) -> bool {
            self.probed.lock().unwrap().push(host.to_string());
            self.reachable.get(host).copied().unwrap_or(false)
        }
    }

    /// Parks on the first probe of `host` until released.
    struct GateProbe {
        host: String,
        reached: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ReachabilityProbe for GateProbe {
        async fn probe(&self, host: &str) -> bool {
            if host == self.host {
                self.reached.notify_one();
                self.release.notified().await;
            }
            true
        }
    }

    fn device(nickname: &str, ip: &str) -> Device {
        Device {
            nickname: nickname.to_string(),
            ip_address: ip.to_string(),
            username: String::new(),
            password: String::new(),
            mac_address: String::new(),
        }
    }

    async fn store_with(devices: &[Device]) -> (tempfile::TempDir, Arc<DeviceStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DeviceStore::new(dir.path().join("devices.json")));
        for d in devices {
            store.add(d.clone()).await.unwrap();
        }
        (dir, store)
    }

    #[tokio::test]
    async fn sweep_writes_status_and_notifies() {
        let (_dir, store) = store_with(&[device("a", "10.0.0.1"), device("b", "10.0.0.2")]).await;
        let (tx, mut rx) = broadcast::channel(8);
        let probe = Arc::new(TableProbe::new(&[("10.0.0.1", true)]));
        let monitor = HealthMonitor::new(store.clone(), probe, Duration::from_secs(5), tx);

        let summary = monitor.sweep().await;
        assert_eq!(summary.probed, 2);
        assert_eq!(summary.online, 1);
        assert_eq!(summary.offline, 1);

        let list = store.list().await;
        assert_eq!(list[0].status, DeviceStatus::Online);
        assert_eq!(list[1].status, DeviceStatus::Offline);
        assert!(list[0].last_checked.is_some());
        assert_eq!(rx.recv().await.unwrap(), RegistryEvent::StatusChanged);
    }

    #[tokio::test]
    async fn duplicate_addresses_are_probed_once() {
        let (_dir, store) = store_with(&[device("a", "10.0.0.1"), device("a2", "10.0.0.1")]).await;
        let (tx, _rx) = broadcast::channel(8);
        let probe = Arc::new(TableProbe::new(&[("10.0.0.1", true)]));
        let monitor = HealthMonitor::new(store.clone(), probe.clone(), Duration::from_secs(5), tx);

        monitor.sweep().await;
        assert_eq!(probe.probed.lock().unwrap().len(), 1);
        assert!(store
            .list()
            .await
            .iter()
            .all(|s| s.status == DeviceStatus::Online));
    }

    #[tokio::test]
    async fn removal_mid_sweep_is_not_resurrected() {
        let (_dir, store) = store_with(&[
            device("a", "10.0.0.1"),
            device("k", "10.0.0.2"),
            device("c", "10.0.0.3"),
        ])
        .await;
        let (tx, _rx) = broadcast::channel(8);
        let probe = Arc::new(GateProbe {
            host: "10.0.0.2".to_string(),
            reached: Notify::new(),
            release: Notify::new(),
        });
        let monitor = HealthMonitor::new(store.clone(), probe.clone(), Duration::from_secs(5), tx);

        let sweep = tokio::spawn(async move { monitor.sweep().await });

        probe.reached.notified().await;
        store.remove(1).await.unwrap();
        probe.release.notify_one();

        let summary = sweep.await.unwrap();
        assert_eq!(summary.dropped, 1);

        let list = store.list().await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].device, device("a", "10.0.0.1"));
        assert_eq!(list[1].device, device("c", "10.0.0.3"));
        assert!(list.iter().all(|s| s.status == DeviceStatus::Online));
    }

    #[tokio::test]
    async fn option_like_address_is_unreachable() {
        let probe = PingProbe::new(Duration::from_millis(100));
        assert!(!probe.probe("-f").await);
        assert!(!probe.probe("").await);
    }

    #[tokio::test]
    async fn spawned_loop_keeps_sweeping() {
        let (_dir, store) = store_with(&[device("a", "10.0.0.1")]).await;
        let (tx, mut rx) = broadcast::channel(8);
        let probe = Arc::new(TableProbe::new(&[]));
        let handle =
            HealthMonitor::new(store, probe.clone(), Duration::from_millis(10), tx).spawn();

        assert_eq!(rx.recv().await.unwrap(), RegistryEvent::StatusChanged);
        assert_eq!(rx.recv().await.unwrap(), RegistryEvent::StatusChanged);
        assert!(probe.probed.lock().unwrap().len() >= 2);
        handle.abort();
    }

    #[tokio::test]
    async fn zero_interval_is_raised_to_one_second() {
        let (_dir, store) = store_with(&[]).await;
        let (tx, _rx) = broadcast::channel(8);
        let config = MonitorConfig {
            interval_secs: 0,
            ..MonitorConfig::default()
        };
        let monitor = HealthMonitor::from_config(&config, store, tx);
        assert_eq!(monitor.interval, Duration::from_secs(1));
    }
}
