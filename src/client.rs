//! Typed HTTP client for the switchboard daemon REST API.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::api::rest::{ErrorBody, HealthResponse};
use crate::config::NodeTarget;
use crate::domain::device::{DeviceInput, DeviceUpdate, DeviceView};
use crate::domain::registry::{ActionReport, RegistryEvent, RemoteAction};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:9180";
/// Remote commands can take a while; stay above the WinRM operation timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

pub struct SwitchboardClient {
    base_url: String,
    http: Client,
}

impl SwitchboardClient {
    pub fn new(base_url: &str) -> Result<Self> {
        // timeouts are per request so the event stream can stay open
        let http = Client::builder().build().context("building HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Resolve a client from the nodes map.
    /// `None` name → localhost default. `Some(name)` → look up in nodes map.
    pub fn from_node(name: Option<&str>, nodes: &HashMap<String, NodeTarget>) -> Result<Self> {
        match name {
            None => Self::new(DEFAULT_BASE_URL),
            Some(n) => match nodes.get(n) {
                Some(target) => Self::new(&target.url),
                None => bail!(
                    "node '{}' not found in config. Available nodes: {}",
                    n,
                    if nodes.is_empty() {
                        "(none configured)".to_string()
                    } else {
                        nodes.keys().cloned().collect::<Vec<_>>().join(", ")
                    }
                ),
            },
        }
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.json(self.request(Method::GET, "/health")).await
    }

    pub async fn devices(&self) -> Result<Vec<DeviceView>> {
        self.json(self.request(Method::GET, "/api/v1/devices")).await
    }

    pub async fn add_device(&self, input: &DeviceInput) -> Result<DeviceView> {
        self.json(self.request(Method::POST, "/api/v1/devices").json(input))
            .await
    }

    pub async fn edit_device(&self, index: usize, update: &DeviceUpdate) -> Result<DeviceView> {
        let path = format!("/api/v1/devices/{}", index);
        self.json(self.request(Method::PUT, &path).json(update)).await
    }

    pub async fn remove_device(&self, index: usize) -> Result<()> {
        let path = format!("/api/v1/devices/{}", index);
        self.send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    pub async fn action(&self, index: usize, action: RemoteAction) -> Result<ActionReport> {
        let name = match action {
            RemoteAction::Reboot => "reboot",
            RemoteAction::Shutdown => "shutdown",
            RemoteAction::Wake => "wake",
        };
        let path = format!("/api/v1/devices/{}/{}", index, name);
        self.json(self.request(Method::POST, &path)).await
    }

    /// Subscribe to registry change notifications. The stream stays open
    /// until the daemon goes away.
    pub async fn events(&self) -> Result<EventStream> {
        let response = self
            .send(self.http.get(self.url("/api/v1/events")))
            .await?;
        Ok(EventStream {
            response,
            buffer: String::new(),
        })
    }

    // ── Internal helpers ───────────────────────────────────

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.url(path))
            .timeout(REQUEST_TIMEOUT)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response> {
        let req = req.build().context("building request")?;
        let label = format!("{} {}", req.method(), req.url());
        let resp = self
            .http
            .execute(req)
            .await
            .with_context(|| label.clone())?;

        let status = resp.status();
        if !status.is_success() {
            // handlers answer with an ErrorBody; anything else is reported raw
            let text = resp.text().await.unwrap_or_default();
            match serde_json::from_str::<ErrorBody>(&text) {
                Ok(body) => bail!("{} returned {} ({}): {}", label, status, body.error, body.message),
                Err(_) => bail!("{} returned {}: {}", label, status, text.trim()),
            }
        }
        Ok(resp)
    }

    async fn json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = self.send(req).await?;
        let url = resp.url().to_string();
        resp.json()
            .await
            .with_context(|| format!("parsing response from {}", url))
    }
}

/// Server-sent `registry` events, decoded one frame at a time.
pub struct EventStream {
    response: Response,
    buffer: String,
}

impl EventStream {
    /// Next event, or `None` once the daemon closes the stream. Keep-alive
    /// comments are skipped.
    pub async fn next(&mut self) -> Result<Option<RegistryEvent>> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let frame: String = self.buffer.drain(..end + 2).collect();
                let data = frame
                    .lines()
                    .filter_map(|line| line.strip_prefix("data:"))
                    .map(str::trim)
                    .collect::<Vec<_>>()
                    .join("\n");
                if data.is_empty() {
                    continue;
                }
                let event = serde_json::from_str(&data)
                    .with_context(|| format!("parsing event data {:?}", data))?;
                return Ok(Some(event));
            }

            match self.response.chunk().await.context("reading event stream")? {
                Some(bytes) => self.buffer.push_str(&String::from_utf8_lossy(&bytes)),
                None => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::net::TcpListener;

    use super::*;
    use crate::api::rest::{self, AppState};
    use crate::config::WakeConfig;
    use crate::domain::device_store::DeviceStore;
    use crate::domain::registry::RegistryController;
    use crate::remote::testing::FakeShell;
    use crate::remote::RemoteActionClient;

    async fn serve(dir: &tempfile::TempDir) -> (SwitchboardClient, Arc<FakeShell>) {
        let (base_url, shell) = serve_at(dir).await;
        (SwitchboardClient::new(&base_url).unwrap(), shell)
    }

    async fn serve_at(dir: &tempfile::TempDir) -> (String, Arc<FakeShell>) {
        let store = Arc::new(DeviceStore::new(dir.path().join("devices.json")));
        let shell = Arc::new(FakeShell::exiting(0));
        let actions = RemoteActionClient::new(shell.clone(), WakeConfig::default());
        let registry = Arc::new(RegistryController::new(store, actions));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = rest::router(AppState { registry });
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}/", addr), shell)
    }

    fn input(ip: &str) -> DeviceInput {
        DeviceInput {
            nickname: "lab".to_string(),
            ip_address: ip.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn device_lifecycle_over_rest() {
        let dir = tempfile::tempdir().unwrap();
        let (client, shell) = serve(&dir).await;

        let created = client.add_device(&input("10.0.0.5")).await.unwrap();
        assert_eq!(created.index, 0);
        assert_eq!(client.health().await.unwrap().devices, 1);

        let edited = client
            .edit_device(
                0,
                &DeviceUpdate {
                    nickname: Some("renamed".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.nickname, "renamed");

        let report = client.action(0, RemoteAction::Shutdown).await.unwrap();
        assert_eq!(report.message, "Shutdown command executed successfully on renamed");
        assert_eq!(
            shell.calls.lock().unwrap().commands,
            ["powershell -Command Stop-Computer -Force"]
        );

        client.remove_device(0).await.unwrap();
        assert!(client.devices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn error_bodies_are_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let (client, _shell) = serve(&dir).await;

        let err = client.add_device(&input("  ")).await.unwrap_err();
        assert!(err.to_string().contains("400"), "{err}");
        assert!(err.to_string().contains("validation"), "{err}");

        let err = client.action(7, RemoteAction::Reboot).await.unwrap_err();
        assert!(err.to_string().contains("404"), "{err}");
    }

    #[tokio::test]
    async fn events_report_registry_changes() {
        let dir = tempfile::tempdir().unwrap();
        let (client, _shell) = serve(&dir).await;

        let mut events = client.events().await.unwrap();
        client.add_device(&input("10.0.0.5")).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.next())
            .await
            .expect("no event within 5s")
            .unwrap();
        assert_eq!(event, Some(RegistryEvent::ListChanged));
    }

    #[tokio::test]
    async fn malformed_paths_answer_with_error_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let (base_url, shell) = serve_at(&dir).await;
        let http = Client::new();

        for path in [
            "api/v1/devices/0/explode",
            "api/v1/devices/first/reboot",
            "api/v1/devices/-1/wake",
        ] {
            let resp = http.post(format!("{}{}", base_url, path)).send().await.unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST, "{path}");
            let body: ErrorBody = resp.json().await.unwrap();
            assert_eq!(body.error, "validation", "{path}");
            assert!(!body.message.is_empty());
        }

        let resp = http
            .put(format!("{}api/v1/devices/0", base_url))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: ErrorBody = resp.json().await.unwrap();
        assert_eq!(body.error, "validation");

        assert!(shell.calls.lock().unwrap().commands.is_empty());
    }

    #[test]
    fn unknown_node_lists_configured_ones() {
        let mut nodes = HashMap::new();
        nodes.insert(
            "lab".to_string(),
            NodeTarget {
                url: "http://lab:9180".to_string(),
            },
        );
        let err = SwitchboardClient::from_node(Some("office"), &nodes)
            .err()
            .unwrap();
        assert!(err.to_string().contains("lab"));
    }
}
