//! WS-Management (WinRM) remote shell over HTTP.
//!
//! One shell per action: Create → Command → Receive (until Done) →
//! Signal terminate → Delete. Each shell gets a channel that carries its
//! authentication: an NTLM-sealed connection by default, or HTTP Basic on
//! listeners that allow Basic and unencrypted bodies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::ntlm::{self, Challenge, Credentials, SessionSecurity};
use super::{CommandOutcome, ShellProtocol, ShellSession};
use crate::config::{WinRmAuth, WinRmConfig};
use crate::domain::device::Device;
use crate::error::{ActionError, ActionErrorKind};

const NS_SOAP: &str = "http://www.w3.org/2003/05/soap-envelope";
const NS_ADDRESSING: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
const NS_WSMAN: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
const NS_SHELL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell";

const RESOURCE_CMD: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd";
const SIGNAL_TERMINATE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/terminate";
const ANONYMOUS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";

const SOAP_CONTENT_TYPE: &str = "application/soap+xml;charset=UTF-8";
const SESSION_ENCRYPTED: &str = "application/HTTP-SPNEGO-session-encrypted";
const BOUNDARY: &str = "Encrypted Boundary";
const ENCRYPTED_CONTENT_TYPE: &str = "multipart/encrypted;protocol=\"application/HTTP-SPNEGO-session-encrypted\";boundary=\"Encrypted Boundary\"";

/// WSManFault code for a Receive that timed out while the command is still running.
const RECEIVE_TIMED_OUT: &str = "2150858793";

#[derive(Debug, Clone, Copy)]
enum Action {
    Create,
    Delete,
    Command,
    Receive,
    Signal,
}

impl Action {
    fn uri(&self) -> &'static str {
        match self {
            Action::Create => "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create",
            Action::Delete => "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete",
            Action::Command => "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command",
            Action::Receive => "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive",
            Action::Signal => "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal",
        }
    }
}

enum ChannelAuth {
    Anonymous,
    Basic(String),
    Sealed(Mutex<SessionSecurity>),
}

/// The HTTP side of one open shell.
struct Channel {
    http: reqwest::Client,
    endpoint: String,
    auth: ChannelAuth,
}

impl Channel {
    async fn send(&self, envelope: String) -> Result<String, ActionError> {
        trace!(endpoint = %self.endpoint, body = %envelope, "WinRM request");

        let (status, body) = match &self.auth {
            ChannelAuth::Sealed(security) => {
                // held across the round trip: sequence numbers follow wire order
                let mut security = security.lock().await;
                let payload = seal_body(&mut security, envelope.into_bytes())?;
                let response = self
                    .http
                    .post(&self.endpoint)
                    .header(CONTENT_TYPE, ENCRYPTED_CONTENT_TYPE)
                    .body(payload)
                    .send()
                    .await
                    .map_err(classify)?;
                let status = response.status();
                let sealed = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|v| v.starts_with("multipart/encrypted"));
                let bytes = response.bytes().await.map_err(classify)?;
                let body = if sealed {
                    unseal_body(&mut security, &bytes)?
                } else {
                    String::from_utf8_lossy(&bytes).into_owned()
                };
                (status, body)
            }
            auth => {
                let mut request = self
                    .http
                    .post(&self.endpoint)
                    .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
                    .body(envelope);
                if let ChannelAuth::Basic(header) = auth {
                    request = request.header(AUTHORIZATION, header);
                }
                let response = request.send().await.map_err(classify)?;
                let status = response.status();
                (status, response.text().await.map_err(classify)?)
            }
        };
        trace!(endpoint = %self.endpoint, %status, body = %body, "WinRM response");

        if status == StatusCode::UNAUTHORIZED {
            return Err(ActionError::new(
                ActionErrorKind::AuthFailure,
                format!("{} rejected the supplied credentials", self.endpoint),
            ));
        }
        if !status.is_success() {
            let fault = parse_fault(&body).unwrap_or_else(|| body.trim().to_string());
            return Err(ActionError::transport(format!(
                "WinRM error (HTTP {}): {}",
                status, fault
            )));
        }
        Ok(body)
    }
}

pub struct WinRmProtocol {
    client: reqwest::Client,
    config: WinRmConfig,
    operation_timeout: String,
    channels: Mutex<HashMap<String, Arc<Channel>>>,
}

impl WinRmProtocol {
    pub fn new(config: &WinRmConfig) -> Result<Self> {
        let client = http_client(config)
            .build()
            .context("building WinRM HTTP client")?;

        Ok(Self {
            client,
            config: config.clone(),
            operation_timeout: format!("PT{}S", config.operation_timeout_secs),
            channels: Mutex::new(HashMap::new()),
        })
    }

    async fn connect(&self, endpoint: String, target: &Device) -> Result<Channel, ActionError> {
        // without a username there is nothing to authenticate with; the
        // listener's 401 reports that
        if target.username.is_empty() {
            return Ok(Channel {
                http: self.client.clone(),
                endpoint,
                auth: ChannelAuth::Anonymous,
            });
        }
        match self.config.auth {
            WinRmAuth::Basic => Ok(Channel {
                http: self.client.clone(),
                endpoint,
                auth: ChannelAuth::Basic(basic_auth(&target.username, &target.password)),
            }),
            WinRmAuth::Ntlm => {
                let creds = Credentials::new(&target.username, &target.password);
                self.ntlm_channel(endpoint, &creds).await
            }
        }
    }

    async fn ntlm_channel(&self, endpoint: String, creds: &Credentials) -> Result<Channel, ActionError> {
        // NTLM authenticates the TCP connection, so every shell keeps its own
        let http = http_client(&self.config)
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| ActionError::transport(error_chain(&e)))?;

        let (status, token) = negotiate_leg(&http, &endpoint, &ntlm::negotiate_message()).await?;
        let token = match (status, token) {
            (StatusCode::UNAUTHORIZED, Some(token)) => token,
            (StatusCode::UNAUTHORIZED, None) => {
                return Err(ActionError::new(
                    ActionErrorKind::AuthFailure,
                    format!("{} does not offer Negotiate authentication", endpoint),
                ))
            }
            (status, _) => {
                return Err(ActionError::transport(format!(
                    "unexpected HTTP {} to NTLM negotiation at {}",
                    status, endpoint
                )))
            }
        };
        let raw = STANDARD
            .decode(token.trim())
            .map_err(|e| ActionError::transport(format!("undecodable NTLM challenge: {}", e)))?;
        let challenge = Challenge::parse(&raw)?;

        let auth = ntlm::authenticate(
            creds,
            &challenge,
            rand::random(),
            rand::random(),
            ntlm::filetime_now(),
        )?;
        let (status, _) = negotiate_leg(&http, &endpoint, &auth.message).await?;
        if status == StatusCode::UNAUTHORIZED {
            return Err(ActionError::new(
                ActionErrorKind::AuthFailure,
                format!("{} rejected the supplied credentials", endpoint),
            ));
        }
        if !status.is_success() {
            return Err(ActionError::transport(format!(
                "unexpected HTTP {} to NTLM authentication at {}",
                status, endpoint
            )));
        }
        debug!(endpoint = %endpoint, user = %creds.user, "NTLM session established");

        Ok(Channel {
            http,
            endpoint,
            auth: ChannelAuth::Sealed(Mutex::new(auth.security)),
        })
    }

    async fn channel(&self, session: &ShellSession) -> Result<Arc<Channel>, ActionError> {
        self.channels
            .lock()
            .await
            .get(&session.shell_id)
            .cloned()
            .ok_or_else(|| {
                ActionError::transport(format!("no open WinRM channel for shell {}", session.shell_id))
            })
    }

    async fn send(&self, session: &ShellSession, envelope: String) -> Result<String, ActionError> {
        self.channel(session).await?.send(envelope).await
    }

    async fn start_command(&self, session: &ShellSession, command: &str) -> Result<String, ActionError> {
        let envelope = build_command(&session.endpoint, &session.shell_id, command, &self.operation_timeout);
        let response = self.send(session, envelope).await?;
        extract_attr_or_element(&response, "CommandId")
            .ok_or_else(|| ActionError::transport("WinRM Command response carried no CommandId"))
    }

    async fn collect_output(
        &self,
        session: &ShellSession,
        command_id: &str,
    ) -> Result<CommandOutcome, ActionError> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        loop {
            let envelope = build_receive(
                &session.endpoint,
                &session.shell_id,
                command_id,
                &self.operation_timeout,
            );
            let response = match self.send(session, envelope).await {
                Ok(r) => r,
                Err(e) if e.message.contains(RECEIVE_TIMED_OUT) => {
                    debug!(command_id, "receive timed out, command still running");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let chunk = parse_receive(&response);
            stdout.extend(chunk.stdout);
            stderr.extend(chunk.stderr);

            if chunk.done {
                return Ok(CommandOutcome {
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                    exit_code: chunk.exit_code.unwrap_or(-1),
                });
            }
        }
    }
}

#[async_trait]
impl ShellProtocol for WinRmProtocol {
    async fn open_session(&self, target: &Device) -> Result<ShellSession, ActionError> {
        let endpoint = self.config.endpoint(&target.ip_address);
        let channel = self.connect(endpoint.clone(), target).await?;

        let envelope = build_create_shell(&endpoint, &self.operation_timeout);
        let response = channel.send(envelope).await?;
        let shell_id = extract_attr_or_element(&response, "ShellId")
            .ok_or_else(|| ActionError::transport("WinRM Create response carried no ShellId"))?;

        self.channels
            .lock()
            .await
            .insert(shell_id.clone(), Arc::new(channel));
        Ok(ShellSession { shell_id, endpoint })
    }

    async fn run_command(
        &self,
        session: &ShellSession,
        command: &str,
    ) -> Result<CommandOutcome, ActionError> {
        let command_id = self.start_command(session, command).await?;
        let result = self.collect_output(session, &command_id).await;

        let envelope = build_signal(
            &session.endpoint,
            &session.shell_id,
            &command_id,
            &self.operation_timeout,
        );
        if let Err(e) = self.send(session, envelope).await {
            // a restarting host often drops the connection before this lands
            warn!(command_id = %command_id, error = %e, "failed to clean up remote command");
        }

        result
    }

    async fn close_session(&self, session: ShellSession) -> Result<(), ActionError> {
        let channel = self.channel(&session).await?;
        self.channels.lock().await.remove(&session.shell_id);
        let envelope = build_delete_shell(&session.endpoint, &session.shell_id, &self.operation_timeout);
        channel.send(envelope).await.map(|_| ())
    }
}

fn http_client(config: &WinRmConfig) -> reqwest::ClientBuilder {
    // leave headroom over the server-side operation timeout so a long
    // Receive faults on the server before the client gives up
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.operation_timeout_secs + 10))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
}

/// One empty-bodied handshake request. Returns the status and any
/// Negotiate/NTLM token the server answered with.
async fn negotiate_leg(
    http: &reqwest::Client,
    endpoint: &str,
    message: &[u8],
) -> Result<(StatusCode, Option<String>), ActionError> {
    let response = http
        .post(endpoint)
        .header(AUTHORIZATION, format!("Negotiate {}", STANDARD.encode(message)))
        .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
        .body("")
        .send()
        .await
        .map_err(classify)?;

    let status = response.status();
    let token = response
        .headers()
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| v.strip_prefix("Negotiate ").or_else(|| v.strip_prefix("NTLM ")))
        .map(str::to_string);
    // drain the body so the authenticated connection returns to the pool
    let _ = response.bytes().await;
    Ok((status, token))
}

fn basic_auth(username: &str, password: &str) -> String {
    let encoded = STANDARD.encode(format!("{}:{}", username, password));
    format!("Basic {}", encoded)
}

fn classify(e: reqwest::Error) -> ActionError {
    // a connect that never completes means the host is unreachable, not slow
    let kind = if e.is_connect() {
        ActionErrorKind::TransportError
    } else if e.is_timeout() {
        ActionErrorKind::Timeout
    } else {
        ActionErrorKind::TransportError
    };
    ActionError::new(kind, error_chain(&e))
}

/// `e` followed by each distinct cause, joined with ": ".
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

// ── Sealed bodies ──────────────────────────────────────────

/// Seal `message` into a multipart/encrypted body.
fn seal_body(security: &mut SessionSecurity, mut message: Vec<u8>) -> Result<Vec<u8>, ActionError> {
    let length = message.len();
    let signature = security.seal(&mut message)?;

    let mut body = format!(
        "--{b}\r\n\tContent-Type: {p}\r\n\tOriginalContent: type={t};Length={length}\r\n--{b}\r\n\tContent-Type: application/octet-stream\r\n",
        b = BOUNDARY,
        p = SESSION_ENCRYPTED,
        t = SOAP_CONTENT_TYPE,
        length = length,
    )
    .into_bytes();
    body.extend_from_slice(&(signature.len() as u32).to_le_bytes());
    body.extend_from_slice(&signature);
    body.extend_from_slice(&message);
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    Ok(body)
}

/// Inverse of [`seal_body`].
fn unseal_body(security: &mut SessionSecurity, body: &[u8]) -> Result<String, ActionError> {
    const PAYLOAD_MARKER: &[u8] = b"\tContent-Type: application/octet-stream\r\n";
    let malformed = |what: &str| ActionError::transport(format!("malformed encrypted WinRM body: {}", what));

    let start = find(body, PAYLOAD_MARKER).ok_or_else(|| malformed("no payload part"))? + PAYLOAD_MARKER.len();
    let length = find(&body[..start], b"Length=")
        .map(|at| {
            body[at + 7..start]
                .iter()
                .take_while(|b| b.is_ascii_digit())
                .fold(0usize, |n, b| n.saturating_mul(10).saturating_add(usize::from(b - b'0')))
        })
        .ok_or_else(|| malformed("no original length"))?;

    let payload = &body[start..];
    if payload.len() < 4 {
        return Err(malformed("truncated signature length"));
    }
    let signature_len = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    if payload.len() < 4 + signature_len + length {
        return Err(malformed("payload shorter than announced"));
    }
    let signature = &payload[4..4 + signature_len];
    let mut message = payload[4 + signature_len..4 + signature_len + length].to_vec();

    security.unseal(signature, &mut message)?;
    Ok(String::from_utf8_lossy(&message).into_owned())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

// ── Envelopes ──────────────────────────────────────────────

fn header(action: Action, endpoint: &str, shell_id: Option<&str>, timeout: &str) -> String {
    let selector = shell_id
        .map(|id| {
            format!(
                r#"
    <w:SelectorSet><w:Selector Name="ShellId">{}</w:Selector></w:SelectorSet>"#,
                id
            )
        })
        .unwrap_or_default();

    format!(
        r#"<s:Header>
    <a:To>{endpoint}</a:To>
    <a:ReplyTo><a:Address s:mustUnderstand="true">{anonymous}</a:Address></a:ReplyTo>
    <a:Action s:mustUnderstand="true">{action}</a:Action>
    <w:ResourceURI s:mustUnderstand="true">{resource}</w:ResourceURI>
    <a:MessageID>uuid:{message_id}</a:MessageID>
    <w:MaxEnvelopeSize s:mustUnderstand="true">153600</w:MaxEnvelopeSize>
    <w:Locale xml:lang="en-US" s:mustUnderstand="false"/>
    <w:OperationTimeout>{timeout}</w:OperationTimeout>{selector}
  </s:Header>"#,
        endpoint = xml_escape(endpoint),
        anonymous = ANONYMOUS,
        action = action.uri(),
        resource = RESOURCE_CMD,
        message_id = Uuid::new_v4().to_string().to_uppercase(),
        timeout = timeout,
        selector = selector,
    )
}

fn envelope(header: String, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="{soap}" xmlns:a="{addressing}" xmlns:w="{wsman}" xmlns:rsp="{shell}">
  {header}
  <s:Body>{body}</s:Body>
</s:Envelope>"#,
        soap = NS_SOAP,
        addressing = NS_ADDRESSING,
        wsman = NS_WSMAN,
        shell = NS_SHELL,
        header = header,
        body = body,
    )
}

fn build_create_shell(endpoint: &str, timeout: &str) -> String {
    let mut header = header(Action::Create, endpoint, None, timeout);
    header = header.replace(
        "</s:Header>",
        r#"<w:OptionSet>
      <w:Option Name="WINRS_NOPROFILE">FALSE</w:Option>
      <w:Option Name="WINRS_CODEPAGE">65001</w:Option>
    </w:OptionSet>
  </s:Header>"#,
    );
    envelope(
        header,
        r#"<rsp:Shell>
      <rsp:InputStreams>stdin</rsp:InputStreams>
      <rsp:OutputStreams>stdout stderr</rsp:OutputStreams>
    </rsp:Shell>"#,
    )
}

fn build_command(endpoint: &str, shell_id: &str, command: &str, timeout: &str) -> String {
    let mut header = header(Action::Command, endpoint, Some(shell_id), timeout);
    header = header.replace(
        "</s:Header>",
        r#"<w:OptionSet>
      <w:Option Name="WINRS_CONSOLEMODE_STDIN">TRUE</w:Option>
      <w:Option Name="WINRS_SKIP_CMD_SHELL">FALSE</w:Option>
    </w:OptionSet>
  </s:Header>"#,
    );
    let body = format!(
        "<rsp:CommandLine><rsp:Command>{}</rsp:Command></rsp:CommandLine>",
        xml_escape(command)
    );
    envelope(header, &body)
}

fn build_receive(endpoint: &str, shell_id: &str, command_id: &str, timeout: &str) -> String {
    let body = format!(
        r#"<rsp:Receive><rsp:DesiredStream CommandId="{}">stdout stderr</rsp:DesiredStream></rsp:Receive>"#,
        command_id
    );
    envelope(header(Action::Receive, endpoint, Some(shell_id), timeout), &body)
}

fn build_signal(endpoint: &str, shell_id: &str, command_id: &str, timeout: &str) -> String {
    let body = format!(
        r#"<rsp:Signal CommandId="{}"><rsp:Code>{}</rsp:Code></rsp:Signal>"#,
        command_id, SIGNAL_TERMINATE
    );
    envelope(header(Action::Signal, endpoint, Some(shell_id), timeout), &body)
}

fn build_delete_shell(endpoint: &str, shell_id: &str, timeout: &str) -> String {
    envelope(header(Action::Delete, endpoint, Some(shell_id), timeout), "")
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

// ── Response parsing ───────────────────────────────────────

#[derive(Debug, Default)]
struct ReceiveChunk {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    done: bool,
    exit_code: Option<i64>,
}

fn parse_receive(response: &str) -> ReceiveChunk {
    ReceiveChunk {
        stdout: decode_stream(response, "stdout"),
        stderr: decode_stream(response, "stderr"),
        done: response.contains("CommandState/Done"),
        exit_code: element_text(response, "ExitCode").and_then(|t| t.trim().parse().ok()),
    }
}

/// Concatenate the base64 payloads of every `<Stream Name="{name}">` element.
fn decode_stream(response: &str, name: &str) -> Vec<u8> {
    let marker = format!("Name=\"{}\"", name);
    let mut out = Vec::new();
    let mut rest = response;

    while let Some(pos) = rest.find(&marker) {
        let after = &rest[pos..];
        let Some(gt) = after.find('>') else { break };
        if after[..gt].ends_with('/') {
            rest = &after[gt + 1..];
            continue;
        }
        let body = &after[gt + 1..];
        let Some(end) = body.find("</") else { break };
        let encoded = body[..end].trim();
        if !encoded.is_empty() {
            match STANDARD.decode(encoded) {
                Ok(bytes) => out.extend(bytes),
                Err(e) => warn!(stream = name, error = %e, "undecodable WinRM stream chunk"),
            }
        }
        rest = &body[end..];
    }
    out
}

/// Text of the first `<prefix:{local}>` element, whatever the prefix.
fn element_text<'a>(xml: &'a str, local: &str) -> Option<&'a str> {
    let open = format!(":{}>", local);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find('<')?;
    Some(&xml[start..start + end])
}

/// `local="value"` attribute, falling back to a `<prefix:local>` element.
fn extract_attr_or_element(xml: &str, local: &str) -> Option<String> {
    let attr = format!("{}=\"", local);
    if let Some(start) = xml.find(&attr) {
        let rest = &xml[start + attr.len()..];
        if let Some(end) = rest.find('"') {
            return Some(rest[..end].to_string());
        }
    }
    element_text(xml, local)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn parse_fault(xml: &str) -> Option<String> {
    let code = xml
        .find("Code=\"")
        .and_then(|i| xml[i + 6..].split('"').next())
        .map(str::to_string);

    let text = element_text(xml, "Message")
        .or_else(|| {
            let start = xml.find("<s:Text")?;
            let gt = xml[start..].find('>')? + start + 1;
            let end = xml[gt..].find('<')?;
            Some(&xml[gt..gt + end])
        })
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    match (code, text) {
        (Some(code), Some(text)) => Some(format!("{} (code {})", text, code)),
        (None, Some(text)) => Some(text),
        (Some(code), None) => Some(format!("fault code {}", code)),
        (None, None) => None,
    }
}
