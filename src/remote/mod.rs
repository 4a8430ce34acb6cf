//! Remote actions: one shell command over a remote-shell protocol, or a
//! Wake-on-LAN broadcast. Stateless apart from its configuration.

pub mod ntlm;
pub mod wake;
pub mod winrm;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{WakeConfig, WinRmConfig};
use crate::domain::device::Device;
use crate::error::{ActionError, ActionErrorKind};

use self::winrm::WinRmProtocol;

/// Captured result of one remote command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

/// An open remote shell. Any connection state behind it stays with the
/// protocol that opened it.
#[derive(Debug, Clone)]
pub struct ShellSession {
    pub shell_id: String,
    pub endpoint: String,
}

/// Open/run/close capability of a remote-shell protocol.
///
/// `run_command` owns the command handle: it submits the command, collects
/// its output and releases the handle before returning, on success or
/// failure. Releasing the shell itself is the caller's job.
#[async_trait]
pub trait ShellProtocol: Send + Sync {
    async fn open_session(&self, target: &Device) -> Result<ShellSession, ActionError>;

    async fn run_command(
        &self,
        session: &ShellSession,
        command: &str,
    ) -> Result<CommandOutcome, ActionError>;

    async fn close_session(&self, session: ShellSession) -> Result<(), ActionError>;
}

/// The fixed power actions exposed to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    Restart,
    Shutdown,
}

impl PowerAction {
    pub fn cmdlet(&self) -> &'static str {
        match self {
            PowerAction::Restart => "Restart-Computer -Force",
            PowerAction::Shutdown => "Stop-Computer -Force",
        }
    }

    /// Command line handed to the remote command interpreter.
    pub fn command_line(&self) -> String {
        format!("powershell -Command {}", self.cmdlet())
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerAction::Restart => write!(f, "Restart"),
            PowerAction::Shutdown => write!(f, "Shutdown"),
        }
    }
}

#[derive(Clone)]
pub struct RemoteActionClient {
    shell: Arc<dyn ShellProtocol>,
    wake: WakeConfig,
}

impl RemoteActionClient {
    pub fn new(shell: Arc<dyn ShellProtocol>, wake: WakeConfig) -> Self {
        Self { shell, wake }
    }

    /// Client speaking WinRM for shell commands.
    pub fn winrm(winrm: &WinRmConfig, wake: WakeConfig) -> Result<Self> {
        let protocol = WinRmProtocol::new(winrm)?;
        Ok(Self::new(Arc::new(protocol), wake))
    }

    /// Run exactly one command on `target`. Single attempt, no retry.
    ///
    /// The shell is closed on every path once it has been opened. Success
    /// means exit code 0; anything else is an `ActionError` carrying stderr
    /// (or the transport text when nothing was captured).
    pub async fn execute_remote_command(
        &self,
        target: &Device,
        command: &str,
    ) -> Result<CommandOutcome, ActionError> {
        let session = self.shell.open_session(target).await?;
        debug!(ip = %target.ip_address, shell_id = %session.shell_id, "shell opened");

        let result = self.shell.run_command(&session, command).await;

        if let Err(e) = self.shell.close_session(session).await {
            warn!(ip = %target.ip_address, error = %e, "failed to close remote shell");
        }

        let outcome = result?;
        debug!(
            ip = %target.ip_address,
            exit_code = outcome.exit_code,
            stdout = %outcome.stdout.trim(),
            stderr = %outcome.stderr.trim(),
            "remote command finished"
        );

        if outcome.exit_code == 0 {
            Ok(outcome)
        } else {
            let stderr = outcome.stderr.trim();
            let message = if stderr.is_empty() {
                format!("command exited with status {}", outcome.exit_code)
            } else {
                stderr.to_string()
            };
            Err(ActionError::new(ActionErrorKind::NonZeroExit, message))
        }
    }

    /// Broadcast one wake datagram for `mac_address`.
    pub async fn send_wake_packet(&self, mac_address: &str) -> Result<(), ActionError> {
        wake::send_magic_packet(mac_address, &self.wake).await
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Failure, FakeShell};
    use super::*;

    fn target() -> Device {
        Device {
            nickname: "lab".to_string(),
            ip_address: "10.0.0.5".to_string(),
            username: "admin".to_string(),
            password: "pw".to_string(),
            mac_address: String::new(),
        }
    }

    fn client(shell: Arc<FakeShell>) -> RemoteActionClient {
        RemoteActionClient::new(shell, WakeConfig::default())
    }

    #[tokio::test]
    async fn zero_exit_is_success_and_shell_is_closed() {
        let shell = Arc::new(FakeShell::exiting(0));
        let outcome = client(shell.clone())
            .execute_remote_command(&target(), "hostname")
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, 0);

        let calls = shell.calls.lock().unwrap();
        assert_eq!(calls.commands, ["hostname"]);
        assert_eq!(calls.closed, calls.opened);
    }

    #[tokio::test]
    async fn nonzero_exit_carries_stderr() {
        let shell = Arc::new(FakeShell {
            stderr: "Access is denied.\r\n".to_string(),
            ..FakeShell::exiting(5)
        });
        let err = client(shell.clone())
            .execute_remote_command(&target(), PowerAction::Restart.command_line().as_str())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ActionErrorKind::NonZeroExit);
        assert_eq!(err.message, "Access is denied.");
        assert_eq!(shell.calls.lock().unwrap().closed.len(), 1);
    }

    #[tokio::test]
    async fn nonzero_exit_without_stderr_reports_status() {
        let shell = Arc::new(FakeShell::exiting(1));
        let err = client(shell)
            .execute_remote_command(&target(), "exit 1")
            .await
            .unwrap_err();
        assert_eq!(err.message, "command exited with status 1");
    }

    #[tokio::test]
    async fn failing_run_still_closes_shell() {
        let shell = Arc::new(FakeShell::failing(Failure::Run));
        let err = client(shell.clone())
            .execute_remote_command(&target(), "hostname")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ActionErrorKind::TransportError);
        assert_eq!(err.message, "connection reset by peer");

        let calls = shell.calls.lock().unwrap();
        assert_eq!(calls.opened.len(), 1);
        assert_eq!(calls.closed, calls.opened);
    }

    #[tokio::test]
    async fn failing_open_runs_nothing() {
        let shell = Arc::new(FakeShell::failing(Failure::Open));
        let err = client(shell.clone())
            .execute_remote_command(&target(), "hostname")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ActionErrorKind::TransportError);

        let calls = shell.calls.lock().unwrap();
        assert!(calls.commands.is_empty());
        assert!(calls.closed.is_empty());
    }

    #[test]
    fn power_actions_wrap_powershell() {
        assert_eq!(
            PowerAction::Restart.command_line(),
            "powershell -Command Restart-Computer -Force"
        );
        assert_eq!(
            PowerAction::Shutdown.command_line(),
            "powershell -Command Stop-Computer -Force"
        );
    }
}
