//! Error taxonomy shared by the registry, the remote action client and the
//! API surfaces.

use std::fmt;

use async_graphql::Enum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a remote action (shell command or wake packet) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Enum)]
#[serde(rename_all = "snake_case")]
pub enum ActionErrorKind {
    AuthFailure,
    Timeout,
    TransportError,
    NonZeroExit,
    InvalidAddress,
    NetworkError,
}

impl fmt::Display for ActionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionErrorKind::AuthFailure => "authentication failure",
            ActionErrorKind::Timeout => "timeout",
            ActionErrorKind::TransportError => "transport error",
            ActionErrorKind::NonZeroExit => "non-zero exit",
            ActionErrorKind::InvalidAddress => "invalid address",
            ActionErrorKind::NetworkError => "network error",
        };
        f.write_str(name)
    }
}

/// A failed remote action. `message` is the captured stderr, or the
/// transport text when nothing was captured.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ActionError {
    pub kind: ActionErrorKind,
    pub message: String,
}

impl ActionError {
    pub fn new(kind: ActionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ActionErrorKind::TransportError, message)
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{0}")]
    Validation(String),

    #[error("device index {index} is out of range (registry holds {len})")]
    Index { index: usize, len: usize },

    #[error("no device selected")]
    Selection,

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error("{path}: {message}")]
    Io { path: String, message: String },

    #[error("malformed registry file {path}: {message}")]
    Parse { path: String, message: String },
}

impl RegistryError {
    /// Short machine-readable name, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::Validation(_) => "validation",
            RegistryError::Index { .. } => "index",
            RegistryError::Selection => "selection",
            RegistryError::Action(_) => "action",
            RegistryError::Io { .. } => "io",
            RegistryError::Parse { .. } => "parse",
        }
    }

    /// Validation and selection problems are warnings: registry state is
    /// untouched and the operator only needs to fix the input.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            RegistryError::Validation(_) | RegistryError::Selection | RegistryError::Index { .. }
        )
    }
}
