//! Core types and traits for backend, display and credential seams.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{ConnectionHandle, DisplayContainer, DisplayEvents, DisplayOptions};

/// Backend-issued session identifier.
///
/// Opaque to the client; unique per provisioned VM.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a backend-issued identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session requested, or the last attempt failed.
    Idle,
    /// Waiting for the backend to provision a VM.
    Starting,
    /// Trying stream endpoints.
    Connecting,
    /// Display stream is live.
    Connected,
    /// Terminal.
    Ended,
}

impl SessionState {
    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ended)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Snapshot of the session owned by a controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Backend-issued identifier.
    pub id: SessionId,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Endpoint the stream is bound to, once connected.
    pub endpoint: Option<String>,
    /// A stop request was issued for this session.
    pub stop_issued: bool,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
}

/// How a stream endpoint is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Straight to the backend's well-known port.
    Direct,
    /// Through the origin's reverse proxy.
    Proxied,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Proxied => f.write_str("proxied"),
        }
    }
}

/// One possible address for a session's display stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointCandidate {
    pub kind: TransportKind,
    pub url: String,
}

impl EndpointCandidate {
    /// Candidate URL with the credential attached as a percent-encoded
    /// `token` query parameter.
    #[must_use]
    pub fn url_with_token(&self, token: &str) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!(
            "{}{separator}token={}",
            self.url,
            urlencoding::encode(token)
        )
    }
}

/// Source of a termination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopTrigger {
    /// Caller asked to stop.
    Explicit,
    /// Client is unloading; the stop must not be awaited.
    Unload,
    /// Owner went away.
    Teardown,
    /// The attempt gave up; the provisioned VM must not leak.
    Abandoned,
}

impl StopTrigger {
    /// Whether the stop request should use fire-and-forget delivery.
    #[must_use]
    pub const fn is_detached(self) -> bool {
        matches!(self, Self::Unload | Self::Teardown)
    }
}

/// Result of a successful backend start call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartedVm {
    pub session_id: SessionId,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Backend start error.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("Backend unreachable: {0}")]
    Unreachable(String),
    #[error("Backend rejected start ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("Invalid start response: {0}")]
    InvalidResponse(String),
    #[error("VM {session_id} failed to start")]
    NotRunning {
        session_id: SessionId,
        logs: Option<String>,
    },
}

/// Backend stop error. Callers log and drop it.
#[derive(Debug, Error)]
pub enum StopError {
    #[error("Backend unreachable: {0}")]
    Unreachable(String),
    #[error("Backend rejected stop ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Backend info error.
#[derive(Debug, Error)]
pub enum InfoError {
    #[error("Backend unreachable: {0}")]
    Unreachable(String),
    #[error("Backend rejected info ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("Invalid info response: {0}")]
    InvalidResponse(String),
}

/// Failure of one endpoint candidate.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
    #[error("Endpoint unavailable: {0}")]
    Unavailable(String),
    #[error("Connection handle closed")]
    HandleClosed,
}

/// Trait for VM provisioning backends.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Provision a VM and return its session identifier.
    async fn start(&self) -> Result<StartedVm, StartError>;

    /// Stop a VM and wait for the backend's answer.
    async fn stop(&self, session_id: &SessionId) -> Result<(), StopError>;

    /// Dispatch a stop without waiting for, or reporting, the outcome.
    ///
    /// Must not block and must be callable from `Drop`.
    fn stop_detached(&self, session_id: &SessionId);

    /// Backend diagnostics for a VM.
    async fn info(&self, session_id: &SessionId) -> Result<Value, InfoError>;
}

/// Trait for display-client adapters.
pub trait DisplayConnector: Send + Sync {
    /// Bind `container` to the stream at `url`.
    ///
    /// The call returns immediately; connection progress arrives on the
    /// returned event receiver. An `Err` means the endpoint is unusable.
    fn connect(
        &self,
        container: &DisplayContainer,
        url: &str,
        options: DisplayOptions,
    ) -> Result<(ConnectionHandle, DisplayEvents), ConnectError>;
}

/// Read-only access to a client-persisted credential.
pub trait CredentialStore: Send + Sync {
    /// Current credential, if one is stored.
    fn load(&self) -> Option<String>;
}
