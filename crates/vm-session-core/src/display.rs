//! Display surface and connection handle shared by adapters and the controller.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::traits::ConnectError;

/// Viewer options applied to every connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayOptions {
    /// Scale the remote framebuffer to the container.
    pub scale_viewport: bool,
    /// Ask the remote session to resize to the container.
    pub resize_session: bool,
}

impl DisplayOptions {
    /// Fill-the-container policy.
    pub const FIT: Self = Self {
        scale_viewport: true,
        resize_session: true,
    };
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self::FIT
    }
}

/// Connection-state transition reported by a display adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DisplayEvent {
    /// Transport is being established.
    Connecting,
    /// Stream is live.
    Connected,
    /// Stream ended or could not be established.
    Disconnected { reason: String },
    /// Non-fatal or pre-disconnect error detail.
    Error { detail: String },
}

/// Most recent framebuffer chunks a container keeps.
pub const MAX_BUFFERED_FRAMES: usize = 64;

/// Receiver for a handle's connection-state transitions.
pub type DisplayEvents = mpsc::UnboundedReceiver<DisplayEvent>;

#[derive(Debug, Default)]
struct Surface {
    owner: Option<Uuid>,
    options: Option<DisplayOptions>,
    frames: VecDeque<Bytes>,
    bytes_received: usize,
    generation: u64,
}

/// Rendering container for the remote display.
///
/// Clones share the same surface. Only the handle that claimed the surface
/// may write to it; `clear` releases ownership so the next `connect` starts
/// from an empty container.
#[derive(Debug, Clone, Default)]
pub struct DisplayContainer {
    inner: Arc<RwLock<Surface>>,
}

impl DisplayContainer {
    /// Create an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all rendered content and release ownership.
    pub fn clear(&self) {
        let mut surface = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        surface.owner = None;
        surface.options = None;
        surface.frames.clear();
        surface.bytes_received = 0;
        surface.generation += 1;
    }

    /// Bind the container to a handle and apply its viewer options.
    pub fn claim(&self, owner: Uuid, options: DisplayOptions) {
        let mut surface = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        surface.owner = Some(owner);
        surface.options = Some(options);
    }

    /// Re-apply viewer options if `owner` still holds the surface.
    pub fn apply_options(&self, owner: Uuid, options: DisplayOptions) {
        let mut surface = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if surface.owner == Some(owner) {
            surface.options = Some(options);
        }
    }

    /// Append a framebuffer chunk written by `owner`.
    ///
    /// Only the last `MAX_BUFFERED_FRAMES` chunks are kept; `bytes_received`
    /// still counts everything. Returns `false` and discards the data when
    /// `owner` no longer holds the surface.
    pub fn push_frame(&self, owner: Uuid, frame: Bytes) -> bool {
        let mut surface = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if surface.owner != Some(owner) {
            return false;
        }
        surface.bytes_received = surface.bytes_received.saturating_add(frame.len());
        if surface.frames.len() == MAX_BUFFERED_FRAMES {
            surface.frames.pop_front();
        }
        surface.frames.push_back(frame);
        true
    }

    /// Current owner, if any.
    #[must_use]
    pub fn owner(&self) -> Option<Uuid> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).owner
    }

    /// Options applied by the current owner.
    #[must_use]
    pub fn options(&self) -> Option<DisplayOptions> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).options
    }

    /// Snapshot of the buffered chunks, oldest first.
    #[must_use]
    pub fn frames(&self) -> Vec<Bytes> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .frames
            .iter()
            .cloned()
            .collect()
    }

    /// Total bytes received since the last clear.
    #[must_use]
    pub fn bytes_received(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .bytes_received
    }

    /// Number of times the container has been cleared.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }
}

/// Adapter-side counterpart of a `ConnectionHandle`.
#[derive(Debug)]
pub struct HandleControl {
    /// Fires once when the controller asks for a disconnect.
    pub shutdown: oneshot::Receiver<()>,
    /// Client-to-server data queued through `ConnectionHandle::send`.
    pub outbound: mpsc::UnboundedReceiver<Bytes>,
}

/// Live binding between a display adapter and one endpoint.
///
/// Holders may request a disconnect or queue outbound data; the protocol
/// state itself stays inside the adapter.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    endpoint: String,
    options: DisplayOptions,
    shutdown: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    outbound: mpsc::UnboundedSender<Bytes>,
}

impl ConnectionHandle {
    /// Create a handle plus the control half for the adapter driving it.
    #[must_use]
    pub fn pair(endpoint: impl Into<String>, options: DisplayOptions) -> (Self, HandleControl) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let handle = Self {
            id: Uuid::new_v4(),
            endpoint: endpoint.into(),
            options,
            shutdown: Arc::new(Mutex::new(Some(shutdown_tx))),
            outbound: outbound_tx,
        };

        let control = HandleControl {
            shutdown: shutdown_rx,
            outbound: outbound_rx,
        };

        (handle, control)
    }

    /// Handle identifier, also used as the container owner.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Endpoint URL this handle is bound to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Viewer options applied to this handle.
    #[must_use]
    pub const fn options(&self) -> DisplayOptions {
        self.options
    }

    /// Request a disconnect.
    ///
    /// Idempotent; returns `true` only for the call that initiated it.
    pub fn disconnect(&self) -> bool {
        let tx = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match tx {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    /// Whether a disconnect was requested or the adapter went away.
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_none_or(oneshot::Sender::is_closed)
    }

    /// Queue data for the remote end.
    ///
    /// # Errors
    /// Returns error if the adapter has shut the connection down.
    pub fn send(&self, data: Bytes) -> Result<(), ConnectError> {
        if self.is_disconnected() {
            return Err(ConnectError::HandleClosed);
        }
        self.outbound
            .send(data)
            .map_err(|_| ConnectError::HandleClosed)
    }
}
