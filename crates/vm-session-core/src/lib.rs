//! Core abstractions for VM display session management.
//!
//! This crate provides the fundamental building blocks:
//! - `ClientContext` - Scheme and host the client is running under
//! - `DisplayContainer` / `ConnectionHandle` - Display surface and live stream binding
//! - `SessionEvent` / `EventStore` - Broadcast + history of lifecycle events
//! - `SessionConfig` - Tunables with environment overrides
//! - Backend, display and credential traits

pub mod config;
pub mod context;
pub mod display;
pub mod event;
pub mod event_store;
pub mod traits;

pub use config::{ConfigError, SessionConfig};
pub use context::ClientContext;
pub use display::{
    ConnectionHandle, DisplayContainer, DisplayEvent, DisplayEvents, DisplayOptions,
    HandleControl, MAX_BUFFERED_FRAMES,
};
pub use event::SessionEvent;
pub use event_store::EventStore;
pub use traits::{
    BackendClient, CredentialStore, DisplayConnector, EndpointCandidate, Session, SessionId,
    SessionState, StartedVm, StopTrigger, TransportKind,
};
