//! Transport layer for VM display streams.
//!
//! Provides:
//! - Endpoint resolution (direct + proxied candidates)
//! - WebSocket display adapter (feature: websocket)

pub mod resolver;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use resolver::{STREAM_PATH_PREFIX, resolve_endpoints};

#[cfg(feature = "websocket")]
pub use websocket::WsDisplayConnector;
