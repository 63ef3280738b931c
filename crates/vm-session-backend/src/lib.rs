//! HTTP client for the VM provisioning backend.
//!
//! Provides:
//! - `HttpBackend` - start/stop/info against the backend's REST routes
//! - Wire types for the start response

pub mod http;
pub mod types;

pub use http::HttpBackend;
pub use types::StartResponse;
