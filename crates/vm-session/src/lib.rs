//! Session lifecycle and display connection management for remote VMs.
//!
//! Provides:
//! - `SessionController` - Start a VM, attach its display, stop it exactly once
//! - Credential stores (memory, file)

pub mod controller;
pub mod credentials;

pub use controller::{SessionController, SessionError, StartOutcome};
pub use credentials::MemoryCredentials;

#[cfg(feature = "file-credentials")]
pub use credentials::FileCredentials;
