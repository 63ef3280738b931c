//! Session tunables.

use std::{str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ClientContext;

/// Well-known backend port.
pub const DEFAULT_BACKEND_PORT: u16 = 8080;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("Invalid origin: {0}")]
    InvalidOrigin(String),
}

/// Session controller and backend client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Explicit backend base URL. Derived from the client context when unset.
    pub backend_url: Option<String>,
    /// Backend port for direct stream endpoints and the derived base URL.
    pub backend_port: u16,
    /// Maximum time spent establishing a display stream.
    pub retry_budget_ms: u64,
    /// Pause after every candidate has failed once.
    pub retry_backoff_ms: u64,
    /// Timeout for individual backend requests.
    pub request_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            backend_port: DEFAULT_BACKEND_PORT,
            retry_budget_ms: 20_000,
            retry_backoff_ms: 800,
            request_timeout_ms: 30_000,
        }
    }
}

impl SessionConfig {
    /// Defaults overlaid with `VM_SESSION_*` environment variables.
    ///
    /// # Errors
    /// Returns error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary key lookup.
    ///
    /// # Errors
    /// Returns error if a present value cannot be parsed.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("VM_SESSION_BACKEND_URL").filter(|u| !u.trim().is_empty()) {
            self.backend_url = Some(url.trim().trim_end_matches('/').to_string());
        }
        if let Some(port) = parse_var(&lookup, "VM_SESSION_BACKEND_PORT")? {
            self.backend_port = port;
        }
        if let Some(budget) = parse_var(&lookup, "VM_SESSION_RETRY_BUDGET_MS")? {
            self.retry_budget_ms = budget;
        }
        if let Some(backoff) = parse_var(&lookup, "VM_SESSION_RETRY_BACKOFF_MS")? {
            self.retry_backoff_ms = backoff;
        }
        if let Some(timeout) = parse_var(&lookup, "VM_SESSION_REQUEST_TIMEOUT_MS")? {
            self.request_timeout_ms = timeout;
        }
        Ok(self)
    }

    /// Backend base URL for `ctx`.
    #[must_use]
    pub fn backend_base(&self, ctx: &ClientContext) -> String {
        self.backend_url.clone().unwrap_or_else(|| {
            format!(
                "{}://{}:{}",
                ctx.http_scheme(),
                ctx.hostname,
                self.backend_port
            )
        })
    }

    #[must_use]
    pub const fn retry_budget(&self) -> Duration {
        Duration::from_millis(self.retry_budget_ms)
    }

    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}
