//! Client network context for endpoint derivation.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::ConfigError;

/// Network context the client is running under.
///
/// Mirrors what a browser exposes as `location`: whether the page was
/// loaded securely, the bare host name, and the origin port if any.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientContext {
    /// Page or origin was loaded over a secure transport.
    pub secure: bool,

    /// Host name without port.
    pub hostname: String,

    /// Explicit origin port, `None` when the scheme default is in use.
    #[serde(default)]
    pub port: Option<u16>,
}

impl ClientContext {
    /// Create a context for a host on its scheme's default port.
    #[must_use]
    pub fn new(secure: bool, hostname: impl Into<String>) -> Self {
        Self {
            secure,
            hostname: hostname.into(),
            port: None,
        }
    }

    /// Set an explicit origin port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Derive a context from an origin URL such as `https://vm.example.com`.
    ///
    /// # Errors
    /// Returns error if the URL cannot be parsed, has no host, or uses a
    /// scheme other than `http`, `https`, `ws` or `wss`.
    pub fn from_url(origin: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(origin)
            .map_err(|e| ConfigError::InvalidOrigin(format!("{origin}: {e}")))?;

        let secure = match url.scheme() {
            "https" | "wss" => true,
            "http" | "ws" => false,
            other => {
                return Err(ConfigError::InvalidOrigin(format!(
                    "{origin}: unsupported scheme {other}"
                )));
            }
        };

        let hostname = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::InvalidOrigin(format!("{origin}: missing host")))?;

        Ok(Self {
            secure,
            hostname: hostname.to_string(),
            port: url.port(),
        })
    }

    /// Host including the origin port, as in `location.host`.
    #[must_use]
    pub fn host(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{port}", self.hostname),
            None => self.hostname.clone(),
        }
    }

    /// Websocket scheme matching the page's security.
    #[must_use]
    pub const fn ws_scheme(&self) -> &'static str {
        if self.secure { "wss" } else { "ws" }
    }

    /// HTTP scheme matching the page's security.
    #[must_use]
    pub const fn http_scheme(&self) -> &'static str {
        if self.secure { "https" } else { "http" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_secure_origin() {
        let ctx = ClientContext::from_url("https://vm.example.com").unwrap();
        assert!(ctx.secure);
        assert_eq!(ctx.hostname, "vm.example.com");
        assert_eq!(ctx.port, None);
        assert_eq!(ctx.ws_scheme(), "wss");
        assert_eq!(ctx.http_scheme(), "https");
    }

    #[test]
    fn test_from_origin_with_port() {
        let ctx = ClientContext::from_url("http://localhost:3000/some/page").unwrap();
        assert!(!ctx.secure);
        assert_eq!(ctx.host(), "localhost:3000");
        assert_eq!(ctx.ws_scheme(), "ws");
    }

    #[test]
    fn test_default_port_is_dropped() {
        let ctx = ClientContext::from_url("https://vm.example.com:443").unwrap();
        assert_eq!(ctx.port, None);
        assert_eq!(ctx.host(), "vm.example.com");
    }

    #[test]
    fn test_rejects_unknown_scheme() {
        let err = ClientContext::from_url("ftp://files.example.com").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOrigin(_)));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(ClientContext::from_url("not a url").is_err());
    }
}
