//! Backend client over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;
use vm_session_core::{
    BackendClient, ClientContext, ConfigError, SessionConfig, SessionId, StartedVm,
    traits::{InfoError, StartError, StopError},
};

use crate::StartResponse;

/// Backend client for the `/vm/*` REST routes.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: String,
}

impl HttpBackend {
    /// Create a client for the backend at `base_url`.
    ///
    /// # Errors
    /// Returns error if the URL is not an absolute http(s) URL or the HTTP
    /// client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let invalid = |value: String| ConfigError::InvalidValue {
            key: "backend_url",
            value,
        };

        let url = Url::parse(base_url).map_err(|e| invalid(format!("{base_url}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("{base_url}: unsupported scheme")));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| invalid(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create a client for the backend `config` points at from `ctx`.
    ///
    /// # Errors
    /// Returns error if the resulting base URL is invalid.
    pub fn from_config(config: &SessionConfig, ctx: &ClientContext) -> Result<Self, ConfigError> {
        Self::new(&config.backend_base(ctx), config.request_timeout())
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn route(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }
}

#[async_trait]
impl BackendClient for HttpBackend {
    async fn start(&self) -> Result<StartedVm, StartError> {
        let response = self
            .client
            .post(self.route("/vm/start"))
            .send()
            .await
            .map_err(|e| StartError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StartError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: StartResponse = response
            .json()
            .await
            .map_err(|e| StartError::InvalidResponse(e.to_string()))?;
        body.into_started()
    }

    async fn stop(&self, session_id: &SessionId) -> Result<(), StopError> {
        let response = self
            .client
            .post(self.route(&format!("/vm/{session_id}/stop")))
            .send()
            .await
            .map_err(|e| StopError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StopError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    fn stop_detached(&self, session_id: &SessionId) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(%session_id, "No async runtime, dropping detached stop");
            return;
        };

        let backend = self.clone();
        let session_id = session_id.clone();
        runtime.spawn(async move {
            if let Err(e) = backend.stop(&session_id).await {
                tracing::warn!(%session_id, "Detached stop failed: {e}");
            }
        });
    }

    async fn info(&self, session_id: &SessionId) -> Result<Value, InfoError> {
        let response = self
            .client
            .get(self.route(&format!("/vm/{session_id}/info")))
            .send()
            .await
            .map_err(|e| InfoError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InfoError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| InfoError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_base() {
        tokio_test::assert_err!(HttpBackend::new("ws://localhost:8080", Duration::from_secs(1)));
        tokio_test::assert_err!(HttpBackend::new("localhost:8080", Duration::from_secs(1)));
    }

    #[test]
    fn test_base_from_context() {
        let ctx = ClientContext::new(false, "localhost").with_port(3000);
        let backend = HttpBackend::from_config(&SessionConfig::default(), &ctx).unwrap();
        assert_eq!(backend.base_url(), "http://localhost:8080");
        assert_eq!(backend.route("/vm/start"), "http://localhost:8080/vm/start");
    }
}
