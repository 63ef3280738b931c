//! Wire types for backend responses.

use serde::{Deserialize, Serialize};
use vm_session_core::{SessionId, StartedVm, traits::StartError};

/// Body of a `POST /vm/start` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResponse {
    #[serde(rename = "VMID", default)]
    pub vm_id: String,
    #[serde(rename = "containerId", default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default = "default_running")]
    pub running: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
}

const fn default_running() -> bool {
    true
}

impl StartResponse {
    /// Validate the response and extract the started VM.
    ///
    /// # Errors
    /// Returns error if the identifier is missing or the VM is not running.
    pub fn into_started(self) -> Result<StartedVm, StartError> {
        let id = self.vm_id.trim();
        if id.is_empty() {
            return Err(StartError::InvalidResponse("missing VMID".to_string()));
        }
        let session_id = SessionId::new(id);

        if !self.running {
            return Err(StartError::NotRunning {
                session_id,
                logs: self.logs.filter(|l| !l.is_empty()),
            });
        }

        Ok(StartedVm {
            session_id,
            container_id: self.container_id,
            message: self.message,
        })
    }
}
