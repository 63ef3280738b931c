//! Credential stores.

use std::sync::{PoisonError, RwLock};

use vm_session_core::CredentialStore;

/// In-memory credential.
///
/// Useful for tests and for clients that receive the token out of band.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    token: RwLock<Option<String>>,
}

impl MemoryCredentials {
    /// Create a store holding `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    /// Create an empty store.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Replace the stored token.
    pub fn set(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    /// Remove the stored token.
    pub fn clear(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl CredentialStore for MemoryCredentials {
    fn load(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|t| !t.is_empty())
    }
}

#[cfg(feature = "file-credentials")]
pub use file::FileCredentials;

#[cfg(feature = "file-credentials")]
mod file {
    use std::path::{Path, PathBuf};

    use vm_session_core::CredentialStore;

    /// Credential persisted as a single line in a file.
    ///
    /// The file is read on every `load`, so an updated token is picked up
    /// by the next connection attempt.
    #[derive(Debug, Clone)]
    pub struct FileCredentials {
        path: PathBuf,
    }

    impl FileCredentials {
        /// Read the credential from `path`.
        #[must_use]
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self { path: path.into() }
        }

        /// `<config dir>/vm-session/auth-token`, if a config dir exists.
        #[must_use]
        pub fn default_path() -> Option<PathBuf> {
            dirs::config_dir().map(|dir| dir.join("vm-session").join("auth-token"))
        }

        #[must_use]
        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl CredentialStore for FileCredentials {
        fn load(&self) -> Option<String> {
            match std::fs::read_to_string(&self.path) {
                Ok(raw) => {
                    let token = raw.trim();
                    (!token.is_empty()).then(|| token.to_string())
                }
                Err(e) => {
                    tracing::debug!(path = %self.path.display(), "No credential: {e}");
                    None
                }
            }
        }
    }
}
