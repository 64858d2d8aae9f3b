//! Client-held credentials: access token, CSRF token and refresh token.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ApiError;

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub csrf_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credentials")
            .field("access_token", &redact(&self.access_token))
            .field("csrf_token", &redact(&self.csrf_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}

/// Persistent storage for [`Credentials`].
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Credentials, ApiError>;
    fn save(&self, credentials: &Credentials) -> Result<(), ApiError>;
    fn clear(&self) -> Result<(), ApiError>;
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<Credentials>,
}

impl MemoryCredentialStore {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            inner: Mutex::new(credentials),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Credentials, ApiError> {
        Ok(self.inner.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, credentials: &Credentials) -> Result<(), ApiError> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = credentials.clone();
        Ok(())
    }

    fn clear(&self) -> Result<(), ApiError> {
        self.save(&Credentials::default())
    }
}

/// Stores credentials as a JSON document on disk.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn storage_error(path: &Path, e: impl fmt::Display) -> ApiError {
    ApiError::Storage(format!("{}: {e}", path.display()))
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Credentials, ApiError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| storage_error(&self.path, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No stored credentials");
                Ok(Credentials::default())
            }
            Err(e) => Err(storage_error(&self.path, e)),
        }
    }

    fn save(&self, credentials: &Credentials) -> Result<(), ApiError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| storage_error(parent, e))?;
        }
        let raw =
            serde_json::to_string_pretty(credentials).map_err(|e| storage_error(&self.path, e))?;
        std::fs::write(&self.path, raw).map_err(|e| storage_error(&self.path, e))
    }

    fn clear(&self) -> Result<(), ApiError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Cleared stored credentials");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error(&self.path, e)),
        }
    }
}
