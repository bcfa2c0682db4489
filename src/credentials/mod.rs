//! Secret-store abstraction for certificate passphrases.
//!
//! The local-path identity source keeps its certificate on disk and the
//! passphrase in an external secret store, addressed by a service name and a
//! user name:
//!
//! ```toml
//! [identity.secret_store]
//! backend = "pass"
//! service = "ccp"
//! user = "svc-billing"
//! ```

mod config;
mod keyring;
mod pass;

pub use config::{SecretStoreBackend, SecretStoreConfig};
pub use keyring::KeyringSecretStore;
pub use pass::PassSecretStore;

use async_trait::async_trait;
use secrecy::SecretString;

/// Address of a passphrase inside a secret store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretLookup {
    pub service: String,
    pub user: String,
}

impl SecretLookup {
    pub fn new(service: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            user: user.into(),
        }
    }
}

/// Errors raised by a secret-store backend.
#[derive(Debug, thiserror::Error)]
pub enum SecretStoreError {
    /// The backend's client capability is missing (binary not installed,
    /// feature not compiled in, no platform store).
    #[error("secret store {backend} is unavailable: {reason}")]
    Unavailable {
        backend: &'static str,
        reason: String,
    },

    /// The backend is present but the lookup failed.
    #[error("secret store {backend} lookup failed: {reason}")]
    Backend {
        backend: &'static str,
        reason: String,
    },
}

/// A read-only store of passphrases.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Retrieve the secret stored for `lookup`.
    ///
    /// Returns `Ok(None)` if the store has no entry for it.
    async fn get(&self, lookup: &SecretLookup) -> Result<Option<SecretString>, SecretStoreError>;

    /// Backend name for diagnostics.
    fn name(&self) -> &'static str;
}
