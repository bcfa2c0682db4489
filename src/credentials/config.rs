//! Secret-store configuration.
//!
//! Selects the backend holding the certificate passphrase and where in it
//! the passphrase lives.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::keyring::KeyringSecretStore;
use super::pass::PassSecretStore;
use super::{SecretLookup, SecretStore};

/// Which secret-store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretStoreBackend {
    /// Password-store (pass).
    Pass,
    /// Platform keyring.
    Keyring,
}

/// Configuration for the passphrase secret store.
///
/// # Example
///
/// ```toml
/// backend = "keyring"
/// service = "ccp"
/// user = "svc-billing"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretStoreConfig {
    pub backend: SecretStoreBackend,
    pub service: String,
    pub user: String,

    /// Entry prefix for the pass backend.
    #[serde(default)]
    pub prefix: Option<String>,
}

impl SecretStoreConfig {
    /// The service/user pair to look up.
    pub fn lookup(&self) -> SecretLookup {
        SecretLookup::new(&self.service, &self.user)
    }

    /// Build the secret store described by this configuration.
    pub fn build(&self) -> Arc<dyn SecretStore> {
        match self.backend {
            SecretStoreBackend::Pass => {
                let store = match &self.prefix {
                    Some(prefix) => PassSecretStore::new().with_prefix(prefix),
                    None => PassSecretStore::new(),
                };
                Arc::new(store)
            }
            SecretStoreBackend::Keyring => Arc::new(KeyringSecretStore::new()),
        }
    }
}
