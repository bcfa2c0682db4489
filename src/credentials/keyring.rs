//! OS keyring secret backend.
//!
//! Compiled against the `keyring` crate when the `keyring` feature is
//! enabled. Without it the backend still exists so configuration stays
//! portable, but every lookup reports the store as unavailable.

use async_trait::async_trait;
use secrecy::SecretString;

use super::{SecretLookup, SecretStore, SecretStoreError};

const BACKEND: &str = "keyring";

/// Secret store backed by the platform keyring.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyringSecretStore;

impl KeyringSecretStore {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "keyring")]
fn read_password(lookup: &SecretLookup) -> Result<Option<SecretString>, SecretStoreError> {
    use ::keyring::{Entry, Error};

    let unavailable = |err: Error| SecretStoreError::Unavailable {
        backend: BACKEND,
        reason: err.to_string(),
    };

    let entry = Entry::new(&lookup.service, &lookup.user).map_err(unavailable)?;
    match entry.get_password() {
        Ok(password) => Ok(Some(SecretString::from(password))),
        Err(Error::NoEntry) => Ok(None),
        Err(err @ (Error::NoStorageAccess(_) | Error::PlatformFailure(_))) => Err(unavailable(err)),
        Err(err) => Err(SecretStoreError::Backend {
            backend: BACKEND,
            reason: err.to_string(),
        }),
    }
}

#[cfg(not(feature = "keyring"))]
fn read_password(_lookup: &SecretLookup) -> Result<Option<SecretString>, SecretStoreError> {
    Err(SecretStoreError::Unavailable {
        backend: BACKEND,
        reason: "ccp-client was built without the `keyring` feature".to_string(),
    })
}

#[async_trait]
impl SecretStore for KeyringSecretStore {
    async fn get(&self, lookup: &SecretLookup) -> Result<Option<SecretString>, SecretStoreError> {
        tracing::debug!(service = %lookup.service, user = %lookup.user, "Reading passphrase from keyring");
        read_password(lookup)
    }

    fn name(&self) -> &'static str {
        BACKEND
    }
}
