//! Password-store (pass) secret backend.
//!
//! The passphrase for `service`/`user` lives in the pass entry
//! `<prefix>/<service>/<user>`; its first line is the passphrase.

use std::io::ErrorKind;
use std::process::Command;

use async_trait::async_trait;
use secrecy::SecretString;
use zeroize::Zeroizing;

use super::{SecretLookup, SecretStore, SecretStoreError};

const BACKEND: &str = "pass";

/// Secret store backed by password-store (pass).
#[derive(Debug, Clone, Default)]
pub struct PassSecretStore {
    prefix: Option<String>,
    program: Option<String>,
}

impl PassSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place entries under `prefix` (e.g. `"vault/certs"`).
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Run a different executable instead of `pass`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = Some(program.into());
        self
    }

    /// The pass entry path for a lookup.
    pub fn entry_path(&self, lookup: &SecretLookup) -> String {
        let prefix = self
            .prefix
            .as_deref()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty());

        match prefix {
            Some(prefix) => format!("{prefix}/{}/{}", lookup.service, lookup.user),
            None => format!("{}/{}", lookup.service, lookup.user),
        }
    }

    fn read_entry(&self, path: &str) -> Result<Option<SecretString>, SecretStoreError> {
        let program = self.program.as_deref().unwrap_or("pass");
        let output = match Command::new(program).arg("show").arg(path).output() {
            Ok(output) => output,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(SecretStoreError::Unavailable {
                    backend: BACKEND,
                    reason: format!("`{program}` is not installed"),
                });
            }
            Err(err) => {
                return Err(SecretStoreError::Backend {
                    backend: BACKEND,
                    reason: format!("failed to run `{program}`: {err}"),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("is not in the password store") {
                return Ok(None);
            }
            return Err(SecretStoreError::Backend {
                backend: BACKEND,
                reason: format!("pass show failed: {}", stderr.trim()),
            });
        }

        let content = Zeroizing::new(String::from_utf8(output.stdout).map_err(|_| {
            SecretStoreError::Backend {
                backend: BACKEND,
                reason: "invalid UTF-8 in pass output".to_string(),
            }
        })?);

        Ok(first_line(&content).map(|line| SecretString::from(line.to_string())))
    }
}

/// First line of a pass entry, if non-empty.
fn first_line(content: &str) -> Option<&str> {
    content
        .lines()
        .next()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
}

#[async_trait]
impl SecretStore for PassSecretStore {
    async fn get(&self, lookup: &SecretLookup) -> Result<Option<SecretString>, SecretStoreError> {
        let path = self.entry_path(lookup);
        tracing::debug!(entry = %path, "Reading passphrase from pass");
        self.read_entry(&path)
    }

    fn name(&self) -> &'static str {
        BACKEND
    }
}
