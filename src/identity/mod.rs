//! TLS client identity provisioning.
//!
//! Certificate material reaches the client in one of three ways:
//!
//! - **Local path**: certificate (and optional key) files on disk, with the
//!   passphrase held in a [`SecretStore`].
//! - **Environment paths**: variables naming the certificate file, the
//!   passphrase and optionally the key file.
//! - **Environment content**: variables holding the PEM certificate, the
//!   passphrase and optionally the PEM key. The PEM text is materialised in a
//!   private temporary directory for the duration of the load only.
//!
//! Every source ends in the same loader, and the resulting [`TlsIdentity`]
//! keeps only the configured TLS client. The passphrase is dropped before
//! `provision` returns.

mod pem;
mod scratch;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::Client;
use secrecy::SecretString;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::credentials::{SecretLookup, SecretStore};
use crate::env::EnvLookup;

use scratch::ScratchMaterial;

/// Errors that prevent a TLS identity from being built.
///
/// These are fatal for a batch: no lookup is attempted without an identity.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("secret store unavailable: {reason}")]
    SecretStoreUnavailable { reason: String },

    #[error("passphrase not found in secret store (service: {service}, user: {user})")]
    PassphraseNotFound { service: String, user: String },

    #[error("missing configuration: {name} is not set")]
    MissingConfiguration { name: String },

    #[error("failed to load client certificate from {path}: {reason}")]
    CertificateLoadFailure { path: String, reason: String },
}

impl IdentityError {
    fn missing(name: impl Into<String>) -> Self {
        IdentityError::MissingConfiguration { name: name.into() }
    }

    fn load_failure(path: impl fmt::Display, reason: impl Into<String>) -> Self {
        IdentityError::CertificateLoadFailure {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Where certificate material comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaterialSource {
    /// Files on disk; passphrase from a secret store.
    LocalPath {
        certificate_path: PathBuf,
        private_key_path: Option<PathBuf>,
        passphrase: SecretLookup,
    },
    /// Variables naming files on disk and holding the passphrase.
    EnvPaths {
        certificate_path_var: String,
        passphrase_var: String,
        private_key_path_var: Option<String>,
    },
    /// Variables holding PEM content and the passphrase.
    EnvContent {
        certificate_var: String,
        passphrase_var: String,
        private_key_var: Option<String>,
    },
}

impl MaterialSource {
    pub fn kind(&self) -> MaterialKind {
        match self {
            MaterialSource::LocalPath { .. } => MaterialKind::LocalPath,
            MaterialSource::EnvPaths { .. } => MaterialKind::EnvPaths,
            MaterialSource::EnvContent { .. } => MaterialKind::EnvContent,
        }
    }
}

/// The kind of [`MaterialSource`] an identity was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
    LocalPath,
    EnvPaths,
    EnvContent,
}

impl fmt::Display for MaterialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaterialKind::LocalPath => write!(f, "local path"),
            MaterialKind::EnvPaths => write!(f, "environment file paths"),
            MaterialKind::EnvContent => write!(f, "environment content"),
        }
    }
}

/// A provisioned client identity.
///
/// Cheap to clone and safe to share across concurrent fetches: it holds the
/// TLS-configured HTTP client and the leaf certificate, nothing else.
#[derive(Clone)]
pub struct TlsIdentity {
    client: Client,
    certificate: Arc<[u8]>,
    kind: MaterialKind,
}

impl TlsIdentity {
    /// HTTP client presenting this identity.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// DER encoding of the leaf client certificate.
    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate
    }

    pub fn kind(&self) -> MaterialKind {
        self.kind
    }
}

impl fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsIdentity")
            .field("kind", &self.kind)
            .field("certificate_bytes", &self.certificate.len())
            .finish_non_exhaustive()
    }
}

/// TLS client settings applied to every provisioned identity.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    /// Extra PEM trust anchors for the vault's server certificate.
    pub ca_bundle: Option<PathBuf>,
    /// Parent directory for embedded-content scratch files.
    pub scratch_dir: Option<PathBuf>,
    pub user_agent: String,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            ca_bundle: None,
            scratch_dir: None,
            user_agent: concat!("ccp-client/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl TlsSettings {
    fn build_client(&self, identity: reqwest::Identity) -> Result<Client, IdentityError> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .identity(identity)
            .user_agent(&self.user_agent)
            // Each lookup opens its own connection.
            .pool_max_idle_per_host(0);

        if let Some(bundle) = &self.ca_bundle {
            let pem = std::fs::read(bundle)
                .map_err(|err| IdentityError::load_failure(bundle.display(), err.to_string()))?;
            let roots = reqwest::Certificate::from_pem_bundle(&pem)
                .map_err(|err| IdentityError::load_failure(bundle.display(), err.to_string()))?;
            debug!(count = roots.len(), bundle = %bundle.display(), "Adding trust anchors");
            for root in roots {
                builder = builder.add_root_certificate(root);
            }
        }

        builder
            .build()
            .map_err(|err| IdentityError::load_failure("TLS client", err.to_string()))
    }
}

/// Resolves a [`MaterialSource`] into a [`TlsIdentity`].
pub struct IdentityProvisioner {
    env: Arc<dyn EnvLookup>,
    secret_store: Option<Arc<dyn SecretStore>>,
    settings: TlsSettings,
}

impl IdentityProvisioner {
    pub fn new(env: Arc<dyn EnvLookup>) -> Self {
        Self {
            env,
            secret_store: None,
            settings: TlsSettings::default(),
        }
    }

    /// Secret store consulted by [`MaterialSource::LocalPath`].
    pub fn with_secret_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.secret_store = Some(store);
        self
    }

    pub fn with_settings(mut self, settings: TlsSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Build a TLS identity from `source`.
    pub async fn provision(&self, source: &MaterialSource) -> Result<TlsIdentity, IdentityError> {
        let kind = source.kind();
        debug!(source = %kind, "Provisioning TLS client identity");

        let identity = match source {
            MaterialSource::LocalPath {
                certificate_path,
                private_key_path,
                passphrase,
            } => {
                let passphrase = self.passphrase_from_store(passphrase).await?;
                self.load_files(certificate_path, private_key_path.as_deref(), &passphrase, kind)?
            }
            MaterialSource::EnvPaths {
                certificate_path_var,
                passphrase_var,
                private_key_path_var,
            } => {
                let certificate_path = PathBuf::from(self.required_var(certificate_path_var)?);
                let passphrase = SecretString::from(self.required_var(passphrase_var)?);
                let private_key_path = self.optional_var(private_key_path_var).map(PathBuf::from);
                self.load_files(&certificate_path, private_key_path.as_deref(), &passphrase, kind)?
            }
            MaterialSource::EnvContent {
                certificate_var,
                passphrase_var,
                private_key_var,
            } => {
                let certificate = Zeroizing::new(unescape_pem(self.required_var(certificate_var)?));
                let passphrase = SecretString::from(self.required_var(passphrase_var)?);
                let private_key = self
                    .optional_var(private_key_var)
                    .map(|key| Zeroizing::new(unescape_pem(key)));
                self.load_content(
                    certificate_var,
                    &certificate,
                    private_key.as_ref().map(|key| key.as_str()),
                    &passphrase,
                )?
            }
        };

        info!(source = %kind, "Provisioned TLS client identity");
        Ok(identity)
    }

    async fn passphrase_from_store(
        &self,
        lookup: &SecretLookup,
    ) -> Result<SecretString, IdentityError> {
        let store = self
            .secret_store
            .as_ref()
            .ok_or_else(|| IdentityError::SecretStoreUnavailable {
                reason: "no secret store is configured".to_string(),
            })?;

        match store.get(lookup).await {
            Ok(Some(passphrase)) => Ok(passphrase),
            Ok(None) => Err(IdentityError::PassphraseNotFound {
                service: lookup.service.clone(),
                user: lookup.user.clone(),
            }),
            Err(err) => Err(IdentityError::SecretStoreUnavailable {
                reason: err.to_string(),
            }),
        }
    }

    fn required_var(&self, name: &str) -> Result<String, IdentityError> {
        self.env.var(name).ok_or_else(|| IdentityError::missing(name))
    }

    fn optional_var(&self, name: &Option<String>) -> Option<String> {
        name.as_deref().and_then(|name| self.env.var(name))
    }

    fn load_files(
        &self,
        certificate_path: &Path,
        private_key_path: Option<&Path>,
        passphrase: &SecretString,
        kind: MaterialKind,
    ) -> Result<TlsIdentity, IdentityError> {
        let certificate = std::fs::read_to_string(certificate_path).map_err(|err| {
            IdentityError::load_failure(certificate_path.display(), err.to_string())
        })?;
        let key = match private_key_path {
            Some(path) => Zeroizing::new(
                std::fs::read_to_string(path)
                    .map_err(|err| IdentityError::load_failure(path.display(), err.to_string()))?,
            ),
            None => Zeroizing::new(certificate.clone()),
        };

        let origin = private_key_path.unwrap_or(certificate_path).display().to_string();
        self.assemble(&origin, &certificate, &key, passphrase, kind)
    }

    /// Materialise embedded PEM content, load it, and remove the scratch
    /// files before returning on every path.
    fn load_content(
        &self,
        origin: &str,
        certificate: &str,
        private_key: Option<&str>,
        passphrase: &SecretString,
    ) -> Result<TlsIdentity, IdentityError> {
        let scratch =
            ScratchMaterial::write(self.settings.scratch_dir.as_deref(), certificate, private_key)
                .map_err(|err| {
                    IdentityError::load_failure(origin, format!("unable to stage certificate: {err}"))
                })?;

        let loaded = self.load_files(
            scratch.certificate_path(),
            scratch.private_key_path(),
            passphrase,
            MaterialKind::EnvContent,
        );

        if let Err(err) = scratch.close() {
            warn!(error = %err, "Failed to remove staged certificate material");
        }

        loaded.map_err(|err| match err {
            IdentityError::CertificateLoadFailure { reason, .. } => {
                IdentityError::load_failure(origin, reason)
            }
            other => other,
        })
    }

    fn assemble(
        &self,
        origin: &str,
        certificate: &str,
        key: &str,
        passphrase: &SecretString,
        kind: MaterialKind,
    ) -> Result<TlsIdentity, IdentityError> {
        let material = pem::unlock(certificate, key, passphrase)
            .map_err(|reason| IdentityError::load_failure(origin, reason))?;

        let identity = reqwest::Identity::from_pem(material.pem.as_bytes())
            .map_err(|err| IdentityError::load_failure(origin, err.to_string()))?;
        let client = self.settings.build_client(identity)?;

        Ok(TlsIdentity {
            client,
            certificate: Arc::from(material.leaf_der),
            kind,
        })
    }
}

/// PEM content squeezed into a single-line variable carries literal `\n`
/// sequences; expand them when the value has no real line breaks.
fn unescape_pem(value: String) -> String {
    if value.contains('\n') {
        value
    } else {
        value.replace("\\n", "\n")
    }
}
