use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::client::VaultClient;
use crate::credentials::SecretStoreConfig;
use crate::duration::deserialize_duration_opt;
use crate::env::EnvLookup;
use crate::fetcher::DEFAULT_MAX_CONCURRENT;
use crate::identity::{IdentityError, IdentityProvisioner, MaterialSource, TlsSettings};
use crate::query::CredentialRequest;

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

/// Names of the environment variables read by the environment identity
/// sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvNames {
    /// Variable holding the path of the certificate file.
    pub certificate_path: String,
    /// Variable holding the path of a separate private key file.
    pub private_key_path: String,
    /// Variable holding PEM certificate content.
    pub certificate: String,
    /// Variable holding PEM private key content.
    pub private_key: String,
    pub passphrase: String,
}

impl Default for EnvNames {
    fn default() -> Self {
        Self {
            certificate_path: "AAM_DEMO_PATH".to_string(),
            private_key_path: "AAM_DEMO_KEY_PATH".to_string(),
            certificate: "AAM_CERT".to_string(),
            private_key: "AAM_KEY".to_string(),
            passphrase: "AAM_PASSPHRASE".to_string(),
        }
    }
}

/// Where the client certificate comes from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Certificate file on disk. Selects the local-path source, which
    /// requires `secret_store`.
    pub certificate_path: Option<PathBuf>,

    /// Separate private key file for `certificate_path`.
    pub private_key_path: Option<PathBuf>,

    /// Secret store holding the certificate passphrase.
    pub secret_store: Option<SecretStoreConfig>,

    /// Environment variable names for the environment sources.
    pub env: EnvNames,
}

impl IdentityConfig {
    /// Pick the material source.
    ///
    /// A configured certificate path wins, then a certificate-path variable,
    /// then certificate content.
    pub fn material_source(&self, env: &dyn EnvLookup) -> Result<MaterialSource, IdentityError> {
        if let Some(certificate_path) = &self.certificate_path {
            let store = self
                .secret_store
                .as_ref()
                .ok_or_else(|| IdentityError::MissingConfiguration {
                    name: "identity.secret_store".to_string(),
                })?;
            return Ok(MaterialSource::LocalPath {
                certificate_path: certificate_path.clone(),
                private_key_path: self.private_key_path.clone(),
                passphrase: store.lookup(),
            });
        }

        let names = &self.env;
        if env.var(&names.certificate_path).is_some() {
            return Ok(MaterialSource::EnvPaths {
                certificate_path_var: names.certificate_path.clone(),
                passphrase_var: names.passphrase.clone(),
                private_key_path_var: Some(names.private_key_path.clone()),
            });
        }

        if env.var(&names.certificate).is_some() {
            return Ok(MaterialSource::EnvContent {
                certificate_var: names.certificate.clone(),
                passphrase_var: names.passphrase.clone(),
                private_key_var: Some(names.private_key.clone()),
            });
        }

        Err(IdentityError::MissingConfiguration {
            name: format!("{} or {}", names.certificate_path, names.certificate),
        })
    }

    fn resolve_paths(&mut self, config_dir: &Path) {
        self.certificate_path = self
            .certificate_path
            .take()
            .map(|path| resolve_path(config_dir, path));
        self.private_key_path = self
            .private_key_path
            .take()
            .map(|path| resolve_path(config_dir, path));
    }
}

/// Client configuration.
///
/// # Example
///
/// ```toml
/// base_uri = "https://vault.corp"
/// max_concurrent = 5
/// request_timeout = "30s"
///
/// [request]
/// app_id = "billing"
/// safe = "Payroll"
///
/// [identity]
/// certificate_path = "certs/client.pem"
///
/// [identity.secret_store]
/// backend = "pass"
/// service = "ccp"
/// user = "svc-billing"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Vault base URI. A bare host is contacted over HTTPS.
    pub base_uri: Option<String>,

    /// Probe the vault health endpoint before each batch.
    #[serde(default = "default_true")]
    pub verify_service: bool,

    /// Lookups in flight at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Per-lookup timeout.
    #[serde(default, deserialize_with = "deserialize_duration_opt")]
    pub request_timeout: Option<Duration>,

    /// Extra PEM trust anchors for the vault's server certificate.
    pub ca_bundle: Option<PathBuf>,

    /// Parent directory for temporary certificate files.
    pub scratch_dir: Option<PathBuf>,

    /// Fields applied to every lookup.
    pub request: CredentialRequest,

    pub identity: IdentityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_uri: None,
            verify_service: true,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            request_timeout: None,
            ca_bundle: None,
            scratch_dir: None,
            request: CredentialRequest::default(),
            identity: IdentityConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Overlay `AAM_*` environment values on top of the file settings.
    pub fn apply_env(&mut self, env: &dyn EnvLookup) -> Result<()> {
        if let Some(base_uri) = env.var("AAM_BASE_URI") {
            self.base_uri = Some(base_uri);
        }

        let request = &mut self.request;
        let overrides: [(&str, &mut Option<String>); 10] = [
            ("AAM_APP_ID", &mut request.app_id),
            ("AAM_SAFE", &mut request.safe),
            ("AAM_OBJECT_NAME", &mut request.object),
            ("AAM_USERNAME", &mut request.username),
            ("AAM_FOLDER", &mut request.folder),
            ("AAM_ADDRESS", &mut request.address),
            ("AAM_DATABASE", &mut request.database),
            ("AAM_POLICY_ID", &mut request.policy_id),
            ("AAM_REASON", &mut request.reason),
            ("AAM_QUERY_FORMAT", &mut request.query_format),
        ];
        for (name, field) in overrides {
            if let Some(value) = env.var(name) {
                *field = Some(value);
            }
        }

        if let Some(dual) = env.var("AAM_DUAL_ACCOUNTS") {
            self.request.dual_accounts = dual.eq_ignore_ascii_case("true");
        }

        if let Some(max) = env.var("AAM_MAX_CONCURRENT") {
            self.max_concurrent = max
                .trim()
                .parse()
                .with_context(|| format!("Invalid AAM_MAX_CONCURRENT: {max}"))?;
        }

        Ok(())
    }

    fn resolve_paths(&mut self, config_dir: &Path) {
        self.ca_bundle = self.ca_bundle.take().map(|path| resolve_path(config_dir, path));
        self.scratch_dir = self
            .scratch_dir
            .take()
            .map(|path| resolve_path(config_dir, path));
        self.identity.resolve_paths(config_dir);
    }
}

fn resolve_path(config_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        config_dir.join(path)
    }
}

/// Loaded configuration with environment overrides applied and paths
/// resolved against the config file's directory.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Directory relative paths were resolved against.
    pub config_dir: PathBuf,
    pub base_uri: Option<String>,
    pub verify_service: bool,
    pub max_concurrent: usize,
    pub request_timeout: Option<Duration>,
    pub ca_bundle: Option<PathBuf>,
    pub scratch_dir: Option<PathBuf>,
    pub request: CredentialRequest,
    pub identity: IdentityConfig,
}

/// Returns the default config file path.
///
/// Resolution order:
/// 1. `./ccp.toml` if it exists in current directory
/// 2. `~/.local/share/ccp-client/ccp.toml` (XDG data directory)
pub fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from("ccp.toml");
    if local_config.exists() {
        return local_config;
    }

    if let Some(data_dir) = dirs::data_dir() {
        return data_dir.join("ccp-client").join("ccp.toml");
    }

    local_config
}

impl ResolvedConfig {
    fn resolve(mut config: Config, config_dir: &Path, env: &dyn EnvLookup) -> Result<Self> {
        config.apply_env(env)?;
        config.resolve_paths(config_dir);

        Ok(Self {
            config_dir: config_dir.to_path_buf(),
            base_uri: config.base_uri,
            verify_service: config.verify_service,
            max_concurrent: config.max_concurrent,
            request_timeout: config.request_timeout,
            ca_bundle: config.ca_bundle,
            scratch_dir: config.scratch_dir,
            request: config.request,
            identity: config.identity,
        })
    }

    /// Load and resolve config from a file path.
    pub fn load(config_path: &Path, env: &dyn EnvLookup) -> Result<Self> {
        let config_path = config_path
            .canonicalize()
            .with_context(|| format!("Config file not found: {}", config_path.display()))?;

        let config_dir = config_path
            .parent()
            .context("Config file has no parent directory")?;

        let config = Config::load(&config_path)?;
        Self::resolve(config, config_dir, env)
    }

    /// Load config, falling back to defaults (plus environment overrides) if
    /// the file doesn't exist.
    pub fn load_or_default(config_path: &Path, env: &dyn EnvLookup) -> Result<Self> {
        if config_path.exists() {
            return Self::load(config_path, env);
        }

        let config_dir = std::env::current_dir().context("Failed to get current directory")?;
        Self::resolve(Config::default(), &config_dir, env)
    }

    pub fn tls_settings(&self) -> TlsSettings {
        TlsSettings {
            ca_bundle: self.ca_bundle.clone(),
            scratch_dir: self.scratch_dir.clone(),
            ..TlsSettings::default()
        }
    }

    /// Build a [`VaultClient`] from this configuration.
    ///
    /// `env` is what the identity provisioner reads certificate variables
    /// from.
    pub fn client(&self, env: Arc<dyn EnvLookup>) -> Result<VaultClient> {
        let base_uri = self
            .base_uri
            .as_deref()
            .context("No vault base URI configured (set base_uri or AAM_BASE_URI)")?;

        let source = self.identity.material_source(env.as_ref())?;

        let mut provisioner = IdentityProvisioner::new(env).with_settings(self.tls_settings());
        if let Some(store) = &self.identity.secret_store {
            provisioner = provisioner.with_secret_store(store.build());
        }

        Ok(VaultClient::new(base_uri, source, provisioner)
            .with_template(self.request.clone())
            .with_verify_service(self.verify_service)
            .with_max_concurrent(self.max_concurrent)
            .with_request_timeout(self.request_timeout))
    }
}
