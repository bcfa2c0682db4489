#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ccp_client::credentials::{SecretLookup, SecretStore, SecretStoreError};
use ccp_client::env::EnvLookup;
use ccp_client::identity::{IdentityProvisioner, MaterialSource, TlsIdentity};
use ccp_client::transport::{Transport, TransportError, VaultResponse};
use secrecy::SecretString;

pub const PASSPHRASE: &str = "correct-horse-battery";

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn read_fixture(name: &str) -> String {
    std::fs::read_to_string(fixture(name)).unwrap()
}

pub fn env_map(pairs: &[(&str, String)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Environment for the file-path source: certificate plus encrypted key.
pub fn env_paths() -> HashMap<String, String> {
    env_map(&[
        ("AAM_DEMO_PATH", fixture("client.crt").display().to_string()),
        (
            "AAM_DEMO_KEY_PATH",
            fixture("client.encrypted.key").display().to_string(),
        ),
        ("AAM_PASSPHRASE", PASSPHRASE.to_string()),
    ])
}

pub fn env_paths_source() -> MaterialSource {
    MaterialSource::EnvPaths {
        certificate_path_var: "AAM_DEMO_PATH".to_string(),
        passphrase_var: "AAM_PASSPHRASE".to_string(),
        private_key_path_var: Some("AAM_DEMO_KEY_PATH".to_string()),
    }
}

/// Environment for the embedded-content source.
pub fn env_content() -> HashMap<String, String> {
    env_map(&[
        ("AAM_CERT", read_fixture("client.crt")),
        ("AAM_KEY", read_fixture("client.encrypted.key")),
        ("AAM_PASSPHRASE", PASSPHRASE.to_string()),
    ])
}

pub fn env_content_source() -> MaterialSource {
    MaterialSource::EnvContent {
        certificate_var: "AAM_CERT".to_string(),
        passphrase_var: "AAM_PASSPHRASE".to_string(),
        private_key_var: Some("AAM_KEY".to_string()),
    }
}

/// A provisioned identity built from the test fixtures.
pub async fn test_identity() -> TlsIdentity {
    IdentityProvisioner::new(Arc::new(env_paths()))
        .provision(&env_paths_source())
        .await
        .unwrap()
}

/// Environment whose values can change between calls.
#[derive(Default)]
pub struct MutableEnv {
    vars: Mutex<HashMap<String, String>>,
}

impl MutableEnv {
    pub fn set(&self, name: &str, value: impl Into<String>) {
        self.vars
            .lock()
            .unwrap()
            .insert(name.to_string(), value.into());
    }
}

impl EnvLookup for MutableEnv {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.lock().unwrap().var(name)
    }
}

/// In-memory secret store.
#[derive(Default)]
pub struct StubSecretStore {
    entries: HashMap<(String, String), String>,
    unavailable: bool,
    pub lookups: AtomicUsize,
}

impl StubSecretStore {
    pub fn with_entry(mut self, service: &str, user: &str, secret: &str) -> Self {
        self.entries
            .insert((service.to_string(), user.to_string()), secret.to_string());
        self
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl SecretStore for StubSecretStore {
    async fn get(&self, lookup: &SecretLookup) -> Result<Option<SecretString>, SecretStoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(SecretStoreError::Unavailable {
                backend: "stub",
                reason: "stub client is not installed".to_string(),
            });
        }
        Ok(self
            .entries
            .get(&(lookup.service.clone(), lookup.user.clone()))
            .map(|secret| SecretString::from(secret.clone())))
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// Transport stub that records paths and tracks how many calls overlap.
///
/// Succeeds with `Content = "secret-<object>"` unless the object is listed
/// as failing or hanging.
#[derive(Default)]
pub struct StubTransport {
    delay: Duration,
    failing: HashSet<String>,
    hanging: HashSet<String>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    paths: Mutex<Vec<String>>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, object: &str) -> Self {
        self.failing.insert(object.to_string());
        self
    }

    pub fn hanging(mut self, object: &str) -> Self {
        self.hanging.insert(object.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.paths.lock().unwrap().len()
    }

    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

fn query_value<'a>(path: &'a str, name: &str) -> Option<&'a str> {
    let query = path.split_once('?')?.1;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then_some(value)
    })
}

#[async_trait]
impl Transport for StubTransport {
    async fn fetch(&self, path: &str) -> Result<VaultResponse, TransportError> {
        self.paths.lock().unwrap().push(path.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let object = query_value(path, "Object")
            .or_else(|| query_value(path, "UserName"))
            .unwrap_or_default()
            .to_string();

        if self.hanging.contains(&object) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        } else if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&object) {
            return Err(TransportError::ServiceUnavailable {
                status: 404,
                error_code: Some("APPAP004E".to_string()),
                message: Some(format!("{object} not found")),
            });
        }

        VaultResponse::from_json(format!(r#"{{"Content": "secret-{object}"}}"#).as_bytes())
    }

    async fn check_service(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
