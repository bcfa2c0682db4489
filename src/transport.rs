//! HTTP transport to the Central Credential Provider.
//!
//! One authenticated GET per lookup. The vault answers with a flat JSON object
//! (`Content`, `UserName`, `Address`, ... ) on success, or with an
//! `ErrorCode`/`ErrorMsg` envelope alongside a non-2xx status.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::identity::TlsIdentity;

/// Relative path of the service health probe.
pub const HEALTH_PATH: &str = "/AIMWebService/v1.1/aim.asmx";

/// Per-request transport failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("vault service unavailable: HTTP {status}{}", describe(.error_code, .message))]
    ServiceUnavailable {
        status: u16,
        error_code: Option<String>,
        message: Option<String>,
    },

    #[error("connection to vault failed: {0}")]
    ConnectionFailure(String),

    #[error("vault request timed out after {0:?}")]
    TimedOut(Duration),

    #[error("malformed vault response: {0}")]
    MalformedResponse(String),
}

fn describe(error_code: &Option<String>, message: &Option<String>) -> String {
    match (error_code, message) {
        (Some(code), Some(message)) => format!(" ({code}: {message})"),
        (Some(code), None) => format!(" ({code})"),
        (None, Some(message)) => format!(" ({message})"),
        (None, None) => String::new(),
    }
}

/// A decoded credential lookup.
///
/// `content` is `None` when the vault omitted it (or sent `null`); that is a
/// successful lookup of an empty secret, not a failure.
pub struct VaultResponse {
    pub content: Option<SecretString>,
    pub user_name: Option<String>,
    pub address: Option<String>,
    pub name: Option<String>,
    pub safe: Option<String>,
    pub folder: Option<String>,
    /// Every other property the vault returned.
    pub properties: Map<String, Value>,
}

impl VaultResponse {
    /// The secret value, if present.
    pub fn expose_content(&self) -> Option<&str> {
        self.content.as_ref().map(|content| content.expose_secret())
    }

    /// Decode the success envelope.
    pub fn from_json(body: &[u8]) -> Result<Self, TransportError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|err| TransportError::MalformedResponse(err.to_string()))?;
        let Value::Object(mut properties) = value else {
            return Err(TransportError::MalformedResponse(
                "expected a JSON object".to_string(),
            ));
        };

        let content = take_string(&mut properties, "Content")?.map(SecretString::from);
        Ok(Self {
            content,
            user_name: take_string(&mut properties, "UserName")?,
            address: take_string(&mut properties, "Address")?,
            name: take_string(&mut properties, "Name")?,
            safe: take_string(&mut properties, "Safe")?,
            folder: take_string(&mut properties, "Folder")?,
            properties,
        })
    }
}

fn take_string(
    properties: &mut Map<String, Value>,
    key: &str,
) -> Result<Option<String>, TransportError> {
    match properties.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value)),
        Some(other) => Err(TransportError::MalformedResponse(format!(
            "{key} should be a string, got {other}"
        ))),
    }
}

impl fmt::Debug for VaultResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultResponse")
            .field("content", &self.content.as_ref().map(|_| "[REDACTED]"))
            .field("user_name", &self.user_name)
            .field("address", &self.address)
            .field("name", &self.name)
            .field("safe", &self.safe)
            .field("folder", &self.folder)
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorEnvelope {
    error_code: Option<String>,
    error_msg: Option<String>,
}

/// Issues lookups against the vault.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `path` (relative, with query string) and decode the response.
    async fn fetch(&self, path: &str) -> Result<VaultResponse, TransportError>;

    /// Probe the service health endpoint. Success means HTTP 200.
    async fn check_service(&self) -> Result<(), TransportError>;
}

/// Transport over the identity's mutually-authenticated HTTPS client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_uri: String,
}

impl HttpTransport {
    pub fn new(identity: &TlsIdentity, base_uri: &str) -> Self {
        Self {
            client: identity.client().clone(),
            base_uri: normalize_base_uri(base_uri),
        }
    }

    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_uri, path)
    }
}

/// Trim trailing slashes and default to `https://` for bare hosts.
pub fn normalize_base_uri(base_uri: &str) -> String {
    let trimmed = base_uri.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

fn connection_failure(err: reqwest::Error) -> TransportError {
    TransportError::ConnectionFailure(err.to_string())
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, path: &str) -> Result<VaultResponse, TransportError> {
        let response = self
            .client
            .get(self.url(path))
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(connection_failure)?;

        let status = response.status();
        let body = response.bytes().await.map_err(connection_failure)?;
        debug!(status = status.as_u16(), bytes = body.len(), "Vault responded");

        if !status.is_success() {
            let envelope: ErrorEnvelope = serde_json::from_slice(&body).unwrap_or_default();
            return Err(TransportError::ServiceUnavailable {
                status: status.as_u16(),
                error_code: envelope.error_code,
                message: envelope.error_msg,
            });
        }

        VaultResponse::from_json(&body)
    }

    async fn check_service(&self) -> Result<(), TransportError> {
        let response = self
            .client
            .get(self.url(HEALTH_PATH))
            .send()
            .await
            .map_err(connection_failure)?;

        let status = response.status();
        debug!(status = status.as_u16(), "Vault health probe");
        if status == StatusCode::OK {
            Ok(())
        } else {
            Err(TransportError::ServiceUnavailable {
                status: status.as_u16(),
                error_code: None,
                message: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_uri() {
        assert_eq!(normalize_base_uri("vault.corp"), "https://vault.corp");
        assert_eq!(normalize_base_uri("https://vault.corp/"), "https://vault.corp");
        assert_eq!(normalize_base_uri("http://127.0.0.1:8080//"), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_decode_success_envelope() {
        let body = br#"{
            "Content": "s3cret",
            "UserName": "svc-billing",
            "Address": "db.corp",
            "Name": "db-admin",
            "Safe": "Payroll",
            "Folder": "Root",
            "PolicyID": "Oracle",
            "PasswordChangeInProcess": "False"
        }"#;

        let response = VaultResponse::from_json(body).unwrap();
        assert_eq!(response.expose_content(), Some("s3cret"));
        assert_eq!(response.user_name.as_deref(), Some("svc-billing"));
        assert_eq!(response.folder.as_deref(), Some("Root"));
        assert_eq!(response.properties.len(), 2);
        assert_eq!(response.properties["PolicyID"], "Oracle");
    }

    #[test]
    fn test_missing_content_is_not_an_error() {
        let response = VaultResponse::from_json(br#"{"UserName": "svc"}"#).unwrap();
        assert!(response.content.is_none());

        let response = VaultResponse::from_json(br#"{"Content": null}"#).unwrap();
        assert!(response.content.is_none());
    }

    #[test]
    fn test_malformed_bodies() {
        let bodies: [&[u8]; 3] = [b"not json", b"[1, 2]", br#"{"Content": 42}"#];
        for body in bodies {
            assert!(matches!(
                VaultResponse::from_json(body),
                Err(TransportError::MalformedResponse(_))
            ));
        }
    }

    #[test]
    fn test_debug_redacts_content() {
        let response = VaultResponse::from_json(br#"{"Content": "hunter2"}"#).unwrap();
        let rendered = format!("{response:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn test_service_unavailable_message() {
        let err = TransportError::ServiceUnavailable {
            status: 404,
            error_code: Some("APPAP004E".to_string()),
            message: Some("Password object matching query not found".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "vault service unavailable: HTTP 404 (APPAP004E: Password object matching query not found)"
        );
    }
}
