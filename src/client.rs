//! Vault client facade.
//!
//! Ties identity provisioning, the optional service pre-flight and the batch
//! fetcher together. The TLS identity is provisioned on first use and reused
//! for the lifetime of the client; a failed attempt leaves the client
//! unprovisioned so a later call can try again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::fetcher::{BatchFetcher, BatchResult, FetchError, DEFAULT_MAX_CONCURRENT};
use crate::identity::{IdentityError, IdentityProvisioner, MaterialSource, TlsIdentity};
use crate::query::CredentialRequest;
use crate::transport::{HttpTransport, Transport, TransportError, VaultResponse};

/// Failures that stop a whole call.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("vault service check failed: {0}")]
    ServiceCheck(#[source] TransportError),

    /// The single lookup of [`VaultClient::get_password`] failed.
    #[error(transparent)]
    Request(#[from] FetchError),
}

struct Session {
    identity: TlsIdentity,
    transport: Arc<dyn Transport>,
    fetcher: BatchFetcher,
}

/// Certificate-authenticated client for one vault.
pub struct VaultClient {
    base_uri: String,
    source: MaterialSource,
    provisioner: IdentityProvisioner,
    template: CredentialRequest,
    verify_service: bool,
    max_concurrent: usize,
    request_timeout: Option<Duration>,
    session: OnceCell<Session>,
}

impl VaultClient {
    pub fn new(
        base_uri: impl Into<String>,
        source: MaterialSource,
        provisioner: IdentityProvisioner,
    ) -> Self {
        Self {
            base_uri: base_uri.into(),
            source,
            provisioner,
            template: CredentialRequest::default(),
            verify_service: true,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            request_timeout: None,
            session: OnceCell::new(),
        }
    }

    /// Request fields shared by every [`fetch_objects`](Self::fetch_objects)
    /// lookup (AppID, Safe, Folder, Reason, ...).
    pub fn with_template(mut self, template: CredentialRequest) -> Self {
        self.template = template;
        self
    }

    /// Probe the health endpoint before each batch. Enabled by default.
    pub fn with_verify_service(mut self, verify_service: bool) -> Self {
        self.verify_service = verify_service;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn template(&self) -> &CredentialRequest {
        &self.template
    }

    async fn session(&self) -> Result<&Session, IdentityError> {
        self.session
            .get_or_try_init(|| async {
                let identity = self.provisioner.provision(&self.source).await?;
                let transport: Arc<dyn Transport> =
                    Arc::new(HttpTransport::new(&identity, &self.base_uri));
                let fetcher = BatchFetcher::new(transport.clone())
                    .with_max_concurrent(self.max_concurrent)
                    .with_item_timeout(self.request_timeout);
                debug!(
                    base_uri = %self.base_uri,
                    max_concurrent = fetcher.max_concurrent(),
                    "Vault session ready"
                );
                Ok(Session {
                    identity,
                    transport,
                    fetcher,
                })
            })
            .await
    }

    /// The provisioned identity, provisioning it if needed.
    pub async fn identity(&self) -> Result<&TlsIdentity, ClientError> {
        Ok(&self.session().await?.identity)
    }

    /// Probe the vault health endpoint.
    pub async fn check_service(&self) -> Result<(), ClientError> {
        let session = self.session().await?;
        session
            .transport
            .check_service()
            .await
            .map_err(ClientError::ServiceCheck)
    }

    async fn prepare(&self) -> Result<&Session, ClientError> {
        let session = self.session().await?;
        if self.verify_service {
            session
                .transport
                .check_service()
                .await
                .map_err(ClientError::ServiceCheck)?;
            debug!("Vault service check passed");
        }
        Ok(session)
    }

    /// Look up each object with the client's request template.
    pub async fn fetch_objects<S: AsRef<str>>(
        &self,
        objects: &[S],
    ) -> Result<BatchResult, ClientError> {
        let session = self.prepare().await?;
        info!(count = objects.len(), "Fetching credentials");
        Ok(session.fetcher.fetch_objects(&self.template, objects).await)
    }

    /// Run arbitrary keyed requests as one batch.
    pub async fn fetch_all<I>(&self, requests: I) -> Result<BatchResult, ClientError>
    where
        I: IntoIterator<Item = (String, CredentialRequest)>,
    {
        let session = self.prepare().await?;
        Ok(session.fetcher.fetch_all(requests).await)
    }

    /// Single lookup. The request is validated before any provisioning or
    /// network traffic.
    pub async fn get_password(
        &self,
        request: &CredentialRequest,
    ) -> Result<VaultResponse, ClientError> {
        request.validate().map_err(FetchError::from)?;
        let session = self.prepare().await?;
        Ok(session.fetcher.fetch_one(request).await?)
    }
}
