//! Lookups against a vault that requires a client certificate.

mod support;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use ccp_client::client::VaultClient;
use ccp_client::identity::{IdentityProvisioner, TlsSettings};
use ccp_client::query::CredentialRequest;
use ccp_client::transport::{HttpTransport, Transport};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use support::{env_content, env_content_source, env_map, env_paths_source, fixture, PASSPHRASE};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

const BODY: &str = r#"{"Content": "s3cret", "UserName": "svc"}"#;
const LOOKUP: &str = "/AIMWebService/api/Accounts?AppID=billing&Safe=Payroll&Object=db-admin";

/// HTTPS vault stub that only completes handshakes with clients presenting a
/// certificate issued by the test CA. Every request gets `BODY`.
struct TlsVault {
    addr: SocketAddr,
    presented: Arc<Mutex<Vec<Vec<u8>>>>,
    task: JoinHandle<()>,
}

impl TlsVault {
    async fn start() -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let mut roots = RootCertStore::empty();
        for cert in CertificateDer::pem_file_iter(fixture("ca.crt"))? {
            roots.add(cert?)?;
        }
        let verifier =
            WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
                .build()?;

        let chain = CertificateDer::pem_file_iter(fixture("vault.crt"))?
            .collect::<Result<Vec<_>, _>>()?;
        let key = PrivateKeyDer::from_pem_file(fixture("vault.key"))?;
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_client_cert_verifier(verifier)
            .with_single_cert(chain, key)?;

        let acceptor = TlsAcceptor::from(Arc::new(config));
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let presented = Arc::new(Mutex::new(Vec::new()));

        let seen = presented.clone();
        let task = tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                let seen = seen.clone();
                tokio::spawn(async move {
                    // Handshake failures are the rejected clients.
                    if let Ok(stream) = acceptor.accept(tcp).await {
                        let _ = respond(stream, &seen).await;
                    }
                });
            }
        });

        Ok(Self {
            addr,
            presented,
            task,
        })
    }

    fn uri(&self) -> String {
        format!("https://{}", self.addr)
    }

    /// Leaf certificates presented by clients that completed a handshake.
    fn presented(&self) -> Vec<Vec<u8>> {
        self.presented.lock().unwrap().clone()
    }
}

impl Drop for TlsVault {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn respond(
    mut stream: TlsStream<TcpStream>,
    presented: &Mutex<Vec<Vec<u8>>>,
) -> std::io::Result<()> {
    if let Some(leaf) = stream.get_ref().1.peer_certificates().and_then(|certs| certs.first()) {
        presented.lock().unwrap().push(leaf.as_ref().to_vec());
    }

    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|window| window == b"\r\n\r\n") {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buf[..n]);
    }

    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{BODY}",
        BODY.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn trusting_settings(scratch: &TempDir) -> TlsSettings {
    TlsSettings {
        ca_bundle: Some(fixture("ca.crt")),
        scratch_dir: Some(scratch.path().to_path_buf()),
        ..TlsSettings::default()
    }
}

#[tokio::test]
async fn embedded_content_identities_authenticate_identically() -> Result<()> {
    let vault = TlsVault::start().await?;
    let scratch = TempDir::new()?;
    let provisioner =
        IdentityProvisioner::new(Arc::new(env_content())).with_settings(trusting_settings(&scratch));

    let first = provisioner.provision(&env_content_source()).await?;
    let second = provisioner.provision(&env_content_source()).await?;
    assert_eq!(first.certificate_der(), second.certificate_der());

    for identity in [&first, &second] {
        let response = HttpTransport::new(identity, &vault.uri()).fetch(LOOKUP).await?;
        assert_eq!(response.expose_content(), Some("s3cret"));
    }

    let presented = vault.presented();
    assert_eq!(presented.len(), 2);
    assert!(presented
        .iter()
        .all(|leaf| leaf.as_slice() == first.certificate_der()));
    Ok(())
}

#[tokio::test]
async fn bundle_identity_completes_batch_over_mutual_tls() -> Result<()> {
    let vault = TlsVault::start().await?;
    let scratch = TempDir::new()?;
    let env = env_map(&[
        ("AAM_DEMO_PATH", fixture("client.bundle.pem").display().to_string()),
        ("AAM_PASSPHRASE", PASSPHRASE.to_string()),
    ]);
    let provisioner =
        IdentityProvisioner::new(Arc::new(env)).with_settings(trusting_settings(&scratch));

    let client = VaultClient::new(vault.uri(), env_paths_source(), provisioner)
        .with_template(CredentialRequest::new("billing", "Payroll"));
    let results = client.fetch_objects(&["db-admin", "db-reader"]).await?;

    assert!(results.values().all(|result| result.is_ok()));
    // Health probe plus one handshake per lookup.
    assert_eq!(vault.presented().len(), 3);
    Ok(())
}

#[tokio::test]
async fn client_without_certificate_is_rejected() -> Result<()> {
    let vault = TlsVault::start().await?;
    let ca = reqwest::Certificate::from_pem(&std::fs::read(fixture("ca.crt"))?)?;
    let anonymous = reqwest::Client::builder()
        .use_rustls_tls()
        .add_root_certificate(ca)
        .build()?;

    let outcome = anonymous
        .get(format!("{}{LOOKUP}", vault.uri()))
        .send()
        .await;

    assert!(outcome.is_err());
    assert!(vault.presented().is_empty());
    Ok(())
}
