//! Bounded concurrent credential fetching.
//!
//! Every request is validated before it is admitted; invalid requests are
//! recorded as failures without taking a concurrency slot. Admitted requests
//! wait on a semaphore so that at most `max_concurrent` lookups are in flight,
//! and each one runs to completion independently of the others.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::query::{CredentialRequest, ValidationError};
use crate::transport::{Transport, TransportError, VaultResponse};

/// Lookups in flight at once unless configured otherwise.
pub const DEFAULT_MAX_CONCURRENT: usize = 10;

/// Why a single batch item failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Outcome of a batch, keyed by the caller's identifier for each request.
pub type BatchResult = BTreeMap<String, Result<VaultResponse, FetchError>>;

/// Runs many lookups against one [`Transport`] with a cap on parallelism.
#[derive(Clone)]
pub struct BatchFetcher {
    transport: Arc<dyn Transport>,
    max_concurrent: usize,
    item_timeout: Option<Duration>,
}

impl BatchFetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            item_timeout: None,
        }
    }

    /// Cap the number of in-flight lookups. Zero is treated as one.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Bound each lookup individually so a slow one releases its slot.
    pub fn with_item_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.item_timeout = timeout;
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run a single lookup.
    pub async fn fetch_one(&self, request: &CredentialRequest) -> Result<VaultResponse, FetchError> {
        let path = request.build_path()?;
        Ok(fetch_path(self.transport.as_ref(), &path, self.item_timeout).await?)
    }

    /// Look up each object using `template` for everything but the selector.
    ///
    /// The object name replaces any user name (or virtual user name) in the
    /// template.
    pub async fn fetch_objects<S: AsRef<str>>(
        &self,
        template: &CredentialRequest,
        objects: &[S],
    ) -> BatchResult {
        let requests = objects.iter().map(|object| {
            let object = object.as_ref();
            let mut request = template.clone();
            request.username = None;
            request.dual_accounts = false;
            request.object = Some(object.to_string());
            (object.to_string(), request)
        });
        self.fetch_all(requests).await
    }

    /// Run every request and collect one entry per distinct key.
    ///
    /// A repeated key is ignored after its first occurrence. Failures are
    /// recorded in the result; the batch never stops early.
    pub async fn fetch_all<I>(&self, requests: I) -> BatchResult
    where
        I: IntoIterator<Item = (String, CredentialRequest)>,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut results = BatchResult::new();
        let mut seen = HashSet::new();
        let mut in_flight = FuturesUnordered::new();

        for (key, request) in requests {
            if !seen.insert(key.clone()) {
                debug!(object = %key, "Skipping duplicate lookup");
                continue;
            }

            let path = match request.build_path() {
                Ok(path) => path,
                Err(err) => {
                    warn!(object = %key, error = %err, "Rejected invalid lookup");
                    results.insert(key, Err(err.into()));
                    continue;
                }
            };

            let sem = semaphore.clone();
            let transport = self.transport.clone();
            let timeout = self.item_timeout;
            let span = info_span!("fetch", id = %Uuid::new_v4(), object = %key);

            in_flight.push(
                async move {
                    let _permit = sem.acquire().await.ok();
                    debug!("Lookup admitted");
                    let result = fetch_path(transport.as_ref(), &path, timeout).await;
                    match &result {
                        Ok(_) => debug!("Lookup succeeded"),
                        Err(err) => warn!(error = %err, "Lookup failed"),
                    }
                    (key, result.map_err(FetchError::from))
                }
                .instrument(span),
            );
        }

        while let Some((key, result)) = in_flight.next().await {
            results.insert(key, result);
        }

        let failed = results.values().filter(|result| result.is_err()).count();
        info!(total = results.len(), failed, "Batch complete");
        results
    }
}

async fn fetch_path(
    transport: &dyn Transport,
    path: &str,
    timeout: Option<Duration>,
) -> Result<VaultResponse, TransportError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, transport.fetch(path))
            .await
            .map_err(|_| TransportError::TimedOut(limit))?,
        None => transport.fetch(path).await,
    }
}
