//! Credential source backed by a remote signing service.
//!
//! The certificate chain is fetched once through a "certificate" operation
//! and cached for the lifetime of the source; every signature is its own
//! "sign" operation.

use super::client::RemoteSigningBackend;
use super::protocol::SubmitOperationRequest;
use crate::adapters::credential::{CredentialSource, SigningOperation};
use crate::domain::crypto::{Certificate, CertificateChain, SignatureAlgorithm, SigningRequest};
use crate::infra::error::{SigningError, SigningResult};
use crate::infra::single_flight::SingleFlight;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct RemoteCredentialSource {
    label: &'static str,
    backend: Arc<dyn RemoteSigningBackend>,
    key: String,
    chain: SingleFlight<Arc<CertificateChain>>,
    // Owned by the source, so one waiter giving up never aborts the shared
    // fetch. Cancelled only by `close`.
    shutdown: CancellationToken,
}

impl RemoteCredentialSource {
    #[must_use]
    pub fn new(
        label: &'static str,
        backend: Arc<dyn RemoteSigningBackend>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            label,
            backend,
            key: key.into(),
            chain: SingleFlight::new(),
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Number of certificate fetches actually submitted.
    pub fn fetches_started(&self) -> usize {
        self.chain.fetches_started()
    }

    /// The cached chain, fetching it on first use.
    ///
    /// # Errors
    /// `CredentialError` when the fetch fails, or `Cancelled`.
    pub async fn certificate_chain(
        &self,
        cancel: &CancellationToken,
    ) -> SigningResult<Arc<CertificateChain>> {
        let backend = Arc::clone(&self.backend);
        let key = self.key.clone();
        let shutdown = self.shutdown.clone();
        self.chain
            .get_or_fetch(
                move || async move { fetch_chain(backend, key, shutdown).await },
                cancel,
            )
            .await
    }
}

async fn fetch_chain(
    backend: Arc<dyn RemoteSigningBackend>,
    key: String,
    shutdown: CancellationToken,
) -> SigningResult<Arc<CertificateChain>> {
    log::info!("Fetching certificate chain for remote key {key}");
    let fetched = async {
        let status = backend
            .run_operation(SubmitOperationRequest::certificate(key.as_str()), &shutdown)
            .await?;
        let ders = status
            .decode_certificate_chain()
            .map_err(SigningError::CertificateError)?;
        CertificateChain::from_der_chain(ders)
    }
    .await;

    match fetched {
        Ok(chain) => {
            log::info!(
                "Remote key {key} uses certificate {}",
                chain.leaf().thumbprint()
            );
            Ok(Arc::new(chain))
        }
        Err(SigningError::Cancelled) => Err(SigningError::Cancelled),
        Err(SigningError::CredentialError(message)) => Err(SigningError::CredentialError(message)),
        Err(other) => Err(SigningError::CredentialError(format!(
            "certificate fetch for {key} failed: {other}"
        ))),
    }
}

#[async_trait]
impl CredentialSource for RemoteCredentialSource {
    fn describe(&self) -> String {
        format!("{} key {}", self.label, self.key)
    }

    async fn certificate(&self, cancel: &CancellationToken) -> SigningResult<Arc<Certificate>> {
        Ok(Arc::clone(self.certificate_chain(cancel).await?.leaf()))
    }

    async fn signing_operation(
        &self,
        cancel: &CancellationToken,
    ) -> SigningResult<Arc<dyn SigningOperation>> {
        let chain = self.certificate_chain(cancel).await?;
        Ok(Arc::new(RemoteSigningOperation {
            backend: Arc::clone(&self.backend),
            key: self.key.clone(),
            certificate: Arc::clone(chain.leaf()),
        }))
    }

    fn close(&self) {
        self.shutdown.cancel();
        self.chain.reset();
    }
}

/// Remote key handle. Holds no key material.
pub struct RemoteSigningOperation {
    backend: Arc<dyn RemoteSigningBackend>,
    key: String,
    certificate: Arc<Certificate>,
}

#[async_trait]
impl SigningOperation for RemoteSigningOperation {
    fn certificate(&self) -> &Arc<Certificate> {
        &self.certificate
    }

    async fn sign(
        &self,
        request: &SigningRequest,
        cancel: &CancellationToken,
    ) -> SigningResult<Vec<u8>> {
        let algorithm = SignatureAlgorithm::from_parts(request.algorithm(), request.padding());
        let submit = SubmitOperationRequest::sign(self.key.as_str(), algorithm.as_str(), request.digest());
        let status = self.backend.run_operation(submit, cancel).await?;
        status
            .decode_signature()
            .map_err(|e| SigningError::SignatureError(format!("Failed to decode signature: {e}")))
    }
}
