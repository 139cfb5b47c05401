//! Format signer registry.
//!
//! Format signers own the container-specific work. The orchestrator sniffs
//! each input, asks the registry for the first signer that accepts it, and
//! hands that signer a [`SigningContext`] with the run's shared capabilities.

use crate::adapters::credential::CredentialSource;
use crate::domain::crypto::{SignaturePadding, SigningRequest};
use crate::domain::format::FileFormat;
use crate::domain::job::SignJob;
use crate::infra::error::{SigningError, SigningResult};
use crate::services::detached_signer::DetachedSigner;
use crate::services::nonce::NonceGenerator;
use crate::services::timestamp::{TimestampClient, TimestampFailure, TimestampResult, TimestampToken};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Signs one container kind.
#[async_trait]
pub trait FormatSigner: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn can_sign(&self, path: &Path, format: FileFormat) -> bool;

    /// Sign `job.input_file` into `job.output_file`.
    async fn sign(&self, job: &SignJob, ctx: &SigningContext) -> SigningResult<()>;
}

/// Capabilities shared by every job of a run.
#[derive(Clone)]
pub struct SigningContext {
    pub credential: Arc<dyn CredentialSource>,
    pub timestamp_client: TimestampClient,
    pub nonces: NonceGenerator,
    pub timestamp_timeout: Duration,
    /// Attempts per timestamp, at least one.
    pub timestamp_retry_attempts: u32,
    pub timestamp_retry_delay: Duration,
    pub cancel: CancellationToken,
}

impl SigningContext {
    #[must_use]
    pub fn new(credential: Arc<dyn CredentialSource>, timestamp_client: TimestampClient) -> Self {
        Self {
            credential,
            timestamp_client,
            nonces: NonceGenerator,
            timestamp_timeout: Duration::from_secs(
                crate::domain::constants::DEFAULT_TIMESTAMP_TIMEOUT_SECS,
            ),
            timestamp_retry_attempts: 3,
            timestamp_retry_delay: Duration::from_secs(2),
            cancel: CancellationToken::new(),
        }
    }

    /// Sign a digest with the run's credential.
    ///
    /// # Errors
    /// Credential, signing or digest-shape errors.
    pub async fn sign_digest(
        &self,
        digest: Vec<u8>,
        padding: SignaturePadding,
    ) -> SigningResult<Vec<u8>> {
        let request = SigningRequest::new(digest, padding)?;
        let operation = self.credential.signing_operation(&self.cancel).await?;
        operation.sign(&request, &self.cancel).await
    }

    /// Timestamp `signature` against the job's TSA, retrying transient
    /// failures. `None` when the job has no timestamp URL.
    ///
    /// # Errors
    /// `TimestampError` once every attempt failed, or `Cancelled`.
    pub async fn timestamp_signature(
        &self,
        job: &SignJob,
        signature: &[u8],
    ) -> SigningResult<Option<TimestampToken>> {
        let Some(url) = &job.timestamp_url else {
            return Ok(None);
        };

        let attempts = self.timestamp_retry_attempts.max(1);
        let mut last_failure = None;
        for attempt in 1..=attempts {
            log::debug!("Timestamp attempt {attempt} of {attempts} for {url}");
            let result = self
                .timestamp_client
                .request_timestamp(
                    url,
                    job.timestamp_hash_algorithm,
                    self.nonces.generate(),
                    self.timestamp_timeout,
                    signature,
                    &self.cancel,
                )
                .await?;

            match result {
                TimestampResult::Success(token) => return Ok(Some(token)),
                TimestampResult::PackageNotSigned => {
                    return Err(SigningError::TimestampError(format!(
                        "{}: nothing to timestamp, the signature is empty",
                        job.display_name()
                    )))
                }
                TimestampResult::Failed(TimestampFailure::Cancelled) => {
                    return Err(SigningError::Cancelled)
                }
                TimestampResult::Failed(failure) => {
                    log::warn!("Timestamp attempt {attempt} for {} failed: {failure}", job.display_name());
                    last_failure = Some(failure);
                    if attempt < attempts {
                        tokio::select! {
                            biased;
                            () = self.cancel.cancelled() => return Err(SigningError::Cancelled),
                            () = tokio::time::sleep(self.timestamp_retry_delay) => {}
                        }
                    }
                }
            }
        }

        Err(SigningError::TimestampError(match last_failure {
            Some(failure) => format!("{url}: {failure} (after {attempts} attempts)"),
            None => format!("{url}: no attempt made"),
        }))
    }
}

/// Ordered set of format signers. The first accepting signer wins.
#[derive(Clone, Default)]
pub struct FormatSignerRegistry {
    signers: Vec<Arc<dyn FormatSigner>>,
}

impl FormatSignerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in detached signer.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DetachedSigner::new()));
        registry
    }

    pub fn register(&mut self, signer: Arc<dyn FormatSigner>) -> &mut Self {
        self.signers.push(signer);
        self
    }

    #[must_use]
    pub fn select(&self, path: &Path, format: FileFormat) -> Option<Arc<dyn FormatSigner>> {
        self.signers
            .iter()
            .find(|signer| signer.can_sign(path, format))
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.signers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Only(FileFormat, &'static str);

    #[async_trait]
    impl FormatSigner for Only {
        fn name(&self) -> &'static str {
            self.1
        }
        fn can_sign(&self, _path: &Path, format: FileFormat) -> bool {
            format == self.0
        }
        async fn sign(&self, _job: &SignJob, _ctx: &SigningContext) -> SigningResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_first_accepting_signer_wins() {
        let mut registry = FormatSignerRegistry::new();
        registry
            .register(Arc::new(Only(FileFormat::Pe, "pe-a")))
            .register(Arc::new(Only(FileFormat::Pe, "pe-b")))
            .register(Arc::new(Only(FileFormat::Msi, "msi")));

        let path = Path::new("setup.exe");
        assert_eq!(registry.select(path, FileFormat::Pe).unwrap().name(), "pe-a");
        assert_eq!(registry.select(path, FileFormat::Msi).unwrap().name(), "msi");
        assert!(registry.select(path, FileFormat::Opc).is_none());
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_builtin_registry_rejects_unknown() {
        let registry = FormatSignerRegistry::with_builtin();
        assert!(registry
            .select(Path::new("blob.bin"), FileFormat::Unknown)
            .is_none());
        assert!(registry
            .select(Path::new("app.exe"), FileFormat::Pe)
            .is_some());
    }
}
