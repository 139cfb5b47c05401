//! Credential sources: where the signing certificate and key live.
//!
//! A run resolves exactly one [`CredentialProvider`] from configuration and
//! hands it to the orchestrator as an `Arc<dyn CredentialSource>`. Every job
//! in the run shares the same certificate handle and signing capability.

use crate::adapters::local_store::{LocalKeyMaterial, LocalStoreCredential};
use crate::adapters::remote::client::{HttpSigningBackend, PollPolicy, RemoteSignerConfig};
use crate::adapters::remote::credential::RemoteCredentialSource;
use crate::domain::crypto::{Certificate, SigningRequest};
use crate::infra::config::{CredentialConfig, ProviderKind};
use crate::infra::error::{SigningError, SigningResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A source of one signing certificate and the matching key operation.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Short human-readable description for logs.
    fn describe(&self) -> String;

    /// The signing certificate. Concurrent first callers share one fetch.
    async fn certificate(&self, cancel: &CancellationToken) -> SigningResult<Arc<Certificate>>;

    /// The private-key capability bound to [`Self::certificate`].
    async fn signing_operation(
        &self,
        cancel: &CancellationToken,
    ) -> SigningResult<Arc<dyn SigningOperation>>;

    /// Release cached state and abort any in-flight fetch.
    fn close(&self) {}
}

/// Private-key capability. Remote variants never hold key material.
#[async_trait]
pub trait SigningOperation: Send + Sync {
    fn certificate(&self) -> &Arc<Certificate>;

    /// DER `SubjectPublicKeyInfo` of the signing key.
    fn public_key_der(&self) -> &[u8] {
        self.certificate().public_key_der()
    }

    /// Sign `request.digest()` and return the raw signature bytes.
    async fn sign(
        &self,
        request: &SigningRequest,
        cancel: &CancellationToken,
    ) -> SigningResult<Vec<u8>>;

    /// # Errors
    /// `UnsupportedOperation` unless the key lives in-process.
    fn export_private_key(&self) -> SigningResult<Vec<u8>> {
        Err(SigningError::UnsupportedOperation(
            "private key export is not available for this credential".to_string(),
        ))
    }

    /// # Errors
    /// `UnsupportedOperation`; keys are provisioned outside this tool.
    fn import_key(&self, _pkcs8_der: &[u8]) -> SigningResult<()> {
        Err(SigningError::UnsupportedOperation(
            "key import is not available for this credential".to_string(),
        ))
    }
}

/// The configured credential, chosen once per run.
pub enum CredentialProvider {
    LocalStore(LocalStoreCredential),
    RemoteHsm(RemoteCredentialSource),
    CloudSigning(RemoteCredentialSource),
}

impl CredentialProvider {
    /// Build the provider named by `config`. Nothing is fetched yet.
    ///
    /// # Errors
    /// `ConfigurationError` when a required setting or secret is missing.
    pub fn from_config(config: &CredentialConfig) -> SigningResult<Self> {
        match config.provider {
            ProviderKind::Local => {
                let password = std::env::var(&config.password_env).unwrap_or_default();
                let material = match (&config.pkcs12_path, &config.certificate_path, &config.key_path)
                {
                    (Some(pfx), _, _) => LocalKeyMaterial::Pkcs12 {
                        path: pfx.clone(),
                        password,
                    },
                    (None, Some(cert), Some(key)) => LocalKeyMaterial::Pem {
                        certificate: cert.clone(),
                        key: key.clone(),
                    },
                    _ => {
                        return Err(SigningError::ConfigurationError(
                            "local provider needs pkcs12_path or certificate_path + key_path"
                                .to_string(),
                        ))
                    }
                };
                Ok(Self::LocalStore(LocalStoreCredential::new(material)))
            }
            ProviderKind::Remote => {
                let key = required(config.key_name.as_deref(), "credential.key_name")?;
                let backend = Self::http_backend(config)?;
                Ok(Self::RemoteHsm(RemoteCredentialSource::new(
                    "remote-hsm",
                    Arc::new(backend),
                    key,
                )))
            }
            ProviderKind::Cloud => {
                let account = required(config.account.as_deref(), "credential.account")?;
                let profile = required(config.profile.as_deref(), "credential.profile")?;
                let backend = Self::http_backend(config)?;
                Ok(Self::CloudSigning(RemoteCredentialSource::new(
                    "cloud",
                    Arc::new(backend),
                    format!("{account}/{profile}"),
                )))
            }
        }
    }

    fn http_backend(config: &CredentialConfig) -> SigningResult<HttpSigningBackend> {
        let endpoint = required(config.endpoint.as_deref(), "credential.endpoint")?;
        let token = std::env::var(&config.token_env).map_err(|_| {
            SigningError::ConfigurationError(format!(
                "bearer token not found in environment variable {}",
                config.token_env
            ))
        })?;
        let signer_config = RemoteSignerConfig::new(endpoint, token).with_polling(PollPolicy {
            max_polls: config.max_polls,
            interval: Duration::from_millis(config.poll_interval_ms),
        });
        HttpSigningBackend::new(signer_config)
    }

    fn inner(&self) -> &dyn CredentialSource {
        match self {
            Self::LocalStore(source) => source,
            Self::RemoteHsm(source) | Self::CloudSigning(source) => source,
        }
    }
}

fn required(value: Option<&str>, name: &str) -> SigningResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| SigningError::ConfigurationError(format!("{name} is required")))
}

#[async_trait]
impl CredentialSource for CredentialProvider {
    fn describe(&self) -> String {
        self.inner().describe()
    }

    async fn certificate(&self, cancel: &CancellationToken) -> SigningResult<Arc<Certificate>> {
        self.inner().certificate(cancel).await
    }

    async fn signing_operation(
        &self,
        cancel: &CancellationToken,
    ) -> SigningResult<Arc<dyn SigningOperation>> {
        self.inner().signing_operation(cancel).await
    }

    fn close(&self) {
        self.inner().close();
    }
}
