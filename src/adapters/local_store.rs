//! In-process key store credential.
//!
//! Loads a PKCS#12 bundle (or a PEM certificate and key pair) through
//! OpenSSL on first use and signs digests locally on the blocking pool.

use crate::adapters::credential::{CredentialSource, SigningOperation};
use crate::domain::crypto::{Certificate, CertificateChain, SignaturePadding, SigningRequest};
use crate::infra::error::{SigningError, SigningResult};
use crate::infra::single_flight::SingleFlight;
use crate::HashAlgorithm;
use async_trait::async_trait;
use openssl::md::Md;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{Id, PKey, Private};
use openssl::pkey_ctx::PkeyCtx;
use openssl::rsa::Padding;
use openssl::sign::RsaPssSaltlen;
use openssl::x509::X509;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Where the local key material comes from.
#[derive(Clone)]
pub enum LocalKeyMaterial {
    Pkcs12 { path: PathBuf, password: String },
    Pem { certificate: PathBuf, key: PathBuf },
}

impl fmt::Display for LocalKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pkcs12 { path, .. } => write!(f, "pkcs12:{}", path.display()),
            Self::Pem { certificate, .. } => write!(f, "pem:{}", certificate.display()),
        }
    }
}

// Never print the password.
impl fmt::Debug for LocalKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalKeyMaterial({self})")
    }
}

fn credential_error(context: &'static str) -> impl Fn(openssl::error::ErrorStack) -> SigningError {
    move |e| SigningError::CredentialError(format!("{context}: {e}"))
}

/// A loaded private key together with its certificate chain.
pub struct LocalSigningOperation {
    chain: Arc<CertificateChain>,
    key: PKey<Private>,
}

impl LocalSigningOperation {
    /// Read and parse `material` from disk. Blocking.
    ///
    /// # Errors
    /// `CredentialError` if the files cannot be read or parsed, or if the
    /// key does not match the certificate.
    pub fn load(material: &LocalKeyMaterial) -> SigningResult<Self> {
        match material {
            LocalKeyMaterial::Pkcs12 { path, password } => {
                let der = std::fs::read(path).map_err(|e| {
                    SigningError::CredentialError(format!("{}: {e}", path.display()))
                })?;
                Self::from_pkcs12_der(&der, password)
            }
            LocalKeyMaterial::Pem { certificate, key } => {
                let cert_pem = std::fs::read(certificate).map_err(|e| {
                    SigningError::CredentialError(format!("{}: {e}", certificate.display()))
                })?;
                let key_pem = std::fs::read(key).map_err(|e| {
                    SigningError::CredentialError(format!("{}: {e}", key.display()))
                })?;
                Self::from_pem(&cert_pem, &key_pem)
            }
        }
    }

    /// # Errors
    /// `CredentialError` for a bad bundle, wrong password or missing parts.
    pub fn from_pkcs12_der(der: &[u8], password: &str) -> SigningResult<Self> {
        let parsed = Pkcs12::from_der(der)
            .map_err(credential_error("Invalid PKCS#12 bundle"))?
            .parse2(password)
            .map_err(credential_error("Cannot open PKCS#12 bundle"))?;
        let key = parsed.pkey.ok_or_else(|| {
            SigningError::CredentialError("PKCS#12 bundle has no private key".to_string())
        })?;
        let cert = parsed.cert.ok_or_else(|| {
            SigningError::CredentialError("PKCS#12 bundle has no certificate".to_string())
        })?;
        let extra = parsed
            .ca
            .map(|stack| stack.into_iter().collect())
            .unwrap_or_default();
        Self::from_parts(&cert, key, extra)
    }

    /// # Errors
    /// `CredentialError` if either PEM blob is invalid or they do not match.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> SigningResult<Self> {
        let mut certs =
            X509::stack_from_pem(cert_pem).map_err(credential_error("Invalid certificate PEM"))?;
        if certs.is_empty() {
            return Err(SigningError::CredentialError(
                "certificate file holds no certificate".to_string(),
            ));
        }
        let leaf = certs.remove(0);
        let key =
            PKey::private_key_from_pem(key_pem).map_err(credential_error("Invalid key PEM"))?;
        Self::from_parts(&leaf, key, certs)
    }

    fn from_parts(leaf: &X509, key: PKey<Private>, intermediates: Vec<X509>) -> SigningResult<Self> {
        let public = leaf
            .public_key()
            .map_err(credential_error("Certificate public key"))?;
        if !public.public_eq(&key) {
            return Err(SigningError::CredentialError(
                "private key does not match the certificate".to_string(),
            ));
        }

        let mut ders = vec![leaf.to_der()?];
        for cert in &intermediates {
            ders.push(cert.to_der()?);
        }
        let chain = CertificateChain::from_der_chain(ders)?;
        log::debug!("Loaded local key for {}", chain.leaf().subject());

        Ok(Self {
            chain: Arc::new(chain),
            key,
        })
    }

    #[must_use]
    pub fn chain(&self) -> &Arc<CertificateChain> {
        &self.chain
    }
}

fn message_digest(algorithm: HashAlgorithm) -> &'static openssl::md::MdRef {
    match algorithm {
        HashAlgorithm::Sha256 => Md::sha256(),
        HashAlgorithm::Sha384 => Md::sha384(),
        HashAlgorithm::Sha512 => Md::sha512(),
    }
}

fn sign_digest(key: &PKey<Private>, request: &SigningRequest) -> SigningResult<Vec<u8>> {
    let is_rsa = key.id() == Id::RSA;
    let pss = request.padding() == SignaturePadding::Pss;
    if pss && !is_rsa {
        return Err(SigningError::UnsupportedOperation(
            "PSS padding requires an RSA key".to_string(),
        ));
    }

    let mut ctx = PkeyCtx::new(key)?;
    ctx.sign_init()?;
    if is_rsa {
        ctx.set_rsa_padding(if pss { Padding::PKCS1_PSS } else { Padding::PKCS1 })?;
    }
    ctx.set_signature_md(message_digest(request.algorithm()))?;
    if pss {
        ctx.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)?;
    }

    let mut signature = Vec::new();
    ctx.sign_to_vec(request.digest(), &mut signature)?;
    Ok(signature)
}

#[async_trait]
impl SigningOperation for LocalSigningOperation {
    fn certificate(&self) -> &Arc<Certificate> {
        self.chain.leaf()
    }

    async fn sign(
        &self,
        request: &SigningRequest,
        cancel: &CancellationToken,
    ) -> SigningResult<Vec<u8>> {
        let key = self.key.clone();
        let request = request.clone();
        let task = tokio::task::spawn_blocking(move || sign_digest(&key, &request));

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SigningError::Cancelled),
            joined = task => match joined {
                Ok(result) => result,
                Err(e) => Err(SigningError::SignatureError(format!("signing task failed: {e}"))),
            },
        }
    }

    fn export_private_key(&self) -> SigningResult<Vec<u8>> {
        Ok(self.key.private_key_to_pkcs8()?)
    }
}

/// Credential backed by a local PKCS#12 or PEM key store.
pub struct LocalStoreCredential {
    material: LocalKeyMaterial,
    loaded: SingleFlight<Arc<LocalSigningOperation>>,
}

impl LocalStoreCredential {
    #[must_use]
    pub fn new(material: LocalKeyMaterial) -> Self {
        Self {
            material,
            loaded: SingleFlight::new(),
        }
    }

    /// Number of times the store was actually opened.
    pub fn loads_started(&self) -> usize {
        self.loaded.fetches_started()
    }

    async fn load(&self, cancel: &CancellationToken) -> SigningResult<Arc<LocalSigningOperation>> {
        let material = self.material.clone();
        self.loaded
            .get_or_fetch(
                move || async move {
                    tokio::task::spawn_blocking(move || LocalSigningOperation::load(&material))
                        .await
                        .map_err(|e| {
                            SigningError::CredentialError(format!("key store loader failed: {e}"))
                        })?
                        .map(Arc::new)
                },
                cancel,
            )
            .await
    }
}

#[async_trait]
impl CredentialSource for LocalStoreCredential {
    fn describe(&self) -> String {
        format!("local key store ({})", self.material)
    }

    async fn certificate(&self, cancel: &CancellationToken) -> SigningResult<Arc<Certificate>> {
        Ok(self.load(cancel).await?.certificate().clone())
    }

    async fn signing_operation(
        &self,
        cancel: &CancellationToken,
    ) -> SigningResult<Arc<dyn SigningOperation>> {
        let operation: Arc<dyn SigningOperation> = self.load(cancel).await?;
        Ok(operation)
    }

    fn close(&self) {
        self.loaded.reset();
    }
}
