use crate::infra::error::{SigningError, SigningResult};
use der::{Decode, DecodePem, Encode};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// Parsed, immutable signing certificate.
///
/// Owned by the credential source that fetched it; everyone else holds an
/// `Arc<Certificate>` handle.
#[derive(Clone)]
pub struct Certificate {
    der: Box<[u8]>,
    subject: String,
    issuer: String,
    serial_hex: String,
    thumbprint: String,
    not_before: SystemTime,
    not_after: SystemTime,
    public_key_der: Box<[u8]>,
}

/// Where a point in time falls relative to a certificate's validity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeValidity {
    NotYetValid,
    Valid,
    Expired,
}

impl Certificate {
    /// Parse a DER-encoded X.509 certificate.
    ///
    /// # Errors
    /// Returns `CertificateError` if the bytes are not a certificate.
    pub fn from_der(der: Vec<u8>) -> SigningResult<Self> {
        let parsed = x509_cert::Certificate::from_der(&der)
            .map_err(|e| SigningError::CertificateError(format!("Invalid certificate DER: {e}")))?;
        Self::from_parsed(&parsed, der)
    }

    /// Parse a PEM-encoded X.509 certificate.
    ///
    /// # Errors
    /// Returns `CertificateError` if the text is not a PEM certificate.
    pub fn from_pem(pem: &[u8]) -> SigningResult<Self> {
        let parsed = x509_cert::Certificate::from_pem(pem)
            .map_err(|e| SigningError::CertificateError(format!("Invalid certificate PEM: {e}")))?;
        let der = parsed.to_der()?;
        Self::from_parsed(&parsed, der)
    }

    fn from_parsed(parsed: &x509_cert::Certificate, der: Vec<u8>) -> SigningResult<Self> {
        let tbs = &parsed.tbs_certificate;
        let public_key_der = tbs.subject_public_key_info.to_der()?;
        Ok(Self {
            subject: tbs.subject.to_string(),
            issuer: tbs.issuer.to_string(),
            serial_hex: hex::encode(tbs.serial_number.as_bytes()),
            thumbprint: hex::encode_upper(Sha256::digest(&der)),
            not_before: tbs.validity.not_before.to_system_time(),
            not_after: tbs.validity.not_after.to_system_time(),
            public_key_der: public_key_der.into_boxed_slice(),
            der: der.into_boxed_slice(),
        })
    }

    #[must_use]
    pub fn as_der(&self) -> &[u8] {
        &self.der
    }
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }
    #[must_use]
    pub fn serial_hex(&self) -> &str {
        &self.serial_hex
    }
    /// Upper-case hex SHA-256 of the DER encoding.
    #[must_use]
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }
    #[must_use]
    pub fn not_before(&self) -> SystemTime {
        self.not_before
    }
    #[must_use]
    pub fn not_after(&self) -> SystemTime {
        self.not_after
    }
    /// DER `SubjectPublicKeyInfo`.
    #[must_use]
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    #[must_use]
    pub fn is_self_signed(&self) -> bool {
        self.subject == self.issuer
    }

    /// Classify `now` against the validity window (bounds inclusive).
    #[must_use]
    pub fn time_validity_at(&self, now: SystemTime) -> TimeValidity {
        if now < self.not_before {
            TimeValidity::NotYetValid
        } else if now > self.not_after {
            TimeValidity::Expired
        } else {
            TimeValidity::Valid
        }
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Certificate(subject={}, thumbprint={})",
            self.subject, self.thumbprint
        )
    }
}

/// Ordered certificate chain: leaf first, then intermediates. Root excluded.
#[derive(Clone)]
pub struct CertificateChain {
    leaf: Arc<Certificate>,
    intermediates: Vec<Certificate>,
}

impl CertificateChain {
    #[must_use]
    pub fn new(leaf: Certificate) -> Self {
        Self {
            leaf: Arc::new(leaf),
            intermediates: Vec::new(),
        }
    }

    /// Import a chain of DER certificates (leaf first).
    ///
    /// # Errors
    /// Returns `CertificateError` for an empty chain or unparsable member.
    pub fn from_der_chain(chain: Vec<Vec<u8>>) -> SigningResult<Self> {
        let mut members = chain.into_iter();
        let leaf = members.next().ok_or_else(|| {
            SigningError::CertificateError("Certificate chain is empty".to_string())
        })?;
        let leaf = Certificate::from_der(leaf)?;
        let intermediates = members
            .map(Certificate::from_der)
            .collect::<SigningResult<Vec<_>>>()?;
        Ok(Self::new(leaf).with_intermediates(intermediates))
    }

    #[must_use]
    pub fn with_intermediates(mut self, list: Vec<Certificate>) -> Self {
        self.intermediates = list;
        self
    }
    #[must_use]
    pub fn leaf(&self) -> &Arc<Certificate> {
        &self.leaf
    }
    #[must_use]
    pub fn intermediates(&self) -> &[Certificate] {
        &self.intermediates
    }
}

impl fmt::Debug for CertificateChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CertificateChain(leaf={}, intermediates={})",
            self.leaf.subject,
            self.intermediates.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_garbage() {
        assert!(Certificate::from_der(vec![0x30, 0x03, 0x02, 0x01, 0x01]).is_err());
        assert!(Certificate::from_pem(b"not a pem").is_err());
    }

    #[test]
    fn empty_chain_is_an_error() {
        let err = CertificateChain::from_der_chain(Vec::new()).unwrap_err();
        assert!(matches!(err, SigningError::CertificateError(_)));
    }
}
