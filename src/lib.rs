//! Batch Signer Library
//!
//! Batch code signing with pluggable credential sources (local key stores,
//! remote HSMs and cloud signing services), RFC 3161 timestamping and a
//! concurrency-bounded orchestrator that signs many files with one credential.

pub mod adapters;
pub mod domain;
pub mod infra;
pub mod pipelines;
pub mod services;

use const_oid::ObjectIdentifier;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::str::FromStr;

pub use adapters::credential::{CredentialProvider, CredentialSource, SigningOperation};
pub use domain::crypto::{Certificate, SignaturePadding, SigningRequest};
pub use domain::job::{SignJob, SigningMetadata};
pub use domain::outcome::{BatchOutcome, FileOutcome};
pub use domain::types::TimestampUrl;
pub use infra::error::{SigningError, SigningResult};
pub use pipelines::batch::{BatchRequest, SigningOrchestrator};
pub use services::cert_verifier::CertificateVerifier;
pub use services::nonce::{Nonce, NonceGenerator};
pub use services::timestamp::{TimestampClient, TimestampFailure, TimestampResult};

/// Supported hash algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    pub fn digest_size(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Resolve a raw digest length to the SHA-2 variant that produces it.
    ///
    /// # Errors
    /// Returns `UnsupportedDigestLength` for anything other than 32, 48 or 64.
    pub fn from_digest_len(len: usize) -> SigningResult<Self> {
        match len {
            32 => Ok(HashAlgorithm::Sha256),
            48 => Ok(HashAlgorithm::Sha384),
            64 => Ok(HashAlgorithm::Sha512),
            other => Err(SigningError::UnsupportedDigestLength(other)),
        }
    }

    /// Object identifier used in `AlgorithmIdentifier` structures.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            HashAlgorithm::Sha256 => domain::constants::OID_SHA256,
            HashAlgorithm::Sha384 => domain::constants::OID_SHA384,
            HashAlgorithm::Sha512 => domain::constants::OID_SHA512,
        }
    }

    /// Hash `data` with this algorithm.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha384" => Ok(HashAlgorithm::Sha384),
            "sha512" => Ok(HashAlgorithm::Sha512),
            _ => Err(SigningError::InvalidInput(format!(
                "Unknown hash algorithm: {s}"
            ))),
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
