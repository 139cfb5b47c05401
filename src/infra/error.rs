//! Error handling types and result definitions for signing operations.

use thiserror::Error;

/// Result type for signing operations
pub type SigningResult<T> = Result<T, SigningError>;

/// Error types for batch signing operations.
///
/// The enum is `Clone` so that a single credential fetch failure can be handed
/// to every caller that was waiting on the same fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq, miette::Diagnostic)]
pub enum SigningError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Certificate error: {0}")]
    CertificateError(String),

    #[error("Credential error: {0}")]
    CredentialError(String),

    #[error("Unsupported digest length: {0} bytes (expected 32, 48 or 64)")]
    #[diagnostic(help("use SHA-256, SHA-384 or SHA-512 digests"))]
    UnsupportedDigestLength(usize),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Signature creation error: {0}")]
    SignatureError(String),

    #[error("Timestamp error: {0}")]
    TimestampError(String),

    #[error("Unsupported file format: {0}")]
    FormatError(String),

    #[error("Remote signing error [{code}]: {message}")]
    RemoteError { code: String, message: String },

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("ASN.1 encoding/decoding error: {0}")]
    Asn1Error(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl SigningError {
    /// Whether this error means no credential is available for the run.
    #[must_use]
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, Self::CredentialError(_))
    }
}

impl From<der::Error> for SigningError {
    fn from(error: der::Error) -> Self {
        SigningError::Asn1Error(error.to_string())
    }
}

impl From<reqwest::Error> for SigningError {
    fn from(error: reqwest::Error) -> Self {
        SigningError::NetworkError(error.to_string())
    }
}

impl From<std::io::Error> for SigningError {
    fn from(error: std::io::Error) -> Self {
        SigningError::IoError(error.to_string())
    }
}

impl From<openssl::error::ErrorStack> for SigningError {
    fn from(error: openssl::error::ErrorStack) -> Self {
        SigningError::SignatureError(format!("OpenSSL: {error}"))
    }
}

impl From<serde_json::Error> for SigningError {
    fn from(error: serde_json::Error) -> Self {
        SigningError::InvalidInput(format!("JSON: {error}"))
    }
}
