//! Protocol definitions for remote signing.
//!
//! Every remote action is an asynchronous operation: the client submits it,
//! receives an operation id, and polls until the operation reaches a
//! terminal state. Binary payloads travel as standard base64.

use base64::Engine;
use serde::{Deserialize, Serialize};

/// API version for protocol compatibility checks.
pub const PROTOCOL_VERSION: &str = "1.0";

fn b64() -> &'static base64::engine::GeneralPurpose {
    &base64::engine::general_purpose::STANDARD
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Fetch (or issue) the certificate chain for a key.
    Certificate,
    /// Sign a digest with a key.
    Sign,
}

/// `POST /api/v1/operations`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOperationRequest {
    pub version: String,
    pub kind: OperationKind,
    /// Key identifier: an HSM key name, or `account/profile` for cloud keys.
    pub key: String,
    /// Signature algorithm selector (`RS256` .. `PS512`), sign only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    /// Base64 digest, sign only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest_b64: Option<String>,
}

impl SubmitOperationRequest {
    #[must_use]
    pub fn certificate(key: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            kind: OperationKind::Certificate,
            key: key.into(),
            algorithm: None,
            digest_b64: None,
        }
    }

    #[must_use]
    pub fn sign(key: impl Into<String>, algorithm: &str, digest: &[u8]) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            kind: OperationKind::Sign,
            key: key.into(),
            algorithm: Some(algorithm.to_string()),
            digest_b64: Some(b64().encode(digest)),
        }
    }

    /// Decode the digest from base64.
    ///
    /// # Errors
    /// Returns error if the digest is missing or not valid base64.
    pub fn decode_digest(&self) -> Result<Vec<u8>, String> {
        let encoded = self
            .digest_b64
            .as_deref()
            .ok_or_else(|| "sign operation without digest".to_string())?;
        b64().decode(encoded).map_err(|e| e.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOperationResponse {
    pub version: String,
    pub operation_id: String,
}

impl SubmitOperationResponse {
    #[must_use]
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            operation_id: operation_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Running,
    Succeeded,
    Failed,
}

/// `GET /api/v1/operations/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStatusResponse {
    pub version: String,
    pub operation_id: String,
    pub status: OperationStatus,
    /// Base64 DER certificates, leaf first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_chain_b64: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_b64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

impl OperationStatusResponse {
    #[must_use]
    pub fn running(operation_id: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            operation_id: operation_id.into(),
            status: OperationStatus::Running,
            certificate_chain_b64: None,
            signature_b64: None,
            error: None,
        }
    }

    #[must_use]
    pub fn certificate_chain(operation_id: impl Into<String>, chain: &[Vec<u8>]) -> Self {
        Self {
            status: OperationStatus::Succeeded,
            certificate_chain_b64: Some(chain.iter().map(|c| b64().encode(c)).collect()),
            ..Self::running(operation_id)
        }
    }

    #[must_use]
    pub fn signature(operation_id: impl Into<String>, signature: &[u8]) -> Self {
        Self {
            status: OperationStatus::Succeeded,
            signature_b64: Some(b64().encode(signature)),
            ..Self::running(operation_id)
        }
    }

    #[must_use]
    pub fn failed(operation_id: impl Into<String>, error: ErrorResponse) -> Self {
        Self {
            status: OperationStatus::Failed,
            error: Some(error),
            ..Self::running(operation_id)
        }
    }

    /// # Errors
    /// Returns error if the chain is missing or not valid base64.
    pub fn decode_certificate_chain(&self) -> Result<Vec<Vec<u8>>, String> {
        self.certificate_chain_b64
            .as_ref()
            .ok_or_else(|| "operation result has no certificate chain".to_string())?
            .iter()
            .map(|c| b64().decode(c).map_err(|e| e.to_string()))
            .collect()
    }

    /// # Errors
    /// Returns error if the signature is missing or not valid base64.
    pub fn decode_signature(&self) -> Result<Vec<u8>, String> {
        let encoded = self
            .signature_b64
            .as_deref()
            .ok_or_else(|| "operation result has no signature".to_string())?;
        b64().decode(encoded).map_err(|e| e.to_string())
    }
}

/// `GET /api/v1/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub ready: bool,
    /// Key identifiers the server can use.
    pub keys: Vec<String>,
    pub uptime_seconds: u64,
}

/// Error response from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub version: String,
    /// Error code for programmatic handling.
    pub error_code: String,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            error_code: code.into(),
            message: message.into(),
        }
    }
}

/// Known error codes returned by the server.
pub mod error_codes {
    /// Authentication failed (bad token).
    pub const AUTH_FAILED: &str = "AUTH_FAILED";
    /// No such key on the server.
    pub const KEY_NOT_FOUND: &str = "KEY_NOT_FOUND";
    /// Algorithm selector unknown or inconsistent with the digest.
    pub const UNSUPPORTED_ALGORITHM: &str = "UNSUPPORTED_ALGORITHM";
    /// Signing operation failed.
    pub const SIGNING_FAILED: &str = "SIGNING_FAILED";
    /// Unknown operation id.
    pub const OPERATION_NOT_FOUND: &str = "OPERATION_NOT_FOUND";
    /// Protocol version mismatch.
    pub const VERSION_MISMATCH: &str = "VERSION_MISMATCH";
    /// Malformed request.
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
}
