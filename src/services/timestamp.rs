//! RFC 3161 timestamp client.
//!
//! A request is bound to its reply by nonce and message imprint; a reply
//! that does not echo both is treated as a protocol failure. Transport and
//! protocol problems are returned as values so the calling format signer can
//! decide whether to retry.

use crate::adapters::timestamp_http_client::TimestampHttpClient;
use crate::domain::constants::{OID_SIGNED_DATA, OID_TST_INFO};
use crate::domain::tsp::{TimeStampResp, TstInfo};
use crate::domain::types::TimestampUrl;
use crate::infra::error::{SigningError, SigningResult};
use crate::services::nonce::Nonce;
use crate::services::timestamp_request_builder::{BuiltRequest, TimestampRequestBuilder};
use crate::HashAlgorithm;
use cms::content_info::ContentInfo;
use cms::signed_data::SignedData;
use der::asn1::OctetString;
use der::{Decode, Encode};
use std::fmt;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

/// Why a timestamp could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampFailure {
    /// The TSA answered with something other than HTTP 200.
    HttpStatus(u16),
    /// No reply within the caller's timeout.
    Timeout,
    /// Connection or I/O failure.
    Transport(String),
    /// Reply could not be decoded or does not match the request.
    Protocol(String),
    Cancelled,
}

impl fmt::Display for TimestampFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HttpStatus(code) => write!(f, "TSA returned HTTP {code}"),
            Self::Timeout => write!(f, "TSA request timed out"),
            Self::Transport(msg) => write!(f, "TSA transport error: {msg}"),
            Self::Protocol(msg) => write!(f, "TSA protocol error: {msg}"),
            Self::Cancelled => write!(f, "TSA request cancelled"),
        }
    }
}

impl From<TimestampFailure> for SigningError {
    fn from(failure: TimestampFailure) -> Self {
        match failure {
            TimestampFailure::Cancelled => SigningError::Cancelled,
            other => SigningError::TimestampError(other.to_string()),
        }
    }
}

/// A verified timestamp token (`ContentInfo` wrapping `SignedData`).
#[derive(Clone, PartialEq, Eq)]
pub struct TimestampToken {
    der: Vec<u8>,
    hash_algorithm: HashAlgorithm,
    hashed_message: Vec<u8>,
    gen_time: SystemTime,
    serial_hex: String,
}

impl TimestampToken {
    /// Decode a token and its `TSTInfo`.
    ///
    /// # Errors
    /// `TimestampError` when the bytes are not a timestamp token.
    pub fn from_der(der: &[u8]) -> SigningResult<Self> {
        let (tst, der) = decode_token(der).map_err(SigningError::TimestampError)?;
        Self::from_parts(der, &tst).map_err(SigningError::TimestampError)
    }

    fn from_parts(der: Vec<u8>, tst: &TstInfo) -> Result<Self, String> {
        let hash_algorithm = tst
            .message_imprint
            .hash_algorithm
            .hash_algorithm()
            .ok_or_else(|| {
                format!(
                    "unsupported imprint algorithm {}",
                    tst.message_imprint.hash_algorithm.algorithm
                )
            })?;
        Ok(Self {
            der,
            hash_algorithm,
            hashed_message: tst.message_imprint.hashed_message.as_bytes().to_vec(),
            gen_time: tst.gen_time.to_system_time(),
            serial_hex: hex::encode(tst.serial_number.as_bytes()),
        })
    }

    #[must_use]
    pub fn as_der(&self) -> &[u8] {
        &self.der
    }
    #[must_use]
    pub fn into_der(self) -> Vec<u8> {
        self.der
    }
    #[must_use]
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_algorithm
    }
    #[must_use]
    pub fn hashed_message(&self) -> &[u8] {
        &self.hashed_message
    }
    #[must_use]
    pub fn gen_time(&self) -> SystemTime {
        self.gen_time
    }
    #[must_use]
    pub fn serial_hex(&self) -> &str {
        &self.serial_hex
    }
}

impl fmt::Debug for TimestampToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TimestampToken(algo={}, serial={}, len={})",
            self.hash_algorithm,
            self.serial_hex,
            self.der.len()
        )
    }
}

/// Outcome of one timestamp request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampResult {
    Success(TimestampToken),
    /// There was nothing to timestamp: the artifact carries no base signature.
    PackageNotSigned,
    Failed(TimestampFailure),
}

impl TimestampResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Convert to a `Result`, mapping non-success outcomes to errors.
    pub fn into_token(self) -> SigningResult<TimestampToken> {
        match self {
            Self::Success(token) => Ok(token),
            Self::PackageNotSigned => Err(SigningError::TimestampError(
                "nothing to timestamp: content is not signed".to_string(),
            )),
            Self::Failed(failure) => Err(failure.into()),
        }
    }
}

/// RFC 3161 timestamp client.
#[derive(Clone)]
pub struct TimestampClient {
    http: TimestampHttpClient,
    builder: TimestampRequestBuilder,
}

impl TimestampClient {
    /// # Errors
    /// `NetworkError` if the HTTP client cannot be built.
    pub fn new() -> SigningResult<Self> {
        Ok(Self::with_http(TimestampHttpClient::new()?))
    }

    #[must_use]
    pub fn with_http(http: TimestampHttpClient) -> Self {
        Self {
            http,
            builder: TimestampRequestBuilder::new(),
        }
    }

    /// Hash `content` and timestamp the digest.
    ///
    /// Empty `content` yields `PackageNotSigned`.
    ///
    /// # Errors
    /// Only for malformed requests (`UnsupportedDigestLength`, `Asn1Error`);
    /// everything that can go wrong on the wire is a `Failed` value.
    pub async fn request_timestamp(
        &self,
        uri: &TimestampUrl,
        digest_algorithm: HashAlgorithm,
        nonce: Nonce,
        timeout: Duration,
        content: &[u8],
        cancel: &CancellationToken,
    ) -> SigningResult<TimestampResult> {
        if content.is_empty() {
            return Ok(TimestampResult::PackageNotSigned);
        }
        let digest = digest_algorithm.digest(content);
        self.request_for_digest(uri, &digest, nonce, timeout, cancel)
            .await
    }

    /// Timestamp a precomputed digest.
    ///
    /// # Errors
    /// `UnsupportedDigestLength` when the digest is not 32, 48 or 64 bytes.
    pub async fn request_for_digest(
        &self,
        uri: &TimestampUrl,
        digest: &[u8],
        nonce: Nonce,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> SigningResult<TimestampResult> {
        let request = self.builder.build(digest, nonce)?;
        log::debug!("Requesting {} timestamp from {}", request.algorithm, uri);

        let body = match self
            .http
            .post(uri, request.der.clone(), timeout, cancel)
            .await
        {
            Ok(body) => body,
            Err(failure) => {
                log::warn!("Timestamp request to {uri} failed: {failure}");
                return Ok(TimestampResult::Failed(failure));
            }
        };

        match parse_response(&body, &request) {
            Ok(token) => {
                log::info!(
                    "Obtained timestamp from {} (serial {})",
                    uri,
                    token.serial_hex()
                );
                Ok(TimestampResult::Success(token))
            }
            Err(msg) => {
                log::warn!("Rejected timestamp reply from {uri}: {msg}");
                Ok(TimestampResult::Failed(TimestampFailure::Protocol(msg)))
            }
        }
    }
}

/// Decode a `TimeStampResp` and check it against `request`.
fn parse_response(body: &[u8], request: &BuiltRequest) -> Result<TimestampToken, String> {
    let resp =
        TimeStampResp::from_der_bytes(body).map_err(|e| format!("bad TimeStampResp: {e}"))?;
    if !resp.status.is_granted() {
        let detail = resp
            .status
            .status_string
            .as_ref()
            .map(|s| s.join("; "))
            .unwrap_or_default();
        return Err(format!(
            "request not granted (status {}) {detail}",
            resp.status.status
        ));
    }
    let token = resp
        .time_stamp_token
        .ok_or_else(|| "granted reply carries no token".to_string())?;
    let token_der = token.to_der().map_err(|e| e.to_string())?;
    let (tst, der) = decode_token(&token_der)?;

    match &tst.nonce {
        Some(nonce) if request.nonce.matches(nonce) => {}
        Some(_) => return Err("nonce mismatch".to_string()),
        None => return Err("reply omits the nonce".to_string()),
    }
    if tst.message_imprint.hash_algorithm.algorithm != request.algorithm.oid() {
        return Err(format!(
            "imprint algorithm {} does not match request {}",
            tst.message_imprint.hash_algorithm.algorithm,
            request.algorithm.oid()
        ));
    }
    if tst.message_imprint.hashed_message.as_bytes() != request.digest.as_slice() {
        return Err("imprint digest does not match request".to_string());
    }

    TimestampToken::from_parts(der, &tst)
}

/// Unwrap `ContentInfo` / `SignedData` / `TSTInfo`, returning the TSTInfo and
/// the canonical re-encoding of the `ContentInfo`.
fn decode_token(der: &[u8]) -> Result<(TstInfo, Vec<u8>), String> {
    let content_info =
        ContentInfo::from_der(der).map_err(|e| format!("bad token ContentInfo: {e}"))?;
    if content_info.content_type != OID_SIGNED_DATA {
        return Err(format!(
            "token content type {} is not signed-data",
            content_info.content_type
        ));
    }
    let signed: SignedData = content_info
        .content
        .decode_as()
        .map_err(|e| format!("bad token SignedData: {e}"))?;
    let encap = &signed.encap_content_info;
    if encap.econtent_type != OID_TST_INFO {
        return Err(format!(
            "token encapsulates {} instead of TSTInfo",
            encap.econtent_type
        ));
    }
    let econtent = encap
        .econtent
        .as_ref()
        .ok_or_else(|| "token has no encapsulated content".to_string())?;
    let octets: OctetString = econtent
        .decode_as()
        .map_err(|e| format!("bad TSTInfo wrapper: {e}"))?;
    let tst = TstInfo::from_der_bytes(octets.as_bytes()).map_err(|e| format!("bad TSTInfo: {e}"))?;
    let reencoded = content_info.to_der().map_err(|e| e.to_string())?;
    Ok((tst, reencoded))
}
