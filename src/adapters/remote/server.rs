//! Remote signing proxy server.
//!
//! Serves the operation protocol over a key held in-process, so a machine
//! with the signing key can act as the "remote HSM" for build agents that
//! must not hold it. Operations complete immediately on submit but report
//! `running` for a configurable number of polls before revealing the result.
//! A result is handed out once and then forgotten. Operations nobody polls
//! to completion are swept after [`OPERATION_TTL`].

use super::protocol::{
    error_codes, ErrorResponse, OperationKind, OperationStatusResponse, StatusResponse,
    SubmitOperationRequest, SubmitOperationResponse, PROTOCOL_VERSION,
};
use crate::adapters::credential::SigningOperation;
use crate::adapters::local_store::LocalSigningOperation;
use crate::domain::crypto::{SignatureAlgorithm, SigningRequest};
use crate::infra::error::SigningError;
use rand::RngCore;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use warp::http::StatusCode;
use warp::Filter;

/// Configuration for the proxy server.
#[derive(Debug, Clone)]
pub struct ProxyServerConfig {
    /// Address to bind to (e.g., "0.0.0.0:8443").
    pub bind_address: String,
    /// Bearer token for client authentication.
    pub auth_token: String,
    /// Name clients use to address the key.
    pub key_name: String,
    /// Polls answered with `running` before an operation reports its result.
    pub pending_polls: u32,
    /// TLS certificate path (PEM format).
    pub tls_cert_path: Option<String>,
    /// TLS private key path (PEM format).
    pub tls_key_path: Option<String>,
}

impl ProxyServerConfig {
    #[must_use]
    pub fn new(
        bind_address: impl Into<String>,
        auth_token: impl Into<String>,
        key_name: impl Into<String>,
    ) -> Self {
        Self {
            bind_address: bind_address.into(),
            auth_token: auth_token.into(),
            key_name: key_name.into(),
            pending_polls: 0,
            tls_cert_path: None,
            tls_key_path: None,
        }
    }

    /// Configure TLS with certificate and key paths.
    #[must_use]
    pub fn with_tls(mut self, cert_path: impl Into<String>, key_path: impl Into<String>) -> Self {
        self.tls_cert_path = Some(cert_path.into());
        self.tls_key_path = Some(key_path.into());
        self
    }

    #[must_use]
    pub fn with_pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }
}

/// How long an unpolled operation is kept before it is swept.
pub const OPERATION_TTL: Duration = Duration::from_secs(300);

struct StoredOperation {
    remaining_polls: u32,
    accepted_at: Instant,
    result: OperationStatusResponse,
}

/// Shared state for the proxy server handlers.
pub struct ProxyState {
    signer: Arc<LocalSigningOperation>,
    key_name: String,
    auth_token: String,
    pending_polls: u32,
    start_time: Instant,
    operations: Mutex<HashMap<String, StoredOperation>>,
    certificate_requests: AtomicUsize,
    sign_requests: AtomicUsize,
}

impl ProxyState {
    #[must_use]
    pub fn new(signer: Arc<LocalSigningOperation>, config: &ProxyServerConfig) -> Self {
        Self {
            signer,
            key_name: config.key_name.clone(),
            auth_token: config.auth_token.clone(),
            pending_polls: config.pending_polls,
            start_time: Instant::now(),
            operations: Mutex::new(HashMap::new()),
            certificate_requests: AtomicUsize::new(0),
            sign_requests: AtomicUsize::new(0),
        }
    }

    /// Validate the authentication token.
    fn validate_auth(&self, token: &str) -> bool {
        // Constant-time comparison to prevent timing attacks
        let expected = self.auth_token.as_bytes();
        let provided = token.as_bytes();

        if expected.len() != provided.len() {
            return false;
        }

        let mut result = 0u8;
        for (a, b) in expected.iter().zip(provided) {
            result |= a ^ b;
        }
        result == 0
    }

    fn operations(&self) -> MutexGuard<'_, HashMap<String, StoredOperation>> {
        self.operations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Certificate operations accepted so far.
    pub fn certificate_requests(&self) -> usize {
        self.certificate_requests.load(Ordering::SeqCst)
    }

    /// Sign operations accepted so far.
    pub fn sign_requests(&self) -> usize {
        self.sign_requests.load(Ordering::SeqCst)
    }

    /// Operations accepted but not yet handed out or swept.
    pub fn stored_operations(&self) -> usize {
        self.operations().len()
    }

    /// Drop operations accepted longer than `ttl` ago.
    pub fn sweep_expired(&self, ttl: Duration) -> usize {
        let mut operations = self.operations();
        let before = operations.len();
        operations.retain(|_, stored| stored.accepted_at.elapsed() < ttl);
        let swept = before - operations.len();
        if swept > 0 {
            log::debug!("Swept {swept} abandoned operations");
        }
        swept
    }
}

/// Handle the status endpoint.
pub fn handle_status(state: &Arc<ProxyState>) -> StatusResponse {
    StatusResponse {
        version: PROTOCOL_VERSION.to_string(),
        ready: true,
        keys: vec![state.key_name.clone()],
        uptime_seconds: state.start_time.elapsed().as_secs(),
    }
}

fn new_operation_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Accept an operation, run it against the local key, and store the result.
///
/// Failures of the operation itself (bad algorithm, signing error) are
/// stored as a failed operation. Only malformed or misaddressed requests
/// are rejected outright.
pub async fn handle_submit(
    state: &Arc<ProxyState>,
    request: &SubmitOperationRequest,
) -> Result<SubmitOperationResponse, ErrorResponse> {
    if request.version != PROTOCOL_VERSION {
        return Err(ErrorResponse::new(
            error_codes::VERSION_MISMATCH,
            format!(
                "Protocol version mismatch: expected {}, got {}",
                PROTOCOL_VERSION, request.version
            ),
        ));
    }
    if request.key != state.key_name {
        return Err(ErrorResponse::new(
            error_codes::KEY_NOT_FOUND,
            format!("Unknown key: {}", request.key),
        ));
    }

    let operation_id = new_operation_id();
    let result = match request.kind {
        OperationKind::Certificate => {
            state.certificate_requests.fetch_add(1, Ordering::SeqCst);
            let chain = state.signer.chain();
            let mut ders = vec![chain.leaf().as_der().to_vec()];
            ders.extend(chain.intermediates().iter().map(|c| c.as_der().to_vec()));
            OperationStatusResponse::certificate_chain(&operation_id, &ders)
        }
        OperationKind::Sign => {
            state.sign_requests.fetch_add(1, Ordering::SeqCst);
            match sign_for_request(state, request).await {
                Ok(signature) => OperationStatusResponse::signature(&operation_id, &signature),
                Err(error) => {
                    log::warn!("Sign operation {operation_id} failed: {}", error.message);
                    OperationStatusResponse::failed(&operation_id, error)
                }
            }
        }
    };

    state.sweep_expired(OPERATION_TTL);
    state.operations().insert(
        operation_id.clone(),
        StoredOperation {
            remaining_polls: state.pending_polls,
            accepted_at: Instant::now(),
            result,
        },
    );
    log::debug!("Accepted {:?} operation {operation_id}", request.kind);
    Ok(SubmitOperationResponse::new(operation_id))
}

async fn sign_for_request(
    state: &Arc<ProxyState>,
    request: &SubmitOperationRequest,
) -> Result<Vec<u8>, ErrorResponse> {
    let digest = request.decode_digest().map_err(|e| {
        ErrorResponse::new(error_codes::BAD_REQUEST, format!("Invalid digest: {e}"))
    })?;
    let algorithm: SignatureAlgorithm = request
        .algorithm
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|e: SigningError| {
            ErrorResponse::new(error_codes::UNSUPPORTED_ALGORITHM, e.to_string())
        })?;
    let signing_request =
        SigningRequest::with_algorithm(digest, algorithm.hash_algorithm(), algorithm.padding())
            .map_err(|e| ErrorResponse::new(error_codes::UNSUPPORTED_ALGORITHM, e.to_string()))?;

    state
        .signer
        .sign(&signing_request, &CancellationToken::new())
        .await
        .map_err(|e| ErrorResponse::new(error_codes::SIGNING_FAILED, e.to_string()))
}

/// Report an operation's state.
///
/// The terminal result is removed from the store as it is returned, so a
/// second poll after completion answers `OPERATION_NOT_FOUND`.
pub fn handle_poll(
    state: &Arc<ProxyState>,
    operation_id: &str,
) -> Result<OperationStatusResponse, ErrorResponse> {
    let mut operations = state.operations();
    let stored = operations.get_mut(operation_id).ok_or_else(|| {
        ErrorResponse::new(
            error_codes::OPERATION_NOT_FOUND,
            format!("Unknown operation: {operation_id}"),
        )
    })?;

    if stored.remaining_polls > 0 {
        stored.remaining_polls -= 1;
        return Ok(OperationStatusResponse::running(operation_id));
    }
    operations
        .remove(operation_id)
        .map(|stored| stored.result)
        .ok_or_else(|| {
            ErrorResponse::new(
                error_codes::OPERATION_NOT_FOUND,
                format!("Unknown operation: {operation_id}"),
            )
        })
}

/// Extract bearer token from Authorization header value.
#[must_use]
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
}

/// Validate authentication for an incoming request.
///
/// # Errors
/// `AUTH_FAILED` when the header is missing, malformed or carries the wrong
/// token.
pub fn validate_request_auth(
    state: &Arc<ProxyState>,
    auth_header: Option<&str>,
) -> Result<(), ErrorResponse> {
    let token = auth_header.and_then(extract_bearer_token).ok_or_else(|| {
        ErrorResponse::new(
            error_codes::AUTH_FAILED,
            "Missing or invalid Authorization header",
        )
    })?;

    if !state.validate_auth(token) {
        return Err(ErrorResponse::new(
            error_codes::AUTH_FAILED,
            "Invalid authentication token",
        ));
    }

    Ok(())
}

/// All API routes.
pub fn routes(
    state: Arc<ProxyState>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let status = warp::path!("api" / "v1" / "status")
        .and(warp::get())
        .and(with_state(state.clone()))
        .map(|state: Arc<ProxyState>| warp::reply::json(&handle_status(&state)));

    let submit = warp::path!("api" / "v1" / "operations")
        .and(warp::post())
        .and(warp::header::optional::<String>("authorization"))
        .and(warp::body::json::<SubmitOperationRequest>())
        .and(with_state(state.clone()))
        .and_then(submit_request);

    let poll = warp::path!("api" / "v1" / "operations" / String)
        .and(warp::get())
        .and(warp::header::optional::<String>("authorization"))
        .and(with_state(state))
        .and_then(poll_request);

    status.or(submit).or(poll)
}

fn with_state(
    state: Arc<ProxyState>,
) -> impl Filter<Extract = (Arc<ProxyState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn error_status(error: &ErrorResponse) -> StatusCode {
    match error.error_code.as_str() {
        error_codes::AUTH_FAILED => StatusCode::UNAUTHORIZED,
        error_codes::KEY_NOT_FOUND | error_codes::OPERATION_NOT_FOUND => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn reply<T: serde::Serialize>(
    result: Result<T, ErrorResponse>,
) -> warp::reply::WithStatus<warp::reply::Json> {
    match result {
        Ok(body) => warp::reply::with_status(warp::reply::json(&body), StatusCode::OK),
        Err(error) => {
            let status = error_status(&error);
            warp::reply::with_status(warp::reply::json(&error), status)
        }
    }
}

async fn submit_request(
    auth: Option<String>,
    request: SubmitOperationRequest,
    state: Arc<ProxyState>,
) -> Result<impl warp::Reply, Infallible> {
    if let Err(error) = validate_request_auth(&state, auth.as_deref()) {
        return Ok(reply::<SubmitOperationResponse>(Err(error)));
    }
    Ok(reply(handle_submit(&state, &request).await))
}

async fn poll_request(
    operation_id: String,
    auth: Option<String>,
    state: Arc<ProxyState>,
) -> Result<impl warp::Reply, Infallible> {
    if let Err(error) = validate_request_auth(&state, auth.as_deref()) {
        return Ok(reply::<OperationStatusResponse>(Err(error)));
    }
    Ok(reply(handle_poll(&state, &operation_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token("Bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer_token("bearer xyz789"), Some("xyz789"));
        assert_eq!(extract_bearer_token("Basic auth"), None);
        assert_eq!(extract_bearer_token(""), None);
    }

    #[test]
    fn test_error_status_mapping() {
        let status = |code| error_status(&ErrorResponse::new(code, "x"));
        assert_eq!(status(error_codes::AUTH_FAILED), StatusCode::UNAUTHORIZED);
        assert_eq!(status(error_codes::OPERATION_NOT_FOUND), StatusCode::NOT_FOUND);
        assert_eq!(status(error_codes::BAD_REQUEST), StatusCode::BAD_REQUEST);
    }
}
