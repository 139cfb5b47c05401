//! Remote signing service client.
//!
//! Talks to an HSM front-end or cloud signing service that exposes the
//! operation protocol in [`super::protocol`], including our own
//! `signing-proxy`.

use super::protocol::{
    error_codes, ErrorResponse, OperationStatus, OperationStatusResponse, StatusResponse,
    SubmitOperationRequest, SubmitOperationResponse,
};
use crate::infra::error::{SigningError, SigningResult};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long to wait for a remote operation to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Maximum status polls before giving up.
    pub max_polls: u32,
    /// Delay between polls.
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_polls: 60,
            interval: Duration::from_millis(500),
        }
    }
}

/// Configuration for connecting to a remote signing service.
#[derive(Debug, Clone)]
pub struct RemoteSignerConfig {
    /// Base URL of the service (e.g., `https://hsm.example.com`).
    pub base_url: String,
    /// Bearer token for authentication.
    pub auth_token: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Whether to verify TLS certificates (should be true in production).
    pub verify_tls: bool,
    pub polling: PollPolicy,
}

impl RemoteSignerConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: auth_token.into(),
            timeout_secs: 30,
            verify_tls: true,
            polling: PollPolicy::default(),
        }
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Disable TLS verification (for testing only!).
    #[must_use]
    pub fn with_insecure_tls(mut self) -> Self {
        self.verify_tls = false;
        self
    }

    #[must_use]
    pub fn with_polling(mut self, polling: PollPolicy) -> Self {
        self.polling = polling;
        self
    }
}

/// Transport seam for the submit/poll protocol.
#[async_trait]
pub trait RemoteSigningBackend: Send + Sync {
    fn poll_policy(&self) -> PollPolicy;

    /// Submit an operation and return its id.
    async fn submit(
        &self,
        request: &SubmitOperationRequest,
        cancel: &CancellationToken,
    ) -> SigningResult<String>;

    /// Fetch the current state of an operation.
    async fn poll(
        &self,
        operation_id: &str,
        cancel: &CancellationToken,
    ) -> SigningResult<OperationStatusResponse>;

    /// Submit `request` and poll until it succeeds, fails or the poll
    /// budget runs out.
    ///
    /// # Errors
    /// The mapped server error, `RemoteError` with code `POLL_LIMIT` when
    /// the operation never finishes, or `Cancelled`.
    async fn run_operation(
        &self,
        request: SubmitOperationRequest,
        cancel: &CancellationToken,
    ) -> SigningResult<OperationStatusResponse> {
        let policy = self.poll_policy();
        let operation_id = self.submit(&request, cancel).await?;
        log::debug!("Submitted {:?} operation {operation_id}", request.kind);

        for attempt in 1..=policy.max_polls {
            let status = self.poll(&operation_id, cancel).await?;
            match status.status {
                OperationStatus::Succeeded => return Ok(status),
                OperationStatus::Failed => {
                    let error = status.error.unwrap_or_else(|| {
                        ErrorResponse::new(error_codes::SIGNING_FAILED, "operation failed")
                    });
                    return Err(map_error_code(&error));
                }
                OperationStatus::Running => {
                    log::trace!("Operation {operation_id} still running (poll {attempt})");
                    if attempt < policy.max_polls {
                        cancellable(cancel, tokio::time::sleep(policy.interval)).await?;
                    }
                }
            }
        }

        Err(SigningError::RemoteError {
            code: "POLL_LIMIT".to_string(),
            message: format!(
                "operation {operation_id} did not finish after {} polls",
                policy.max_polls
            ),
        })
    }
}

async fn cancellable<F: Future>(cancel: &CancellationToken, work: F) -> SigningResult<F::Output> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(SigningError::Cancelled),
        output = work => Ok(output),
    }
}

/// Map error codes to appropriate `SigningError` variants.
pub fn map_error_code(error: &ErrorResponse) -> SigningError {
    match error.error_code.as_str() {
        error_codes::AUTH_FAILED => {
            SigningError::CredentialError(format!("Authentication failed: {}", error.message))
        }
        error_codes::KEY_NOT_FOUND => {
            SigningError::CredentialError(format!("Key not found: {}", error.message))
        }
        error_codes::UNSUPPORTED_ALGORITHM => SigningError::UnsupportedOperation(format!(
            "Remote algorithm rejected: {}",
            error.message
        )),
        error_codes::SIGNING_FAILED => {
            SigningError::SignatureError(format!("Signing failed: {}", error.message))
        }
        _ => SigningError::RemoteError {
            code: error.error_code.clone(),
            message: error.message.clone(),
        },
    }
}

/// Remote signing client over HTTP(S).
pub struct HttpSigningBackend {
    config: RemoteSignerConfig,
    client: reqwest::Client,
}

impl HttpSigningBackend {
    /// # Errors
    /// Returns error if HTTP client creation fails.
    pub fn new(config: RemoteSignerConfig) -> SigningResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                SigningError::NetworkError(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self { config, client })
    }

    /// Check the status of the remote service.
    ///
    /// # Errors
    /// Returns error if the server is unreachable or returns an error.
    pub async fn check_status(&self) -> SigningResult<StatusResponse> {
        let url = format!("{}/api/v1/status", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.auth_token)
            .send()
            .await
            .map_err(|e| SigningError::NetworkError(format!("Failed to connect: {e}")))?;

        handle_response(response).await
    }
}

#[async_trait]
impl RemoteSigningBackend for HttpSigningBackend {
    fn poll_policy(&self) -> PollPolicy {
        self.config.polling
    }

    async fn submit(
        &self,
        request: &SubmitOperationRequest,
        cancel: &CancellationToken,
    ) -> SigningResult<String> {
        let url = format!("{}/api/v1/operations", self.config.base_url);
        let send = self
            .client
            .post(&url)
            .bearer_auth(&self.config.auth_token)
            .json(request)
            .send();
        let response = cancellable(cancel, send)
            .await?
            .map_err(|e| SigningError::NetworkError(format!("Failed to connect: {e}")))?;

        let submitted: SubmitOperationResponse = handle_response(response).await?;
        Ok(submitted.operation_id)
    }

    async fn poll(
        &self,
        operation_id: &str,
        cancel: &CancellationToken,
    ) -> SigningResult<OperationStatusResponse> {
        let url = format!("{}/api/v1/operations/{operation_id}", self.config.base_url);
        let send = self
            .client
            .get(&url)
            .bearer_auth(&self.config.auth_token)
            .send();
        let response = cancellable(cancel, send)
            .await?
            .map_err(|e| SigningError::NetworkError(format!("Failed to connect: {e}")))?;

        handle_response(response).await
    }
}

/// Handle HTTP response and parse JSON body.
async fn handle_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> SigningResult<T> {
    let status = response.status();

    if status.is_success() {
        response
            .json()
            .await
            .map_err(|e| SigningError::NetworkError(format!("Failed to parse response: {e}")))
    } else {
        let error_text = response.text().await.unwrap_or_default();

        if let Ok(error_response) = serde_json::from_str::<ErrorResponse>(&error_text) {
            Err(map_error_code(&error_response))
        } else {
            Err(SigningError::NetworkError(format!(
                "Server error {status}: {error_text}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_config_builder() {
        let config = RemoteSignerConfig::new("https://hsm.example.com/", "secret-token")
            .with_timeout(60)
            .with_insecure_tls();

        assert_eq!(config.base_url, "https://hsm.example.com");
        assert_eq!(config.auth_token, "secret-token");
        assert_eq!(config.timeout_secs, 60);
        assert!(!config.verify_tls);
        assert_eq!(config.polling, PollPolicy::default());
    }

    #[test]
    fn test_error_code_mapping() {
        let err = map_error_code(&ErrorResponse::new(error_codes::AUTH_FAILED, "bad token"));
        assert!(err.is_credential_failure());
        let err = map_error_code(&ErrorResponse::new(error_codes::SIGNING_FAILED, "hsm"));
        assert!(matches!(err, SigningError::SignatureError(_)));
        let err = map_error_code(&ErrorResponse::new("THROTTLED", "slow down"));
        assert!(matches!(err, SigningError::RemoteError { ref code, .. } if code == "THROTTLED"));
    }

    /// Reports `running` forever.
    struct StuckBackend {
        polls: AtomicU32,
    }

    #[async_trait]
    impl RemoteSigningBackend for StuckBackend {
        fn poll_policy(&self) -> PollPolicy {
            PollPolicy {
                max_polls: 3,
                interval: Duration::from_millis(1),
            }
        }

        async fn submit(
            &self,
            _request: &SubmitOperationRequest,
            _cancel: &CancellationToken,
        ) -> SigningResult<String> {
            Ok("op-1".to_string())
        }

        async fn poll(
            &self,
            operation_id: &str,
            _cancel: &CancellationToken,
        ) -> SigningResult<OperationStatusResponse> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(OperationStatusResponse::running(operation_id))
        }
    }

    #[tokio::test]
    async fn test_poll_budget_is_bounded() {
        let backend = StuckBackend {
            polls: AtomicU32::new(0),
        };
        let err = backend
            .run_operation(
                SubmitOperationRequest::certificate("k"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SigningError::RemoteError { ref code, .. } if code == "POLL_LIMIT"));
        assert_eq!(backend.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_poll_loop() {
        let backend = StuckBackend {
            polls: AtomicU32::new(0),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = backend
            .run_operation(SubmitOperationRequest::certificate("k"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, SigningError::Cancelled);
    }
}
