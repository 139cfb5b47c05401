//! HTTP transport for RFC 3161 timestamp authorities.
//!
//! One POST per call. Retrying and failover are decided by the caller.

use crate::domain::constants::{
    MAX_TIMESTAMP_REPLY_BYTES, TIMESTAMP_QUERY_CONTENT_TYPE, TIMESTAMP_REPLY_CONTENT_TYPE,
};
use crate::domain::types::TimestampUrl;
use crate::infra::error::{SigningError, SigningResult};
use crate::services::timestamp::TimestampFailure;
use reqwest::StatusCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// HTTP adapter performing RFC 3161 POST exchanges.
#[derive(Clone)]
pub struct TimestampHttpClient {
    http: reqwest::Client,
}

impl TimestampHttpClient {
    /// # Errors
    /// `NetworkError` if the HTTP client cannot be constructed.
    pub fn new() -> SigningResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("batch-signer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SigningError::NetworkError(format!("HTTP client: {e}")))?;
        Ok(Self { http })
    }

    #[must_use]
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// POST `body` to `server` and return the reply body on HTTP 200.
    pub async fn post(
        &self,
        server: &TimestampUrl,
        body: Vec<u8>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, TimestampFailure> {
        let exchange = async {
            let resp = self
                .http
                .post(server.as_str())
                .header(reqwest::header::CONTENT_TYPE, TIMESTAMP_QUERY_CONTENT_TYPE)
                .header(reqwest::header::ACCEPT, TIMESTAMP_REPLY_CONTENT_TYPE)
                .timeout(timeout)
                .body(body)
                .send()
                .await
                .map_err(classify)?;

            if resp.status() != StatusCode::OK {
                return Err(TimestampFailure::HttpStatus(resp.status().as_u16()));
            }
            read_capped(resp, MAX_TIMESTAMP_REPLY_BYTES).await
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TimestampFailure::Cancelled),
            result = exchange => result,
        }
    }
}

/// Read the body, refusing anything larger than `limit` bytes whether or
/// not the server declared a length.
async fn read_capped(
    mut resp: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, TimestampFailure> {
    let too_large = || TimestampFailure::Protocol(format!("reply exceeds {limit} bytes"));
    if resp
        .content_length()
        .is_some_and(|declared| declared > limit as u64)
    {
        return Err(too_large());
    }
    let mut body = Vec::new();
    while let Some(chunk) = resp.chunk().await.map_err(classify)? {
        if body.len() + chunk.len() > limit {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn classify(error: reqwest::Error) -> TimestampFailure {
    if error.is_timeout() {
        TimestampFailure::Timeout
    } else {
        TimestampFailure::Transport(error.to_string())
    }
}
