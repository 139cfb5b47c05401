//! RFC 3161 client against an in-process timestamp authority.

mod common;

use batch_signer::domain::constants::DEFAULT_NONCE_SIZE;
use batch_signer::services::timestamp::TimestampToken;
use batch_signer::{
    HashAlgorithm, NonceGenerator, SigningError, TimestampClient, TimestampFailure,
    TimestampResult, TimestampUrl,
};
use common::{spawn_tsa, TsaMode};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn request(
    client: &TimestampClient,
    url: &TimestampUrl,
    content: &[u8],
    timeout: Duration,
) -> TimestampResult {
    client
        .request_timestamp(
            url,
            HashAlgorithm::Sha256,
            NonceGenerator.generate(),
            timeout,
            content,
            &CancellationToken::new(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_granted_reply_yields_token() {
    let tsa = spawn_tsa(TsaMode::Grant);
    let client = TimestampClient::new().unwrap();
    let signature = b"signature bytes to timestamp";

    let result = request(&client, &tsa.url, signature, TIMEOUT).await;
    let TimestampResult::Success(token) = result else {
        panic!("expected a token, got {result:?}");
    };

    assert_eq!(token.hash_algorithm(), HashAlgorithm::Sha256);
    assert_eq!(token.hashed_message(), HashAlgorithm::Sha256.digest(signature));
    assert_eq!(token.serial_hex(), "012a");
    assert_eq!(tsa.requests(), 1);

    // The stored DER is a standalone token.
    let reparsed = TimestampToken::from_der(token.as_der()).unwrap();
    assert_eq!(reparsed, token);
}

#[tokio::test]
async fn test_sha512_imprint_is_echoed() {
    let tsa = spawn_tsa(TsaMode::Grant);
    let client = TimestampClient::new().unwrap();
    let result = client
        .request_timestamp(
            &tsa.url,
            HashAlgorithm::Sha512,
            NonceGenerator.generate(),
            TIMEOUT,
            b"payload",
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(result.into_token().unwrap().hash_algorithm(), HashAlgorithm::Sha512);
}

#[tokio::test]
async fn test_http_error_is_a_failure_value() {
    let tsa = spawn_tsa(TsaMode::Unavailable);
    let client = TimestampClient::new().unwrap();

    let result = request(&client, &tsa.url, b"sig", TIMEOUT).await;
    assert!(matches!(
        result,
        TimestampResult::Failed(TimestampFailure::HttpStatus(503))
    ));
    assert!(matches!(
        result.into_token(),
        Err(SigningError::TimestampError(_))
    ));
}

#[tokio::test]
async fn test_slow_authority_times_out() {
    let tsa = spawn_tsa(TsaMode::Slow(Duration::from_secs(3)));
    let client = TimestampClient::new().unwrap();

    let result = request(&client, &tsa.url, b"sig", Duration::from_millis(200)).await;
    assert!(matches!(result, TimestampResult::Failed(TimestampFailure::Timeout)));
}

#[tokio::test]
async fn test_nonce_mismatch_is_rejected() {
    let tsa = spawn_tsa(TsaMode::WrongNonce);
    let client = TimestampClient::new().unwrap();

    let result = request(&client, &tsa.url, b"sig", TIMEOUT).await;
    let TimestampResult::Failed(TimestampFailure::Protocol(msg)) = result else {
        panic!("expected a protocol failure, got {result:?}");
    };
    assert!(msg.contains("nonce"));
}

#[tokio::test]
async fn test_rejection_status_is_reported() {
    let tsa = spawn_tsa(TsaMode::Reject);
    let client = TimestampClient::new().unwrap();

    let result = request(&client, &tsa.url, b"sig", TIMEOUT).await;
    let TimestampResult::Failed(TimestampFailure::Protocol(msg)) = result else {
        panic!("expected a protocol failure, got {result:?}");
    };
    assert!(msg.contains("not granted"));
    assert!(msg.contains("policy not supported"));
}

#[tokio::test]
async fn test_oversized_reply_is_refused() {
    let tsa = spawn_tsa(TsaMode::Oversized);
    let client = TimestampClient::new().unwrap();

    let result = request(&client, &tsa.url, b"sig", TIMEOUT).await;
    let TimestampResult::Failed(TimestampFailure::Protocol(msg)) = result else {
        panic!("expected a protocol failure, got {result:?}");
    };
    assert!(msg.contains("exceeds"));
    assert_eq!(tsa.requests(), 1);
}

#[tokio::test]
async fn test_empty_content_is_not_sent() {
    let tsa = spawn_tsa(TsaMode::Grant);
    let client = TimestampClient::new().unwrap();

    let result = request(&client, &tsa.url, b"", TIMEOUT).await;
    assert!(matches!(result, TimestampResult::PackageNotSigned));
    assert_eq!(tsa.requests(), 0);
}

#[tokio::test]
async fn test_cancellation_ends_request() {
    let tsa = spawn_tsa(TsaMode::Slow(Duration::from_secs(10)));
    let client = TimestampClient::new().unwrap();
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let started = std::time::Instant::now();
    let result = client
        .request_timestamp(
            &tsa.url,
            HashAlgorithm::Sha256,
            NonceGenerator.generate(),
            Duration::from_secs(30),
            b"sig",
            &cancel,
        )
        .await
        .unwrap();
    assert!(matches!(result, TimestampResult::Failed(TimestampFailure::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_unreachable_authority_is_transport_failure() {
    // Bind then drop a listener so the port is closed.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let url = TimestampUrl::new(format!("http://127.0.0.1:{port}/tsa")).unwrap();
    let client = TimestampClient::new().unwrap();

    let result = request(&client, &url, b"sig", TIMEOUT).await;
    assert!(matches!(
        result,
        TimestampResult::Failed(TimestampFailure::Transport(_))
    ));
}

#[test]
fn test_nonces_are_unique() {
    let a = NonceGenerator.generate();
    let b = NonceGenerator.generate();
    assert_eq!(a.as_bytes().len(), DEFAULT_NONCE_SIZE);
    assert_ne!(a.as_bytes(), b.as_bytes());
}
