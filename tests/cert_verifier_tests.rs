//! Certificate time-validity checks against real X.509 certificates.

mod common;

use batch_signer::domain::crypto::TimeValidity;
use batch_signer::infra::diagnostics::RecordingSink;
use batch_signer::{CertificateVerifier, SigningError};
use common::{expired_identity, future_identity, valid_identity};
use std::time::{Duration, SystemTime};

#[test]
fn test_valid_certificate_is_silent() {
    let sink = RecordingSink::new();
    let verifier = CertificateVerifier::new(sink.clone());
    let cert = valid_identity("Valid Publisher").certificate();

    assert_eq!(verifier.verify(Some(&cert)).unwrap(), TimeValidity::Valid);
    assert!(sink.warnings().is_empty());
}

#[test]
fn test_expired_certificate_warns_once() {
    let sink = RecordingSink::new();
    let verifier = CertificateVerifier::new(sink.clone());
    let cert = expired_identity("Old Publisher").certificate();

    assert_eq!(verifier.verify(Some(&cert)).unwrap(), TimeValidity::Expired);
    let warnings = sink.warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("expired"));
    assert!(warnings[0].contains(cert.thumbprint()));
}

#[test]
fn test_not_yet_valid_certificate_warns_once() {
    let sink = RecordingSink::new();
    let verifier = CertificateVerifier::new(sink.clone());
    let cert = future_identity("Future Publisher").certificate();

    assert_eq!(verifier.verify(Some(&cert)).unwrap(), TimeValidity::NotYetValid);
    let warnings = sink.warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("not yet time valid"));
}

#[test]
fn test_missing_certificate_is_invalid_input() {
    let verifier = CertificateVerifier::new(RecordingSink::new());
    assert!(matches!(
        verifier.verify(None),
        Err(SigningError::InvalidInput(_))
    ));
}

#[test]
fn test_explicit_clock_moves_the_window() {
    let sink = RecordingSink::new();
    let verifier = CertificateVerifier::new(sink.clone());
    let cert = valid_identity("Clocked Publisher").certificate();

    let later = SystemTime::now() + Duration::from_secs(90 * 86_400);
    assert_eq!(
        verifier.verify_at(Some(&cert), later).unwrap(),
        TimeValidity::Expired
    );
    assert_eq!(sink.warnings().len(), 1);
}
