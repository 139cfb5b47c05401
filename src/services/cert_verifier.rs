//! Advisory certificate time-validity check.
//!
//! Signing with a certificate outside its validity window is allowed (for
//! example when re-timestamping historical builds), so problems are reported
//! through the diagnostics handle and never returned as errors.

use crate::domain::crypto::{Certificate, TimeValidity};
use crate::infra::diagnostics::{DiagnosticSink, LogSink};
use crate::infra::error::{SigningError, SigningResult};
use std::sync::Arc;
use std::time::SystemTime;

const COMPONENT: &str = "batch_signer::cert_verifier";

#[derive(Clone)]
pub struct CertificateVerifier {
    sink: Arc<dyn DiagnosticSink>,
}

impl CertificateVerifier {
    #[must_use]
    pub fn new(sink: Arc<dyn DiagnosticSink>) -> Self {
        Self { sink }
    }

    /// Check `certificate` against the current time.
    ///
    /// # Errors
    /// `InvalidInput` when no certificate is given. Validity problems are
    /// only reported, never returned.
    pub fn verify(&self, certificate: Option<&Certificate>) -> SigningResult<TimeValidity> {
        self.verify_at(certificate, SystemTime::now())
    }

    /// Same as [`verify`](Self::verify) with an explicit clock.
    pub fn verify_at(
        &self,
        certificate: Option<&Certificate>,
        now: SystemTime,
    ) -> SigningResult<TimeValidity> {
        let certificate = certificate.ok_or_else(|| {
            SigningError::InvalidInput("certificate is required".to_string())
        })?;

        let validity = certificate.time_validity_at(now);
        match validity {
            TimeValidity::NotYetValid => self.sink.warn(
                COMPONENT,
                format!(
                    "Certificate {} is not yet time valid (subject: {})",
                    certificate.thumbprint(),
                    certificate.subject()
                ),
            ),
            TimeValidity::Expired => self.sink.warn(
                COMPONENT,
                format!(
                    "Certificate {} has expired (subject: {})",
                    certificate.thumbprint(),
                    certificate.subject()
                ),
            ),
            TimeValidity::Valid => {}
        }
        Ok(validity)
    }
}

impl Default for CertificateVerifier {
    fn default() -> Self {
        Self::new(Arc::new(LogSink))
    }
}
