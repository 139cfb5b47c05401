//! Timestamp request builder service.
//!
//! Builds DER-encoded RFC 3161 `TimeStampReq` structures for a digest.

use crate::domain::tsp::{MessageImprint, TimeStampReq};
use crate::infra::error::{SigningError, SigningResult};
use crate::services::nonce::Nonce;
use crate::HashAlgorithm;
use der::Encode;

/// A serialized request plus the values needed to check the reply.
#[derive(Debug, Clone)]
pub struct BuiltRequest {
    pub der: Vec<u8>,
    pub algorithm: HashAlgorithm,
    pub digest: Vec<u8>,
    pub nonce: Nonce,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TimestampRequestBuilder;

impl TimestampRequestBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Build a request for `digest`. The digest length picks the algorithm.
    ///
    /// # Errors
    /// `UnsupportedDigestLength` for lengths other than 32, 48 or 64, and
    /// `Asn1Error` if encoding fails.
    pub fn build(&self, digest: &[u8], nonce: Nonce) -> SigningResult<BuiltRequest> {
        let algorithm = HashAlgorithm::from_digest_len(digest.len())?;
        let imprint = MessageImprint::new(algorithm, digest.to_vec())?;
        let request = TimeStampReq::new(imprint, nonce.to_asn1()?);
        let der = request.to_der()?;

        log::debug!(
            "Built RFC3161 timestamp request: {} bytes, {} imprint, nonce {} bytes",
            der.len(),
            algorithm,
            nonce.as_bytes().len()
        );

        Ok(BuiltRequest {
            der,
            algorithm,
            digest: digest.to_vec(),
            nonce,
        })
    }

    /// Hash `content` with `algorithm` and build a request for the result.
    pub fn build_for_content(
        &self,
        content: &[u8],
        algorithm: HashAlgorithm,
        nonce: Nonce,
    ) -> SigningResult<BuiltRequest> {
        if content.is_empty() {
            return Err(SigningError::InvalidInput(
                "Cannot create timestamp request for empty content".into(),
            ));
        }
        self.build(&algorithm.digest(content), nonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::nonce::NonceGenerator;
    use der::Decode;

    #[test]
    fn digest_length_selects_oid() {
        let builder = TimestampRequestBuilder::new();
        for algo in [
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
        ] {
            let built = builder
                .build(&algo.digest(b"sig"), NonceGenerator.generate())
                .unwrap();
            let req = TimeStampReq::from_der(&built.der).unwrap();
            assert_eq!(req.message_imprint.hash_algorithm.algorithm, algo.oid());
            assert!(req.cert_req);
            assert!(built.nonce.matches(req.nonce.as_ref().unwrap()));
        }
    }

    #[test]
    fn unsupported_digest_length_is_hard_error() {
        let err = TimestampRequestBuilder::new()
            .build(&[0u8; 20], NonceGenerator.generate())
            .unwrap_err();
        assert_eq!(err, SigningError::UnsupportedDigestLength(20));
    }

    #[test]
    fn empty_content_is_rejected() {
        assert!(TimestampRequestBuilder::new()
            .build_for_content(b"", HashAlgorithm::Sha256, NonceGenerator.generate())
            .is_err());
    }
}
