use std::fmt;
use std::str::FromStr;

use super::HashAlgorithm;
use crate::infra::error::{SigningError, SigningResult};

/// RSA signature padding scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignaturePadding {
    Pkcs1,
    Pss,
}

impl FromStr for SignaturePadding {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pkcs1" | "pkcs1v15" => Ok(Self::Pkcs1),
            "pss" => Ok(Self::Pss),
            other => Err(SigningError::InvalidInput(format!(
                "Unknown padding scheme: {other}"
            ))),
        }
    }
}

/// A request to sign a precomputed digest.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningRequest {
    digest: Box<[u8]>,
    algorithm: HashAlgorithm,
    padding: SignaturePadding,
}

impl SigningRequest {
    /// Build a request whose algorithm is implied by the digest length.
    ///
    /// # Errors
    /// `UnsupportedDigestLength` when the digest is not 32, 48 or 64 bytes.
    pub fn new(digest: Vec<u8>, padding: SignaturePadding) -> SigningResult<Self> {
        let algorithm = HashAlgorithm::from_digest_len(digest.len())?;
        Ok(Self {
            digest: digest.into_boxed_slice(),
            algorithm,
            padding,
        })
    }

    /// Build a request with an explicitly declared algorithm.
    ///
    /// # Errors
    /// `UnsupportedDigestLength` for unsupported lengths, `InvalidInput` when
    /// the declared algorithm disagrees with the digest length.
    pub fn with_algorithm(
        digest: Vec<u8>,
        algorithm: HashAlgorithm,
        padding: SignaturePadding,
    ) -> SigningResult<Self> {
        let implied = HashAlgorithm::from_digest_len(digest.len())?;
        if implied != algorithm {
            return Err(SigningError::InvalidInput(format!(
                "{}-byte digest cannot be signed as {algorithm}",
                digest.len()
            )));
        }
        Self::new(digest, padding)
    }

    #[must_use]
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }
    #[must_use]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }
    #[must_use]
    pub fn padding(&self) -> SignaturePadding {
        self.padding
    }
}

impl fmt::Debug for SigningRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SigningRequest(algo={:?}, padding={:?}, len={})",
            self.algorithm,
            self.padding,
            self.digest.len()
        )
    }
}

/// Remote signature algorithm selector (JWA names).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    Rs256,
    Rs384,
    Rs512,
    Ps256,
    Ps384,
    Ps512,
}

impl SignatureAlgorithm {
    /// Select the algorithm for a digest of `digest_len` bytes and `padding`.
    ///
    /// # Errors
    /// `UnsupportedDigestLength` for lengths outside {32, 48, 64}.
    pub fn select(digest_len: usize, padding: SignaturePadding) -> SigningResult<Self> {
        let hash = HashAlgorithm::from_digest_len(digest_len)?;
        Ok(Self::from_parts(hash, padding))
    }

    #[must_use]
    pub fn from_parts(hash: HashAlgorithm, padding: SignaturePadding) -> Self {
        match (hash, padding) {
            (HashAlgorithm::Sha256, SignaturePadding::Pkcs1) => Self::Rs256,
            (HashAlgorithm::Sha384, SignaturePadding::Pkcs1) => Self::Rs384,
            (HashAlgorithm::Sha512, SignaturePadding::Pkcs1) => Self::Rs512,
            (HashAlgorithm::Sha256, SignaturePadding::Pss) => Self::Ps256,
            (HashAlgorithm::Sha384, SignaturePadding::Pss) => Self::Ps384,
            (HashAlgorithm::Sha512, SignaturePadding::Pss) => Self::Ps512,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rs256 => "RS256",
            Self::Rs384 => "RS384",
            Self::Rs512 => "RS512",
            Self::Ps256 => "PS256",
            Self::Ps384 => "PS384",
            Self::Ps512 => "PS512",
        }
    }

    #[must_use]
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        match self {
            Self::Rs256 | Self::Ps256 => HashAlgorithm::Sha256,
            Self::Rs384 | Self::Ps384 => HashAlgorithm::Sha384,
            Self::Rs512 | Self::Ps512 => HashAlgorithm::Sha512,
        }
    }

    #[must_use]
    pub fn padding(&self) -> SignaturePadding {
        match self {
            Self::Rs256 | Self::Rs384 | Self::Rs512 => SignaturePadding::Pkcs1,
            Self::Ps256 | Self::Ps384 | Self::Ps512 => SignaturePadding::Pss,
        }
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RS256" => Ok(Self::Rs256),
            "RS384" => Ok(Self::Rs384),
            "RS512" => Ok(Self::Rs512),
            "PS256" => Ok(Self::Ps256),
            "PS384" => Ok(Self::Ps384),
            "PS512" => Ok(Self::Ps512),
            other => Err(SigningError::UnsupportedOperation(format!(
                "signature algorithm {other}"
            ))),
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_is_deterministic_and_padding_dependent() {
        let cases = [
            (32, SignatureAlgorithm::Rs256, SignatureAlgorithm::Ps256),
            (48, SignatureAlgorithm::Rs384, SignatureAlgorithm::Ps384),
            (64, SignatureAlgorithm::Rs512, SignatureAlgorithm::Ps512),
        ];
        for (len, pkcs1, pss) in cases {
            let a = SignatureAlgorithm::select(len, SignaturePadding::Pkcs1).unwrap();
            let b = SignatureAlgorithm::select(len, SignaturePadding::Pkcs1).unwrap();
            let c = SignatureAlgorithm::select(len, SignaturePadding::Pss).unwrap();
            assert_eq!(a, b);
            assert_eq!(a, pkcs1);
            assert_eq!(c, pss);
            assert_ne!(a, c);
            assert_eq!(a.hash_algorithm().digest_size(), len);
        }
    }

    #[test]
    fn unsupported_lengths_fail() {
        for len in [0, 16, 20, 28, 47, 63, 128] {
            for padding in [SignaturePadding::Pkcs1, SignaturePadding::Pss] {
                assert_eq!(
                    SignatureAlgorithm::select(len, padding).unwrap_err(),
                    SigningError::UnsupportedDigestLength(len)
                );
            }
        }
    }

    #[test]
    fn request_rejects_mismatched_algorithm() {
        let err = SigningRequest::with_algorithm(
            vec![0; 32],
            HashAlgorithm::Sha512,
            SignaturePadding::Pkcs1,
        )
        .unwrap_err();
        assert!(matches!(err, SigningError::InvalidInput(_)));

        let req = SigningRequest::new(vec![1; 48], SignaturePadding::Pss).unwrap();
        assert_eq!(req.algorithm(), HashAlgorithm::Sha384);
    }

    #[test]
    fn algorithm_names_parse_back() {
        for name in ["RS256", "ps384", "Rs512"] {
            let alg: SignatureAlgorithm = name.parse().unwrap();
            assert_eq!(alg.as_str(), name.to_ascii_uppercase());
        }
        assert!("ES256".parse::<SignatureAlgorithm>().is_err());
    }
}
