//! Timestamp request nonces.
//!
//! Nonces are random byte strings read as little-endian two's-complement
//! integers, so the top bit of the last byte is the sign bit. It is always
//! cleared: some TSAs reject negative nonces.

use crate::domain::constants::DEFAULT_NONCE_SIZE;
use crate::infra::error::{SigningError, SigningResult};
use der::asn1::Int;
use rand::RngCore;
use std::fmt;

/// A non-negative request nonce. Used once and then dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct Nonce(Box<[u8]>);

impl Nonce {
    /// Raw little-endian bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Minimal big-endian two's-complement encoding, as carried in DER.
    #[must_use]
    pub fn to_be_bytes(&self) -> Vec<u8> {
        let mut be: Vec<u8> = self.0.iter().rev().copied().collect();
        // Strip redundant leading zeros but keep one when the next byte would
        // otherwise read as negative.
        while be.len() > 1 && be[0] == 0 && be[1] & 0x80 == 0 {
            be.remove(0);
        }
        be
    }

    /// ASN.1 INTEGER form for the request.
    ///
    /// # Errors
    /// `Asn1Error` if the encoding is rejected.
    pub fn to_asn1(&self) -> SigningResult<Int> {
        Ok(Int::new(&self.to_be_bytes())?)
    }

    /// Whether `value` (as decoded from a response) equals this nonce.
    #[must_use]
    pub fn matches(&self, value: &Int) -> bool {
        self.to_be_bytes() == strip_sign_padding(value.as_bytes())
    }
}

fn strip_sign_padding(bytes: &[u8]) -> Vec<u8> {
    let mut out = bytes.to_vec();
    while out.len() > 1 && out[0] == 0 && out[1] & 0x80 == 0 {
        out.remove(0);
    }
    out
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", hex::encode(&self.0))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NonceGenerator;

impl NonceGenerator {
    /// 32-byte nonce.
    #[must_use]
    pub fn generate(&self) -> Nonce {
        fill(DEFAULT_NONCE_SIZE)
    }

    /// Nonce of `size` bytes.
    ///
    /// # Errors
    /// `InvalidInput` when `size` is zero.
    pub fn generate_sized(&self, size: usize) -> SigningResult<Nonce> {
        if size == 0 {
            return Err(SigningError::InvalidInput(
                "nonce size must be at least 1 byte".to_string(),
            ));
        }
        Ok(fill(size))
    }
}

fn fill(size: usize) -> Nonce {
    let mut bytes = vec![0u8; size];
    rand::rng().fill_bytes(&mut bytes);
    if let Some(last) = bytes.last_mut() {
        *last &= 0x7F;
    }
    Nonce(bytes.into_boxed_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_bit_is_always_clear() {
        let generator = NonceGenerator;
        for _ in 0..1000 {
            let nonce = generator.generate();
            assert_eq!(nonce.as_bytes().len(), 32);
            assert_eq!(nonce.as_bytes()[31] & 0x80, 0);
        }
    }

    #[test]
    fn nonces_are_not_reused() {
        let generator = NonceGenerator;
        assert_ne!(generator.generate(), generator.generate());
    }

    #[test]
    fn zero_size_is_rejected() {
        assert!(NonceGenerator.generate_sized(0).is_err());
        assert_eq!(NonceGenerator.generate_sized(8).unwrap().as_bytes().len(), 8);
    }

    #[test]
    fn big_endian_form_is_minimal_and_positive() {
        let nonce = Nonce(vec![0x01, 0x00, 0x00].into_boxed_slice());
        assert_eq!(nonce.to_be_bytes(), vec![0x01]);

        let nonce = Nonce(vec![0xFF, 0x00].into_boxed_slice());
        assert_eq!(nonce.to_be_bytes(), vec![0x00, 0xFF]);

        let nonce = Nonce(vec![0x00, 0x00].into_boxed_slice());
        assert_eq!(nonce.to_be_bytes(), vec![0x00]);
    }

    #[test]
    fn asn1_round_trip_matches() {
        for _ in 0..50 {
            let nonce = NonceGenerator.generate();
            let int = nonce.to_asn1().unwrap();
            assert!(nonce.matches(&int));
            assert!(!NonceGenerator.generate().matches(&int));
        }
    }
}
