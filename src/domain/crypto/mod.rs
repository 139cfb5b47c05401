//! Foundational cryptographic domain types.
//!
//! Provides strongly-typed wrappers for cryptographic artifacts including:
//! - Parsed signing certificates and their chains
//! - Signing requests and the signature algorithm selectors derived from them

mod cert;
mod signature;

pub use crate::HashAlgorithm;
pub use cert::{Certificate, CertificateChain, TimeValidity};
pub use signature::{SignatureAlgorithm, SignaturePadding, SigningRequest};
