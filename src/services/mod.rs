//! Service layer module root.
//! Contains certificate checks, nonce generation, RFC 3161 timestamping and
//! the format signers.

pub mod cert_verifier;
pub mod detached_signer;
pub mod format_registry;
pub mod nonce;
pub mod timestamp;
pub mod timestamp_request_builder;

pub use cert_verifier::CertificateVerifier;
pub use detached_signer::{DetachedSigner, SignatureEnvelope};
pub use format_registry::{FormatSigner, FormatSignerRegistry, SigningContext};
pub use nonce::{Nonce, NonceGenerator};
pub use timestamp::{TimestampClient, TimestampFailure, TimestampResult, TimestampToken};
pub use timestamp_request_builder::TimestampRequestBuilder;
