//! ASN.1 structures of the RFC 3161 Time-Stamp Protocol.
//!
//! Only the fields this crate reads or writes are modelled; request
//! extensions are never sent.

use crate::domain::constants::{OID_SHA256, OID_SHA384, OID_SHA512};
use crate::HashAlgorithm;
use const_oid::ObjectIdentifier;
use der::asn1::{BitString, GeneralizedTime, Int, OctetString};
use der::{Decode, Encode, Sequence};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::Extensions;

/// `AlgorithmIdentifier` with optional parameters.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct AlgorithmIdentifier {
    pub algorithm: ObjectIdentifier,
    #[asn1(optional = "true")]
    pub parameters: Option<der::Any>,
}

impl AlgorithmIdentifier {
    /// Map back to a supported hash algorithm, if any.
    #[must_use]
    pub fn hash_algorithm(&self) -> Option<HashAlgorithm> {
        match self.algorithm {
            OID_SHA256 => Some(HashAlgorithm::Sha256),
            OID_SHA384 => Some(HashAlgorithm::Sha384),
            OID_SHA512 => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }
}

impl From<HashAlgorithm> for AlgorithmIdentifier {
    fn from(algo: HashAlgorithm) -> Self {
        Self {
            algorithm: algo.oid(),
            parameters: None,
        }
    }
}

/// `MessageImprint ::= SEQUENCE { hashAlgorithm, hashedMessage }`
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct MessageImprint {
    pub hash_algorithm: AlgorithmIdentifier,
    pub hashed_message: OctetString,
}

impl MessageImprint {
    pub fn new(algorithm: HashAlgorithm, digest: Vec<u8>) -> der::Result<Self> {
        Ok(Self {
            hash_algorithm: algorithm.into(),
            hashed_message: OctetString::new(digest)?,
        })
    }
}

/// `TimeStampReq`, RFC 3161 section 2.4.1.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TimeStampReq {
    pub version: u8,
    pub message_imprint: MessageImprint,
    #[asn1(optional = "true")]
    pub req_policy: Option<ObjectIdentifier>,
    #[asn1(optional = "true")]
    pub nonce: Option<Int>,
    #[asn1(default = "default_false")]
    pub cert_req: bool,
}

fn default_false() -> bool {
    false
}

impl TimeStampReq {
    /// Version 1 request asking the TSA to include its certificates.
    #[must_use]
    pub fn new(message_imprint: MessageImprint, nonce: Int) -> Self {
        Self {
            version: 1,
            message_imprint,
            req_policy: None,
            nonce: Some(nonce),
            cert_req: true,
        }
    }
}

/// RFC 3161 `PKIStatus` values.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum PkiStatus {
    Granted = 0,
    GrantedWithMods = 1,
    Rejection = 2,
    Waiting = 3,
    RevocationWarning = 4,
    RevocationNotification = 5,
}

impl TryFrom<u8> for PkiStatus {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PkiStatus::Granted),
            1 => Ok(PkiStatus::GrantedWithMods),
            2 => Ok(PkiStatus::Rejection),
            3 => Ok(PkiStatus::Waiting),
            4 => Ok(PkiStatus::RevocationWarning),
            5 => Ok(PkiStatus::RevocationNotification),
            other => Err(other),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct PkiStatusInfo {
    pub status: u8,
    #[asn1(optional = "true")]
    pub status_string: Option<Vec<String>>,
    #[asn1(optional = "true")]
    pub fail_info: Option<BitString>,
}

impl PkiStatusInfo {
    #[must_use]
    pub fn granted() -> Self {
        Self {
            status: PkiStatus::Granted as u8,
            status_string: None,
            fail_info: None,
        }
    }

    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(
            PkiStatus::try_from(self.status),
            Ok(PkiStatus::Granted | PkiStatus::GrantedWithMods)
        )
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct Accuracy {
    #[asn1(optional = "true")]
    pub seconds: Option<u64>,
    #[asn1(context_specific = "0", optional = "true")]
    pub millis: Option<u16>,
    #[asn1(context_specific = "1", optional = "true")]
    pub micros: Option<u16>,
}

/// `TSTInfo`, the signed content of a timestamp token.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TstInfo {
    pub version: u8,
    pub policy: ObjectIdentifier,
    pub message_imprint: MessageImprint,
    pub serial_number: Int,
    pub gen_time: GeneralizedTime,
    #[asn1(optional = "true")]
    pub accuracy: Option<Accuracy>,
    #[asn1(default = "default_false")]
    pub ordering: bool,
    #[asn1(optional = "true")]
    pub nonce: Option<Int>,
    #[asn1(context_specific = "0", optional = "true", tag_mode = "EXPLICIT")]
    pub tsa: Option<GeneralName>,
    #[asn1(context_specific = "1", optional = "true", tag_mode = "IMPLICIT")]
    pub extensions: Option<Extensions>,
}

impl TstInfo {
    pub fn from_der_bytes(bytes: &[u8]) -> der::Result<Self> {
        Self::from_der(bytes)
    }
}

/// `TimeStampResp`, RFC 3161 section 2.4.2.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TimeStampResp {
    pub status: PkiStatusInfo,
    #[asn1(optional = "true")]
    pub time_stamp_token: Option<der::Any>,
}

impl TimeStampResp {
    pub fn from_der_bytes(bytes: &[u8]) -> der::Result<Self> {
        Self::from_der(bytes)
    }

    pub fn to_der_bytes(&self) -> der::Result<Vec<u8>> {
        self.to_der()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_sets_cert_req_and_version() {
        let imprint = MessageImprint::new(HashAlgorithm::Sha384, vec![7; 48]).unwrap();
        let req = TimeStampReq::new(imprint, Int::new(&[0x01, 0x02]).unwrap());
        let der = req.to_der().unwrap();
        let back = TimeStampReq::from_der(&der).unwrap();
        assert_eq!(back.version, 1);
        assert!(back.cert_req);
        assert_eq!(
            back.message_imprint.hash_algorithm.hash_algorithm(),
            Some(HashAlgorithm::Sha384)
        );
    }

    #[test]
    fn status_classification() {
        assert!(PkiStatusInfo::granted().is_granted());
        let rejected = PkiStatusInfo {
            status: 2,
            status_string: None,
            fail_info: None,
        };
        assert!(!rejected.is_granted());
        assert_eq!(PkiStatus::try_from(9), Err(9));
    }
}
