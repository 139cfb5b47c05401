//! Centralized object identifiers and protocol constants.
//! Keep this intentionally small; only broadly reused literals should live here.

use const_oid::ObjectIdentifier;

// === Digest algorithm OIDs ===

/// SHA-256: 2.16.840.1.101.3.4.2.1
pub const OID_SHA256: ObjectIdentifier = const_oid::db::rfc5912::ID_SHA_256;

/// SHA-384: 2.16.840.1.101.3.4.2.2
pub const OID_SHA384: ObjectIdentifier = const_oid::db::rfc5912::ID_SHA_384;

/// SHA-512: 2.16.840.1.101.3.4.2.3
pub const OID_SHA512: ObjectIdentifier = const_oid::db::rfc5912::ID_SHA_512;

// === CMS / RFC 3161 OIDs ===

/// id-signedData: 1.2.840.113549.1.7.2
pub const OID_SIGNED_DATA: ObjectIdentifier = const_oid::db::rfc5911::ID_SIGNED_DATA;

/// id-ct-TSTInfo: 1.2.840.113549.1.9.16.1.4
pub const OID_TST_INFO: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.1.4");

// === Timestamp protocol ===

/// MIME type of an RFC 3161 request body.
pub const TIMESTAMP_QUERY_CONTENT_TYPE: &str = "application/timestamp-query";

/// MIME type of an RFC 3161 response body.
pub const TIMESTAMP_REPLY_CONTENT_TYPE: &str = "application/timestamp-reply";

/// Default nonce size in bytes.
pub const DEFAULT_NONCE_SIZE: usize = 32;

/// Largest timestamp reply accepted from a TSA. Real tokens with a full
/// chain stay well under 64 KiB.
pub const MAX_TIMESTAMP_REPLY_BYTES: usize = 256 * 1024;

/// Default timeout for a single timestamp request.
pub const DEFAULT_TIMESTAMP_TIMEOUT_SECS: u64 = 30;

// === File sniffing ===

/// OLE compound document signature (MSI, MSP, MST).
pub const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// ZIP local file header signature (OPC packages).
pub const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// DOS header signature of portable executables.
pub const PE_MAGIC: [u8; 2] = *b"MZ";

/// UTF-8 byte order mark.
pub const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Number of leading bytes read when sniffing a file's container kind.
pub const SNIFF_LEN: usize = 512;
