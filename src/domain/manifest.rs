//! Hardened loader for XML application manifests.
//!
//! Manifests come from the files being signed, so they are untrusted input.
//! Document type declarations are refused outright: no internal subset, no
//! entity definitions, no external references.

use crate::infra::error::{SigningError, SigningResult};
use std::path::Path;

/// Summary of a loaded manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDocument {
    pub root: String,
    pub namespace: Option<String>,
    pub identity: Option<AssemblyIdentity>,
    pub element_count: usize,
}

/// `<assemblyIdentity>` attributes, when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyIdentity {
    pub name: Option<String>,
    pub version: Option<String>,
    pub public_key_token: Option<String>,
}

const MAX_NODES: u32 = 100_000;

/// Parse manifest text.
///
/// # Errors
/// `FormatError` when the document declares a DOCTYPE, defines or references
/// external entities, or is not well formed.
pub fn load_manifest_str(text: &str) -> SigningResult<ManifestDocument> {
    reject_declarations(text)?;

    let mut options = roxmltree::ParsingOptions::default();
    options.allow_dtd = false;
    options.nodes_limit = MAX_NODES;

    let doc = roxmltree::Document::parse_with_options(text, options)
        .map_err(|e| SigningError::FormatError(format!("Malformed XML manifest: {e}")))?;

    let root = doc.root_element();
    let identity = root
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "assemblyIdentity")
        .map(|n| AssemblyIdentity {
            name: n.attribute("name").map(str::to_string),
            version: n.attribute("version").map(str::to_string),
            public_key_token: n.attribute("publicKeyToken").map(str::to_string),
        });

    Ok(ManifestDocument {
        root: root.tag_name().name().to_string(),
        namespace: root.tag_name().namespace().map(str::to_string),
        identity,
        element_count: doc.descendants().filter(roxmltree::Node::is_element).count(),
    })
}

/// Read and parse a manifest file.
///
/// # Errors
/// `IoError` if unreadable, `FormatError` for non UTF-8 or rejected content.
pub fn load_manifest(path: &Path) -> SigningResult<ManifestDocument> {
    let bytes = std::fs::read(path)?;
    load_manifest_bytes(&bytes).map_err(|e| match e {
        SigningError::FormatError(msg) => {
            SigningError::FormatError(format!("{}: {msg}", path.display()))
        }
        other => other,
    })
}

/// Parse manifest bytes, tolerating a UTF-8 byte order mark.
///
/// # Errors
/// `FormatError` for non UTF-8 or rejected content.
pub fn load_manifest_bytes(bytes: &[u8]) -> SigningResult<ManifestDocument> {
    let bytes = bytes
        .strip_prefix(&crate::domain::constants::UTF8_BOM[..])
        .unwrap_or(bytes);
    let text = std::str::from_utf8(bytes)
        .map_err(|e| SigningError::FormatError(format!("manifest is not UTF-8: {e}")))?;
    load_manifest_str(text)
}

// The parser already refuses DTDs; this check keeps the error message specific
// and catches declarations hidden behind unusual casing.
fn reject_declarations(text: &str) -> SigningResult<()> {
    let upper = text.to_ascii_uppercase();
    if upper.contains("<!DOCTYPE") {
        return Err(SigningError::FormatError(
            "XML manifest contains a DOCTYPE declaration".to_string(),
        ));
    }
    if upper.contains("<!ENTITY") {
        return Err(SigningError::FormatError(
            "XML manifest declares entities".to_string(),
        ));
    }
    Ok(())
}
