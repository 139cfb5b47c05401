//! Built-in detached signer.
//!
//! Leaves the artifact's bytes untouched and writes the signature next to
//! it as `<output>.sig.json`. Works for every sniffed container kind, which
//! makes it the fallback when no embedding signer is registered.

use crate::domain::constants::SNIFF_LEN;
use crate::domain::crypto::{SignatureAlgorithm, SignaturePadding};
use crate::domain::format::FileFormat;
use crate::domain::job::{SignJob, SigningMetadata};
use crate::domain::manifest::load_manifest_bytes;
use crate::infra::error::{SigningError, SigningResult};
use crate::services::format_registry::{FormatSigner, SigningContext};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Suffix appended to the output path for the signature envelope.
pub const ENVELOPE_SUFFIX: &str = ".sig.json";

/// JSON signature envelope written beside the signed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEnvelope {
    pub file_name: String,
    pub format: String,
    pub digest_algorithm: String,
    pub digest_hex: String,
    pub signature_algorithm: String,
    pub certificate_thumbprint: String,
    pub certificate_b64: String,
    pub signature_b64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_token_b64: Option<String>,
    #[serde(default)]
    pub metadata: SigningMetadata,
}

impl SignatureEnvelope {
    /// # Errors
    /// `InvalidInput` when the JSON is not an envelope.
    pub fn from_json(text: &str) -> SigningResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// # Errors
    /// `InvalidInput` when the signature field is not base64.
    pub fn signature(&self) -> SigningResult<Vec<u8>> {
        decode_field("signature_b64", &self.signature_b64)
    }

    /// # Errors
    /// `InvalidInput` when the token field is not base64.
    pub fn timestamp_token(&self) -> SigningResult<Option<Vec<u8>>> {
        self.timestamp_token_b64
            .as_deref()
            .map(|t| decode_field("timestamp_token_b64", t))
            .transpose()
    }
}

fn b64() -> &'static base64::engine::GeneralPurpose {
    &base64::engine::general_purpose::STANDARD
}

fn decode_field(name: &str, value: &str) -> SigningResult<Vec<u8>> {
    b64()
        .decode(value)
        .map_err(|e| SigningError::InvalidInput(format!("{name}: {e}")))
}

/// Envelope path for a signed output.
#[must_use]
pub fn envelope_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(ENVELOPE_SUFFIX);
    PathBuf::from(name)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedSigner;

impl DetachedSigner {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FormatSigner for DetachedSigner {
    fn name(&self) -> &'static str {
        "detached"
    }

    fn can_sign(&self, _path: &Path, format: FileFormat) -> bool {
        !matches!(format, FileFormat::Unknown)
    }

    async fn sign(&self, job: &SignJob, ctx: &SigningContext) -> SigningResult<()> {
        let content = tokio::fs::read(&job.input_file).await?;
        let format = FileFormat::detect(&content[..content.len().min(SNIFF_LEN)], &job.input_file);

        if format == FileFormat::XmlManifest {
            let manifest = load_manifest_bytes(&content).map_err(|e| match e {
                SigningError::FormatError(msg) => {
                    SigningError::FormatError(format!("{}: {msg}", job.display_name()))
                }
                other => other,
            })?;
            if let Some(name) = manifest.identity.as_ref().and_then(|i| i.name.as_deref()) {
                log::debug!("Manifest {} declares assembly {name}", job.display_name());
            }
        }

        let digest = job.file_hash_algorithm.digest(&content);
        let digest_hex = hex::encode(&digest);
        let signature = ctx.sign_digest(digest, SignaturePadding::Pkcs1).await?;
        let certificate = ctx.credential.certificate(&ctx.cancel).await?;
        let token = ctx.timestamp_signature(job, &signature).await?;

        let envelope = SignatureEnvelope {
            file_name: job
                .output_file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            format: format.to_string(),
            digest_algorithm: job.file_hash_algorithm.to_string(),
            digest_hex,
            signature_algorithm: SignatureAlgorithm::from_parts(
                job.file_hash_algorithm,
                SignaturePadding::Pkcs1,
            )
            .to_string(),
            certificate_thumbprint: certificate.thumbprint().to_string(),
            certificate_b64: b64().encode(certificate.as_der()),
            signature_b64: b64().encode(&signature),
            timestamp_token_b64: token.as_ref().map(|t| b64().encode(t.as_der())),
            metadata: job.metadata.clone(),
        };

        // Stage in the job's scratch directory, then move into place.
        let staged = job.work_dir.join("envelope.sig.json");
        tokio::fs::write(&staged, serde_json::to_vec_pretty(&envelope)?).await?;

        if !job.is_in_place() {
            if let Some(parent) = job.output_file.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&job.input_file, &job.output_file).await?;
        }
        let destination = envelope_path(&job.output_file);
        if tokio::fs::rename(&staged, &destination).await.is_err() {
            // Scratch space may sit on another filesystem.
            tokio::fs::copy(&staged, &destination).await?;
        }

        log::info!(
            "Signed {} ({format}){}",
            job.display_name(),
            if token.is_some() { ", timestamped" } else { "" }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_path_appends_suffix() {
        assert_eq!(
            envelope_path(Path::new("/out/app.exe")),
            PathBuf::from("/out/app.exe.sig.json")
        );
    }

    #[test]
    fn test_unknown_is_not_signable() {
        let signer = DetachedSigner::new();
        assert!(!signer.can_sign(Path::new("x.bin"), FileFormat::Unknown));
        for format in [
            FileFormat::Pe,
            FileFormat::Msi,
            FileFormat::Opc,
            FileFormat::XmlManifest,
            FileFormat::Script,
        ] {
            assert!(signer.can_sign(Path::new("x"), format));
        }
    }

    #[test]
    fn test_envelope_json_shape() {
        let envelope = SignatureEnvelope {
            file_name: "app.exe".into(),
            format: "PE (Portable Executable)".into(),
            digest_algorithm: "sha256".into(),
            digest_hex: "00".into(),
            signature_algorithm: "RS256".into(),
            certificate_thumbprint: "AB".into(),
            certificate_b64: "AAAA".into(),
            signature_b64: b64().encode([1, 2, 3]),
            timestamp_token_b64: None,
            metadata: SigningMetadata::default(),
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(!json.contains("timestamp_token_b64"));
        let parsed = SignatureEnvelope::from_json(&json).unwrap();
        assert_eq!(parsed.signature().unwrap(), vec![1, 2, 3]);
        assert_eq!(parsed.timestamp_token().unwrap(), None);
    }
}
