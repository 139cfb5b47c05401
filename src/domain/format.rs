//! Container kind detection for signable files.
//!
//! Binary containers are recognised by their magic bytes; text formats fall
//! back to the file extension since they carry no reliable signature.

use crate::domain::constants::{OLE_MAGIC, PE_MAGIC, SNIFF_LEN, UTF8_BOM, ZIP_MAGIC};
use crate::infra::error::SigningResult;
use std::io::Read;
use std::path::Path;

/// Container kinds the orchestrator knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileFormat {
    /// Windows Portable Executable (.exe, .dll, .sys)
    Pe,
    /// OLE compound document (.msi, .msp, .mst)
    Msi,
    /// ZIP based Open Packaging Conventions package (.nupkg, .vsix, .appx)
    Opc,
    /// XML application or deployment manifest
    XmlManifest,
    /// Script file (.ps1, .psm1, .js, .vbs)
    Script,
    Unknown,
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pe => write!(f, "PE (Portable Executable)"),
            Self::Msi => write!(f, "MSI (Windows Installer)"),
            Self::Opc => write!(f, "OPC package"),
            Self::XmlManifest => write!(f, "XML manifest"),
            Self::Script => write!(f, "script"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl FileFormat {
    /// Detect the container kind from leading bytes and, for text, the path.
    #[must_use]
    pub fn detect(head: &[u8], path: &Path) -> Self {
        if head.starts_with(&OLE_MAGIC) {
            return Self::Msi;
        }
        if head.starts_with(&ZIP_MAGIC) {
            return Self::Opc;
        }
        if head.starts_with(&PE_MAGIC) {
            return Self::Pe;
        }

        let text = head.strip_prefix(&UTF8_BOM[..]).unwrap_or(head);
        if let Some(ext) = Self::from_extension(path) {
            if matches!(ext, Self::Script) && !text.contains(&0) {
                return ext;
            }
        }
        let trimmed = text
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .map_or(&[][..], |i| &text[i..]);
        if trimmed.starts_with(b"<?xml") || trimmed.starts_with(b"<") {
            return Self::XmlManifest;
        }
        Self::Unknown
    }

    /// Read the first bytes of `path` and sniff them.
    ///
    /// # Errors
    /// Returns `IoError` if the file cannot be opened or read.
    pub fn sniff_file(path: &Path) -> SigningResult<Self> {
        let mut head = Vec::with_capacity(SNIFF_LEN);
        std::fs::File::open(path)?
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut head)?;
        Ok(Self::detect(&head, path))
    }

    /// Extension hint. Used as the only signal for script files.
    #[must_use]
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "exe" | "dll" | "sys" | "ocx" | "scr" | "drv" | "efi" => Some(Self::Pe),
            "msi" | "msp" | "mst" => Some(Self::Msi),
            "nupkg" | "vsix" | "appx" | "msix" => Some(Self::Opc),
            "manifest" | "application" | "xml" => Some(Self::XmlManifest),
            "ps1" | "psm1" | "psd1" | "js" | "vbs" | "wsf" => Some(Self::Script),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_bytes_win_over_extension() {
        let mut ole = OLE_MAGIC.to_vec();
        ole.extend_from_slice(&[0; 16]);
        assert_eq!(FileFormat::detect(&ole, Path::new("a.exe")), FileFormat::Msi);
        assert_eq!(
            FileFormat::detect(b"MZ\x90\x00", Path::new("setup.msi")),
            FileFormat::Pe
        );
        assert_eq!(
            FileFormat::detect(b"PK\x03\x04rest", Path::new("pkg.bin")),
            FileFormat::Opc
        );
    }

    #[test]
    fn xml_is_recognised_with_bom_and_whitespace() {
        let mut doc = UTF8_BOM.to_vec();
        doc.extend_from_slice(b"\n  <?xml version=\"1.0\"?><assembly/>");
        assert_eq!(
            FileFormat::detect(&doc, Path::new("app.exe.manifest")),
            FileFormat::XmlManifest
        );
    }

    #[test]
    fn scripts_need_an_extension() {
        assert_eq!(
            FileFormat::detect(b"Write-Host 'hi'", Path::new("run.ps1")),
            FileFormat::Script
        );
        assert_eq!(
            FileFormat::detect(b"Write-Host 'hi'", Path::new("run.txt")),
            FileFormat::Unknown
        );
    }

    #[test]
    fn sniff_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool.bin");
        std::fs::write(&path, b"MZ\x00\x00").unwrap();
        assert_eq!(FileFormat::sniff_file(&path).unwrap(), FileFormat::Pe);
        assert!(FileFormat::sniff_file(&dir.path().join("missing")).is_err());
    }
}
