//! Per-file signing jobs.

use crate::domain::types::TimestampUrl;
use crate::HashAlgorithm;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Descriptive metadata embedded alongside a signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_url: Option<String>,
}

/// One unit of work handed to a format signer.
///
/// Built by the orchestrator for each input file and dropped once the file's
/// outcome is recorded.
#[derive(Debug, Clone)]
pub struct SignJob {
    pub input_file: PathBuf,
    pub output_file: PathBuf,
    pub base_directory: PathBuf,
    /// Scratch directory inside the run's scoped temporary directory.
    pub work_dir: PathBuf,
    pub metadata: SigningMetadata,
    pub timestamp_url: Option<TimestampUrl>,
    pub file_hash_algorithm: HashAlgorithm,
    pub timestamp_hash_algorithm: HashAlgorithm,
}

impl SignJob {
    /// Whether the signed result replaces the input.
    #[must_use]
    pub fn is_in_place(&self) -> bool {
        self.input_file == self.output_file
    }

    /// Input path relative to the base directory, for display.
    #[must_use]
    pub fn display_name(&self) -> String {
        relative_display(&self.input_file, &self.base_directory)
    }
}

fn relative_display(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .display()
        .to_string()
}
