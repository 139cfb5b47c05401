//! Per-file and batch-level signing results.

use crate::infra::error::SigningError;
use std::path::PathBuf;

/// Result of signing one input file.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub input_file: PathBuf,
    pub output_file: Option<PathBuf>,
    pub result: Result<(), SigningError>,
}

impl FileOutcome {
    #[must_use]
    pub fn success(input_file: PathBuf, output_file: PathBuf) -> Self {
        Self {
            input_file,
            output_file: Some(output_file),
            result: Ok(()),
        }
    }

    #[must_use]
    pub fn failure(input_file: PathBuf, error: SigningError) -> Self {
        Self {
            input_file,
            output_file: None,
            result: Err(error),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    #[must_use]
    pub fn error(&self) -> Option<&SigningError> {
        self.result.as_ref().err()
    }
}

/// Outcomes of a whole run, in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    files: Vec<FileOutcome>,
}

impl BatchOutcome {
    #[must_use]
    pub fn new(files: Vec<FileOutcome>) -> Self {
        Self { files }
    }

    #[must_use]
    pub fn files(&self) -> &[FileOutcome] {
        &self.files
    }

    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.files.iter().filter(|f| f.is_success()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.files.len() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files.iter().filter(|f| !f.is_success())
    }

    /// True only when there was at least one file and every file succeeded.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        !self.files.is_empty() && self.failed() == 0
    }

    /// Process exit status: 0 on full success, 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.all_succeeded())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_failure_makes_exit_code_nonzero() {
        let ok = BatchOutcome::new(vec![
            FileOutcome::success("a".into(), "a".into()),
            FileOutcome::success("b".into(), "b".into()),
        ]);
        assert_eq!(ok.exit_code(), 0);

        let mixed = BatchOutcome::new(vec![
            FileOutcome::success("a".into(), "a".into()),
            FileOutcome::failure("b".into(), SigningError::FormatError("b".into())),
        ]);
        assert_eq!(mixed.exit_code(), 1);
        assert_eq!(mixed.succeeded(), 1);
        assert_eq!(mixed.failures().count(), 1);
    }

    #[test]
    fn empty_batch_is_not_a_success() {
        assert_eq!(BatchOutcome::default().exit_code(), 1);
    }
}
