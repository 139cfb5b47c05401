//! Scoped temporary directories.
//!
//! Removal happens on drop, so the directory goes away on every exit path.
//! On Windows a scanner or indexer can still hold a handle for a moment after
//! we close our files, so failed removals are retried a few times before the
//! directory is abandoned with a warning. When dropped inside a tokio runtime
//! the retries run on the blocking pool so no worker thread sleeps.

use crate::infra::error::SigningResult;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF: Duration = Duration::from_millis(50);

pub struct ScopedTempDir {
    dir: Option<tempfile::TempDir>,
    path: PathBuf,
    attempts: u32,
    backoff: Duration,
}

impl ScopedTempDir {
    /// Create a fresh directory under the system temp dir.
    pub fn new(prefix: &str) -> SigningResult<Self> {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir()?;
        Ok(Self::wrap(dir))
    }

    /// Create a fresh directory inside `parent`.
    pub fn new_in(parent: &Path, prefix: &str) -> SigningResult<Self> {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir_in(parent)?;
        Ok(Self::wrap(dir))
    }

    fn wrap(dir: tempfile::TempDir) -> Self {
        let path = dir.path().to_path_buf();
        log::debug!("created scoped temp dir {}", path.display());
        Self {
            dir: Some(dir),
            path,
            attempts: DEFAULT_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }

    #[must_use]
    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts;
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory now, reporting the final error if it persists.
    ///
    /// Blocks the calling thread for the whole retry schedule.
    pub fn close(mut self) -> io::Result<()> {
        match self.first_attempt() {
            Ok(()) => Ok(()),
            Err(e) => retry_removal(&self.path, self.attempts, self.backoff, e),
        }
    }

    fn first_attempt(&mut self) -> io::Result<()> {
        match self.dir.take() {
            Some(dir) => dir.close(),
            None => Ok(()),
        }
    }
}

fn retry_removal(path: &Path, attempts: u32, backoff: Duration, first: io::Error) -> io::Result<()> {
    let mut last = first;
    for attempt in 1..=attempts {
        std::thread::sleep(backoff * attempt);
        if !path.exists() {
            return Ok(());
        }
        match std::fs::remove_dir_all(path) {
            Ok(()) => return Ok(()),
            Err(e) => last = e,
        }
    }
    log::warn!(
        "could not remove temp dir {} after {attempts} retries: {last}",
        path.display()
    );
    Err(last)
}

impl Drop for ScopedTempDir {
    fn drop(&mut self) {
        let Err(first) = self.first_attempt() else {
            return;
        };
        let path = self.path.clone();
        let (attempts, backoff) = (self.attempts, self.backoff);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    let _ = retry_removal(&path, attempts, backoff, first);
                });
            }
            Err(_) => {
                let _ = retry_removal(&path, attempts, backoff, first);
            }
        }
    }
}

impl std::fmt::Debug for ScopedTempDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ScopedTempDir({})", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_on_drop() {
        let path = {
            let dir = ScopedTempDir::new("scoped-").unwrap();
            std::fs::write(dir.path().join("f"), b"x").unwrap();
            dir.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn nested_dirs_and_explicit_close() {
        let outer = ScopedTempDir::new("outer-").unwrap();
        let inner = ScopedTempDir::new_in(outer.path(), "job-").unwrap();
        assert!(inner.path().starts_with(outer.path()));
        let inner_path = inner.path().to_path_buf();
        inner.close().unwrap();
        assert!(!inner_path.exists());
        assert!(outer.path().exists());
    }

    #[test]
    fn externally_removed_dir_is_not_an_error() {
        let dir = ScopedTempDir::new("gone-")
            .unwrap()
            .with_retry(1, Duration::from_millis(1));
        std::fs::remove_dir_all(dir.path()).unwrap();
        let _ = dir.close();
    }

    #[tokio::test]
    async fn drop_inside_runtime_retries_off_the_worker() {
        let dir = ScopedTempDir::new("contended-")
            .unwrap()
            .with_retry(3, Duration::from_millis(200));
        let path = dir.path().to_path_buf();
        // Removing it first makes the initial close fail and forces a retry.
        std::fs::remove_dir_all(&path).unwrap();

        let started = std::time::Instant::now();
        drop(dir);
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(!path.exists());
    }
}
