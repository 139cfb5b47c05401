//! Batch signing workflow.
//!
//! Steps:
//! 1. Validate the request and resolve every input path
//! 2. Resolve the credential once and check the certificate's validity window
//! 3. Sniff each input and pick a format signer
//! 4. Run the signers under a concurrency bound, isolating per-file failures
//! 5. Collect the outcomes in input order

use crate::adapters::credential::CredentialSource;
use crate::domain::format::FileFormat;
use crate::domain::job::{SignJob, SigningMetadata};
use crate::domain::outcome::{BatchOutcome, FileOutcome};
use crate::domain::types::{MaxConcurrency, TimestampUrl};
use crate::infra::error::{SigningError, SigningResult};
use crate::infra::progress::{ProgressReporter, SilentProgress};
use crate::infra::temp::ScopedTempDir;
use crate::services::cert_verifier::CertificateVerifier;
use crate::services::format_registry::{FormatSigner, FormatSignerRegistry, SigningContext};
use crate::services::timestamp::TimestampClient;
use crate::HashAlgorithm;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Everything a caller asks for in one run.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub inputs: Vec<PathBuf>,
    /// Output path; only valid with exactly one input. `None` signs in place.
    pub output: Option<PathBuf>,
    /// Text file naming additional inputs, one per line.
    pub file_list: Option<PathBuf>,
    /// Directory relative inputs are resolved against. Defaults to the
    /// current directory.
    pub base_directory: Option<PathBuf>,
    pub metadata: SigningMetadata,
    pub timestamp_url: Option<TimestampUrl>,
    pub max_concurrency: usize,
    pub file_hash_algorithm: HashAlgorithm,
    pub timestamp_hash_algorithm: HashAlgorithm,
}

impl Default for BatchRequest {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            output: None,
            file_list: None,
            base_directory: None,
            metadata: SigningMetadata::default(),
            timestamp_url: None,
            max_concurrency: MaxConcurrency::default().get(),
            file_hash_algorithm: HashAlgorithm::Sha256,
            timestamp_hash_algorithm: HashAlgorithm::Sha256,
        }
    }
}

/// Validated request with every path resolved.
struct ResolvedBatch {
    base_directory: PathBuf,
    inputs: Vec<PathBuf>,
    output: Option<PathBuf>,
    concurrency: MaxConcurrency,
}

/// Read a file list: one path per line, `#` comments and blank lines
/// skipped, relative entries resolved against `base_directory`.
///
/// # Errors
/// `InvalidInput` when the list cannot be read.
pub fn read_file_list(path: &Path, base_directory: &Path) -> SigningResult<Vec<PathBuf>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        SigningError::InvalidInput(format!("Cannot read file list {}: {e}", path.display()))
    })?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| resolve(base_directory, Path::new(line)))
        .collect())
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Drives a batch: one credential, many files, bounded parallelism.
pub struct SigningOrchestrator {
    registry: FormatSignerRegistry,
    timestamp_client: TimestampClient,
    verifier: CertificateVerifier,
    progress: Arc<dyn ProgressReporter>,
    timestamp_timeout: Duration,
    timestamp_retry_attempts: u32,
    timestamp_retry_delay: Duration,
}

impl SigningOrchestrator {
    #[must_use]
    pub fn new(registry: FormatSignerRegistry, timestamp_client: TimestampClient) -> Self {
        Self {
            registry,
            timestamp_client,
            verifier: CertificateVerifier::default(),
            progress: Arc::new(SilentProgress),
            timestamp_timeout: Duration::from_secs(
                crate::domain::constants::DEFAULT_TIMESTAMP_TIMEOUT_SECS,
            ),
            timestamp_retry_attempts: 3,
            timestamp_retry_delay: Duration::from_secs(2),
        }
    }

    #[must_use]
    pub fn with_verifier(mut self, verifier: CertificateVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_timestamp_policy(mut self, timeout: Duration, attempts: u32, delay: Duration) -> Self {
        self.timestamp_timeout = timeout;
        self.timestamp_retry_attempts = attempts.max(1);
        self.timestamp_retry_delay = delay;
        self
    }

    fn validate(request: &BatchRequest) -> SigningResult<ResolvedBatch> {
        let concurrency = MaxConcurrency::new(request.max_concurrency)?;

        let base_directory = match &request.base_directory {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        if !base_directory.is_dir() {
            return Err(SigningError::InvalidInput(format!(
                "Base directory does not exist: {}",
                base_directory.display()
            )));
        }

        let mut inputs: Vec<PathBuf> = request
            .inputs
            .iter()
            .map(|p| resolve(&base_directory, p))
            .collect();
        if let Some(list) = &request.file_list {
            inputs.extend(read_file_list(&resolve(&base_directory, list), &base_directory)?);
        }

        if inputs.is_empty() {
            return Err(SigningError::InvalidInput("No input files given".to_string()));
        }
        if request.output.is_some() && inputs.len() != 1 {
            return Err(SigningError::InvalidInput(format!(
                "An output path can only be used with a single input ({} given)",
                inputs.len()
            )));
        }
        if let Some(missing) = inputs.iter().find(|p| !p.is_file()) {
            return Err(SigningError::InvalidInput(format!(
                "Input file does not exist: {}",
                missing.display()
            )));
        }

        Ok(ResolvedBatch {
            output: request.output.as_ref().map(|o| resolve(&base_directory, o)),
            base_directory,
            inputs,
            concurrency,
        })
    }

    /// Sign every file in `request` with `credential`.
    ///
    /// Per-file problems are recorded in the outcome. A credential failure
    /// raised by any job cancels the jobs that have not finished yet.
    ///
    /// # Errors
    /// Validation errors, and a credential that cannot be resolved at all.
    pub async fn sign(
        &self,
        request: BatchRequest,
        credential: Arc<dyn CredentialSource>,
        cancel: &CancellationToken,
    ) -> SigningResult<BatchOutcome> {
        let batch = Self::validate(&request)?;
        let run_dir = ScopedTempDir::new("batch-signer-")?;
        let run_cancel = cancel.child_token();

        log::info!("Resolving credential: {}", credential.describe());
        let certificate = credential.certificate(&run_cancel).await?;
        credential.signing_operation(&run_cancel).await?;
        self.verifier.verify(Some(&certificate))?;
        log::info!(
            "Signing {} file(s) as {} ({})",
            batch.inputs.len(),
            certificate.subject(),
            certificate.thumbprint()
        );

        let ctx = Arc::new(SigningContext {
            credential,
            timestamp_client: self.timestamp_client.clone(),
            nonces: crate::services::nonce::NonceGenerator,
            timestamp_timeout: self.timestamp_timeout,
            timestamp_retry_attempts: self.timestamp_retry_attempts,
            timestamp_retry_delay: self.timestamp_retry_delay,
            cancel: run_cancel.clone(),
        });

        let total = batch.inputs.len() as u64;
        let mut slots: Vec<Option<FileOutcome>> = vec![None; batch.inputs.len()];
        let mut done = 0u64;
        self.progress.update(0, total);

        let permits = Arc::new(Semaphore::new(batch.concurrency.get()));
        let mut tasks = JoinSet::new();

        for (index, input) in batch.inputs.iter().enumerate() {
            let signer = match self.pick_signer(input) {
                Ok(signer) => signer,
                Err(error) => {
                    log::error!("{}: {error}", input.display());
                    slots[index] = Some(FileOutcome::failure(input.clone(), error));
                    done += 1;
                    self.progress.update(done, total);
                    continue;
                }
            };

            let job = JobPlan {
                input: input.clone(),
                output: batch.output.clone().unwrap_or_else(|| input.clone()),
                base_directory: batch.base_directory.clone(),
                scratch_parent: run_dir.path().to_path_buf(),
                metadata: request.metadata.clone(),
                timestamp_url: request.timestamp_url.clone(),
                file_hash_algorithm: request.file_hash_algorithm,
                timestamp_hash_algorithm: request.timestamp_hash_algorithm,
            };
            let ctx = Arc::clone(&ctx);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move { (index, run_job(job, signer, ctx, permits).await) });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    if let Some(error) = outcome.error() {
                        self.progress
                            .set_message(&format!("{}: {error}", outcome.input_file.display()));
                    }
                    slots[index] = Some(outcome);
                }
                Err(e) => log::error!("Signing task aborted: {e}"),
            }
            done += 1;
            self.progress.update(done, total);
        }

        let files: Vec<FileOutcome> = slots
            .into_iter()
            .zip(&batch.inputs)
            .map(|(slot, input)| {
                slot.unwrap_or_else(|| {
                    FileOutcome::failure(
                        input.clone(),
                        SigningError::SignatureError("signing task aborted".to_string()),
                    )
                })
            })
            .collect();
        let outcome = BatchOutcome::new(files);

        if let Err(e) = run_dir.close() {
            log::warn!("Could not remove temporary directory: {e}");
        }

        if outcome.all_succeeded() {
            self.progress.finish();
        } else {
            self.progress
                .finish_with_error(&format!("{} of {} file(s) failed", outcome.failed(), total));
        }
        log::info!(
            "Batch finished: {} succeeded, {} failed",
            outcome.succeeded(),
            outcome.failed()
        );
        Ok(outcome)
    }

    fn pick_signer(&self, input: &Path) -> SigningResult<Arc<dyn FormatSigner>> {
        let format = FileFormat::sniff_file(input)?;
        self.registry.select(input, format).ok_or_else(|| {
            SigningError::FormatError(format!("no signer accepts {format} files"))
        })
    }
}

/// Inputs for one spawned job.
struct JobPlan {
    input: PathBuf,
    output: PathBuf,
    base_directory: PathBuf,
    scratch_parent: PathBuf,
    metadata: SigningMetadata,
    timestamp_url: Option<TimestampUrl>,
    file_hash_algorithm: HashAlgorithm,
    timestamp_hash_algorithm: HashAlgorithm,
}

async fn run_job(
    plan: JobPlan,
    signer: Arc<dyn FormatSigner>,
    ctx: Arc<SigningContext>,
    permits: Arc<Semaphore>,
) -> FileOutcome {
    let input = plan.input.clone();
    let output = plan.output.clone();
    match sign_one(plan, signer.as_ref(), &ctx, &permits).await {
        Ok(()) => FileOutcome::success(input, output),
        Err(error) => {
            if error.is_credential_failure() {
                log::error!("Credential failure, aborting remaining jobs: {error}");
                ctx.cancel.cancel();
            } else if error != SigningError::Cancelled {
                log::error!("{}: {error}", input.display());
            }
            FileOutcome::failure(input, error)
        }
    }
}

async fn sign_one(
    plan: JobPlan,
    signer: &dyn FormatSigner,
    ctx: &SigningContext,
    permits: &Arc<Semaphore>,
) -> SigningResult<()> {
    let _permit = tokio::select! {
        biased;
        () = ctx.cancel.cancelled() => return Err(SigningError::Cancelled),
        permit = Arc::clone(permits).acquire_owned() => permit
            .map_err(|_| SigningError::Cancelled)?,
    };

    let scratch = ScopedTempDir::new_in(&plan.scratch_parent, "job-")?;
    let job = SignJob {
        input_file: plan.input,
        output_file: plan.output,
        base_directory: plan.base_directory,
        work_dir: scratch.path().to_path_buf(),
        metadata: plan.metadata,
        timestamp_url: plan.timestamp_url,
        file_hash_algorithm: plan.file_hash_algorithm,
        timestamp_hash_algorithm: plan.timestamp_hash_algorithm,
    };
    log::debug!("Signing {} with {}", job.display_name(), signer.name());

    let result = tokio::select! {
        biased;
        () = ctx.cancel.cancelled() => Err(SigningError::Cancelled),
        result = signer.sign(&job, ctx) => result,
    };
    drop(scratch);
    result
}
