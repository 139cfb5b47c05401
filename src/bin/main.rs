//! Batch signer CLI
//!
//! Signs many files with one certificate, pulled from a local key store,
//! a remote HSM or a cloud signing service, with RFC 3161 timestamps.

use batch_signer::{
    adapters::credential::{CredentialProvider, CredentialSource},
    domain::{crypto::Certificate, job::SigningMetadata},
    infra::{
        config::{ConfigManager, ExportFormat, ProviderKind, SignerConfiguration},
        progress::{create_reporter, ProgressStyle},
    },
    services::FormatSignerRegistry,
    BatchRequest, CertificateVerifier, HashAlgorithm, NonceGenerator, SigningOrchestrator,
    TimestampClient, TimestampResult, TimestampUrl,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use miette::{Context, IntoDiagnostic, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "batch-signer")]
#[command(about = "Batch code signing with local, remote HSM or cloud credentials")]
#[command(long_about = "
Batch Signer - sign many files with one certificate

EXAMPLES:
    # Sign two files in place with a local PKCS#12 bundle
    batch-signer sign app.exe setup.msi --pfx signing.pfx

    # Sign everything listed in a file, four at a time
    batch-signer sign --file-list release.txt --base-directory out/ --max-concurrency 4

    # Sign through a remote HSM proxy
    batch-signer sign app.exe --provider remote --endpoint https://hsm.example.com --key-name release

    # Check a timestamp authority
    batch-signer test-timestamp http://timestamp.digicert.com

ENVIRONMENT VARIABLES:
    BATCH_SIGNER_PFX_PASSWORD   Password of the PKCS#12 bundle
    BATCH_SIGNER_TOKEN          Bearer token for remote and cloud providers
    RUST_LOG                    Logging level (debug, info, warn, error)
")]
#[command(version)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign one or more files
    Sign(SignArgs),

    /// Request a timestamp for test data from a timestamp authority
    TestTimestamp {
        /// Timestamp server URL (defaults to the configured server)
        url: Option<String>,

        /// Hash algorithm of the message imprint
        #[arg(long, value_enum, default_value = "sha256")]
        digest: HashAlgorithmArg,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Args)]
struct SignArgs {
    /// Files to sign
    #[arg(value_name = "INPUT_FILE")]
    inputs: Vec<PathBuf>,

    /// Output file path (single input only; defaults to signing in place)
    #[arg(short, long, value_name = "OUTPUT_FILE")]
    output: Option<PathBuf>,

    /// Text file listing additional inputs, one per line
    #[arg(long, value_name = "FILE")]
    file_list: Option<PathBuf>,

    /// Directory relative inputs are resolved against
    #[arg(long, value_name = "DIR")]
    base_directory: Option<PathBuf>,

    /// Application name recorded with the signature
    #[arg(long)]
    application_name: Option<String>,

    /// Publisher name recorded with the signature
    #[arg(long)]
    publisher_name: Option<String>,

    /// Description recorded with the signature
    #[arg(long)]
    description: Option<String>,

    /// Description URL recorded with the signature
    #[arg(long)]
    description_url: Option<String>,

    /// Timestamp server URL (overrides config)
    #[arg(short, long, value_name = "URL")]
    timestamp_url: Option<String>,

    /// Skip timestamping
    #[arg(long, conflicts_with = "timestamp_url")]
    no_timestamp: bool,

    /// Maximum number of files signed at once
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Hash algorithm for file digests
    #[arg(long, value_enum)]
    file_digest: Option<HashAlgorithmArg>,

    /// Hash algorithm for timestamp imprints
    #[arg(long, value_enum)]
    timestamp_digest: Option<HashAlgorithmArg>,

    /// Credential provider (overrides config)
    #[arg(long, value_enum)]
    provider: Option<ProviderArg>,

    /// PKCS#12 bundle for the local provider
    #[arg(long, value_name = "FILE")]
    pfx: Option<PathBuf>,

    /// PEM certificate for the local provider (with --key)
    #[arg(long, value_name = "FILE", requires = "key")]
    cert: Option<PathBuf>,

    /// PEM private key for the local provider (with --cert)
    #[arg(long, value_name = "FILE", requires = "cert")]
    key: Option<PathBuf>,

    /// Remote signing service base URL
    #[arg(long, value_name = "URL")]
    endpoint: Option<String>,

    /// Key name on the remote HSM
    #[arg(long)]
    key_name: Option<String>,

    /// Cloud signing account
    #[arg(long)]
    account: Option<String>,

    /// Cloud certificate profile
    #[arg(long)]
    profile: Option<String>,

    /// Progress indicator style
    #[arg(long, value_enum)]
    progress: Option<ProgressStyleArg>,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Create default configuration file
    Init,

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// Configuration value
        value: String,
    },

    /// Export configuration
    Export {
        /// Export format
        #[arg(short, long, value_enum, default_value = "toml")]
        format: ExportFormatArg,
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import configuration
    Import {
        /// Configuration file to import
        file: PathBuf,
        /// Import format
        #[arg(short, long, value_enum, default_value = "toml")]
        format: ExportFormatArg,
    },
}

#[derive(ValueEnum, Clone, Copy)]
enum HashAlgorithmArg {
    Sha256,
    Sha384,
    Sha512,
}

impl From<HashAlgorithmArg> for HashAlgorithm {
    fn from(arg: HashAlgorithmArg) -> Self {
        match arg {
            HashAlgorithmArg::Sha256 => HashAlgorithm::Sha256,
            HashAlgorithmArg::Sha384 => HashAlgorithm::Sha384,
            HashAlgorithmArg::Sha512 => HashAlgorithm::Sha512,
        }
    }
}

#[derive(ValueEnum, Clone, Copy)]
enum ProviderArg {
    Local,
    Remote,
    Cloud,
}

impl From<ProviderArg> for ProviderKind {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Local => ProviderKind::Local,
            ProviderArg::Remote => ProviderKind::Remote,
            ProviderArg::Cloud => ProviderKind::Cloud,
        }
    }
}

#[derive(ValueEnum, Clone, Copy)]
enum ProgressStyleArg {
    Percentage,
    Bar,
    Silent,
}

impl From<ProgressStyleArg> for ProgressStyle {
    fn from(arg: ProgressStyleArg) -> Self {
        match arg {
            ProgressStyleArg::Percentage => ProgressStyle::Percentage,
            ProgressStyleArg::Bar => ProgressStyle::ProgressBar,
            ProgressStyleArg::Silent => ProgressStyle::Silent,
        }
    }
}

#[derive(ValueEnum, Clone)]
enum ExportFormatArg {
    Toml,
    Json,
    Yaml,
}

impl From<ExportFormatArg> for ExportFormat {
    fn from(arg: ExportFormatArg) -> Self {
        match arg {
            ExportFormatArg::Toml => ExportFormat::Toml,
            ExportFormatArg::Json => ExportFormat::Json,
            ExportFormatArg::Yaml => ExportFormat::Yaml,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match cli.command {
        Commands::Sign(args) => {
            let exit_code = handle_sign_command(args).await?;
            std::process::exit(exit_code);
        }
        Commands::TestTimestamp { url, digest } => {
            handle_test_timestamp_command(url, digest.into()).await?;
        }
        Commands::Config(config_cmd) => {
            handle_config_command(config_cmd)?;
        }
    }

    Ok(())
}

/// Fold command line overrides into the stored configuration.
fn apply_overrides(config: &mut SignerConfiguration, args: &SignArgs) {
    if let Some(url) = &args.timestamp_url {
        config.timestamp_server.clone_from(url);
    }
    if let Some(n) = args.max_concurrency {
        config.max_concurrency = n;
    }
    if let Some(style) = args.progress {
        config.progress_style = match style {
            ProgressStyleArg::Percentage => "percentage",
            ProgressStyleArg::Bar => "bar",
            ProgressStyleArg::Silent => "silent",
        }
        .to_string();
    }

    let cred = &mut config.credential;
    if let Some(provider) = args.provider {
        cred.provider = provider.into();
    }
    if args.pfx.is_some() {
        cred.pkcs12_path.clone_from(&args.pfx);
    }
    if args.cert.is_some() {
        cred.certificate_path.clone_from(&args.cert);
        cred.key_path.clone_from(&args.key);
        cred.pkcs12_path = None;
    }
    for (target, value) in [
        (&mut cred.endpoint, &args.endpoint),
        (&mut cred.key_name, &args.key_name),
        (&mut cred.account, &args.account),
        (&mut cred.profile, &args.profile),
    ] {
        if value.is_some() {
            target.clone_from(value);
        }
    }
}

async fn handle_sign_command(args: SignArgs) -> Result<i32> {
    let config_manager = ConfigManager::new().into_diagnostic()?;
    let mut config = config_manager
        .load_or_default()
        .into_diagnostic()
        .context("Failed to load configuration")?;
    apply_overrides(&mut config, &args);
    config
        .validate()
        .into_diagnostic()
        .context("Invalid configuration")?;

    let file_hash_algorithm = match args.file_digest {
        Some(arg) => arg.into(),
        None => config.file_hash_algorithm.parse().into_diagnostic()?,
    };
    let timestamp_hash_algorithm = match args.timestamp_digest {
        Some(arg) => arg.into(),
        None => config.timestamp_hash_algorithm.parse().into_diagnostic()?,
    };
    let timestamp_url = if args.no_timestamp {
        None
    } else {
        Some(TimestampUrl::new(&config.timestamp_server).into_diagnostic()?)
    };

    let request = BatchRequest {
        inputs: args.inputs,
        output: args.output,
        file_list: args.file_list,
        base_directory: args.base_directory,
        metadata: SigningMetadata {
            application_name: args.application_name,
            publisher_name: args.publisher_name,
            description: args.description,
            description_url: args.description_url,
        },
        timestamp_url,
        max_concurrency: config.max_concurrency,
        file_hash_algorithm,
        timestamp_hash_algorithm,
    };

    let credential: Arc<dyn CredentialSource> = Arc::new(
        CredentialProvider::from_config(&config.credential)
            .into_diagnostic()
            .context("Cannot set up the credential provider")?,
    );
    let style: ProgressStyle = config.progress_style.parse().into_diagnostic()?;
    let orchestrator = SigningOrchestrator::new(
        FormatSignerRegistry::with_builtin(),
        TimestampClient::new().into_diagnostic()?,
    )
    .with_progress(create_reporter(style))
    .with_timestamp_policy(
        Duration::from_secs(config.timestamp_timeout_seconds),
        u32::try_from(config.timestamp_retry_attempts).unwrap_or(u32::MAX),
        Duration::from_secs(2),
    );

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling outstanding work");
            ctrl_c.cancel();
        }
    });

    let outcome = orchestrator
        .sign(request, Arc::clone(&credential), &cancel)
        .await;
    credential.close();
    let outcome = outcome.into_diagnostic()?;

    for file in outcome.failures() {
        if let Some(error) = file.error() {
            eprintln!("❌ {}: {error}", file.input_file.display());
        }
    }
    if outcome.all_succeeded() {
        println!("✅ Signed {} file(s)", outcome.succeeded());
    } else {
        eprintln!(
            "⚠️  {} succeeded, {} failed",
            outcome.succeeded(),
            outcome.failed()
        );
    }
    Ok(outcome.exit_code())
}

async fn handle_test_timestamp_command(url: Option<String>, digest: HashAlgorithm) -> Result<()> {
    let url = match url {
        Some(url) => url,
        None => ConfigManager::new()
            .into_diagnostic()?
            .load_or_default()
            .into_diagnostic()?
            .timestamp_server,
    };
    let url = TimestampUrl::new(url).into_diagnostic()?;
    println!("🌐 Testing {url} ...");

    let client = TimestampClient::new().into_diagnostic()?;
    let result = client
        .request_timestamp(
            &url,
            digest,
            NonceGenerator.generate(),
            Duration::from_secs(batch_signer::domain::constants::DEFAULT_TIMESTAMP_TIMEOUT_SECS),
            b"batch-signer timestamp connectivity test",
            &CancellationToken::new(),
        )
        .await
        .into_diagnostic()?;

    match result {
        TimestampResult::Success(token) => {
            println!("✅ Timestamp granted");
            println!("  Serial: {}", token.serial_hex());
            println!("  Imprint: {}", token.hash_algorithm());
            println!("  Token size: {} bytes", token.as_der().len());
            Ok(())
        }
        TimestampResult::PackageNotSigned => {
            println!("❓ Nothing to timestamp");
            Ok(())
        }
        TimestampResult::Failed(failure) => {
            eprintln!("❌ Failed: {failure}");
            std::process::exit(1);
        }
    }
}

fn print_certificate(certificate: &Certificate) {
    let verifier = CertificateVerifier::default();
    println!("  Subject: {}", certificate.subject());
    println!("  Thumbprint: {}", certificate.thumbprint());
    if let Ok(validity) = verifier.verify(Some(certificate)) {
        println!("  Validity: {validity:?}");
    }
}

fn handle_config_command(config_cmd: ConfigCommands) -> Result<()> {
    let config_manager = ConfigManager::new().into_diagnostic()?;

    match config_cmd {
        ConfigCommands::Show => match config_manager.load() {
            Ok(config) => {
                println!("📋 Current Configuration:");
                println!("  Timestamp server: {}", config.timestamp_server);
                println!(
                    "  Timestamp timeout: {}s ({} attempts)",
                    config.timestamp_timeout_seconds, config.timestamp_retry_attempts
                );
                println!("  Max concurrency: {}", config.max_concurrency);
                println!("  File digest: {}", config.file_hash_algorithm);
                println!("  Timestamp digest: {}", config.timestamp_hash_algorithm);
                println!("  Progress style: {}", config.progress_style);
                println!("  Credential provider: {}", config.credential.provider);
                if let Some(path) = &config.credential.certificate_path {
                    if let Ok(pem) = std::fs::read(path) {
                        if let Ok(cert) = Certificate::from_pem(&pem) {
                            print_certificate(&cert);
                        }
                    }
                }
                println!(
                    "  Configuration file: {}",
                    config_manager.config_path().display()
                );
            }
            Err(_) => {
                println!("📋 No configuration file found. Use 'config init' to create one.");
            }
        },

        ConfigCommands::Init => {
            let _config = config_manager.load_or_create_default().into_diagnostic()?;
            println!(
                "✅ Configuration initialized: {}",
                config_manager.config_path().display()
            );
            println!("   Edit the file to customize settings, or use 'config set' commands.");
        }

        ConfigCommands::Set { key, value } => {
            config_manager
                .update_value(&key, &value)
                .into_diagnostic()?;
            println!("✅ Configuration updated: {key} = {value}");
        }

        ConfigCommands::Export { format, output } => {
            let content = config_manager
                .export_config(format.into())
                .into_diagnostic()?;

            if let Some(output_path) = output {
                std::fs::write(&output_path, content).into_diagnostic()?;
                println!("✅ Configuration exported to: {}", output_path.display());
            } else {
                println!("{content}");
            }
        }

        ConfigCommands::Import { file, format } => {
            let content = std::fs::read_to_string(&file).into_diagnostic()?;
            config_manager
                .import_config(&content, format.into())
                .into_diagnostic()?;
            println!("✅ Configuration imported from: {}", file.display());
        }
    }

    Ok(())
}
