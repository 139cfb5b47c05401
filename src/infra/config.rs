//! Configuration management infrastructure.
//!
//! Persists signing defaults (timestamp server, concurrency, hash algorithms,
//! credential provider selection) so that command lines stay short. Values
//! given on the command line always win over the file.

use crate::domain::types::{MaxConcurrency, TimestampUrl};
use crate::infra::error::{SigningError, SigningResult};
use crate::HashAlgorithm;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Application configuration with all signing preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfiguration {
    /// RFC 3161 timestamp server
    pub timestamp_server: String,

    /// Timeout for one timestamp request
    pub timestamp_timeout_seconds: u64,

    /// Attempts per file before a timestamp failure is final
    pub timestamp_retry_attempts: usize,

    /// Upper bound on files signed in parallel
    pub max_concurrency: usize,

    /// Digest used for file content
    pub file_hash_algorithm: String,

    /// Digest used in the timestamp request
    pub timestamp_hash_algorithm: String,

    /// Progress indicator preferences
    pub progress_style: String,

    /// Whether to show verbose output
    pub verbose: bool,

    /// Where the signing key lives
    pub credential: CredentialConfig,
}

/// Credential provider kinds selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// PKCS#12 or PEM key on local disk
    Local,
    /// Key held by a remote HSM behind the signing service
    Remote,
    /// Key held by a hosted cloud signing account
    Cloud,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Cloud => "cloud",
        })
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" | "hsm" => Ok(Self::Remote),
            "cloud" => Ok(Self::Cloud),
            other => Err(SigningError::ConfigurationError(format!(
                "Unknown credential provider: {other}"
            ))),
        }
    }
}

/// Credential source settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    pub provider: ProviderKind,

    /// PKCS#12 bundle for the local provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pkcs12_path: Option<PathBuf>,

    /// PEM certificate and key, alternative to `pkcs12_path`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,

    /// Environment variable holding the PKCS#12 password
    pub password_env: String,

    /// Base URL of the remote signing service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Key name on the remote HSM
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,

    /// Cloud signing account and certificate profile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    /// Environment variable holding the bearer token for remote providers
    pub token_env: String,

    /// Maximum status polls per remote operation
    pub max_polls: u32,

    /// Delay between status polls
    pub poll_interval_ms: u64,
}

impl Default for SignerConfiguration {
    fn default() -> Self {
        Self {
            timestamp_server: "http://timestamp.digicert.com".to_string(),
            timestamp_timeout_seconds: crate::domain::constants::DEFAULT_TIMESTAMP_TIMEOUT_SECS,
            timestamp_retry_attempts: 3,
            max_concurrency: MaxConcurrency::default().get(),
            file_hash_algorithm: "sha256".to_string(),
            timestamp_hash_algorithm: "sha256".to_string(),
            progress_style: "auto".to_string(),
            verbose: false,
            credential: CredentialConfig::default(),
        }
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Local,
            pkcs12_path: None,
            certificate_path: None,
            key_path: None,
            password_env: "BATCH_SIGNER_PFX_PASSWORD".to_string(),
            endpoint: None,
            key_name: None,
            account: None,
            profile: None,
            token_env: "BATCH_SIGNER_TOKEN".to_string(),
            max_polls: 60,
            poll_interval_ms: 500,
        }
    }
}

impl SignerConfiguration {
    /// Validate configuration values
    pub fn validate(&self) -> SigningResult<()> {
        for (name, value) in [
            ("file_hash_algorithm", &self.file_hash_algorithm),
            ("timestamp_hash_algorithm", &self.timestamp_hash_algorithm),
        ] {
            value.parse::<HashAlgorithm>().map_err(|_| {
                SigningError::ConfigurationError(format!("Invalid {name}: {value}"))
            })?;
        }

        TimestampUrl::new(&self.timestamp_server)?;
        MaxConcurrency::new(self.max_concurrency)
            .map_err(|e| SigningError::ConfigurationError(e.to_string()))?;

        if self.timestamp_timeout_seconds == 0 {
            return Err(SigningError::ConfigurationError(
                "Timestamp timeout must be greater than 0".to_string(),
            ));
        }
        if self.timestamp_retry_attempts == 0 {
            return Err(SigningError::ConfigurationError(
                "Retry attempts must be greater than 0".to_string(),
            ));
        }

        let cred = &self.credential;
        if cred.max_polls == 0 {
            return Err(SigningError::ConfigurationError(
                "max_polls must be greater than 0".to_string(),
            ));
        }
        if matches!(cred.provider, ProviderKind::Remote | ProviderKind::Cloud) {
            if let Some(endpoint) = &cred.endpoint {
                if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                    return Err(SigningError::ConfigurationError(format!(
                        "Remote endpoint must be an http(s) URL: {endpoint}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Configuration manager for handling config files
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new configuration manager with default path
    pub fn new() -> SigningResult<Self> {
        let config_path = Self::default_config_path()?;
        Ok(Self { config_path })
    }

    /// Create a configuration manager with custom path
    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            config_path: path.as_ref().to_path_buf(),
        }
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> SigningResult<PathBuf> {
        if let Some(config_dir) = dirs::config_dir() {
            Ok(config_dir.join("batch-signer").join("config.toml"))
        } else {
            Ok(PathBuf::from("batch-signer-config.toml"))
        }
    }

    /// Load configuration from file, creating default if it doesn't exist
    pub fn load_or_create_default(&self) -> SigningResult<SignerConfiguration> {
        if self.config_path.exists() {
            self.load()
        } else {
            log::info!(
                "Configuration file not found, creating default: {}",
                self.config_path.display()
            );
            let default_config = SignerConfiguration::default();
            self.save(&default_config)?;
            Ok(default_config)
        }
    }

    /// Load configuration from file, or defaults when there is none.
    pub fn load_or_default(&self) -> SigningResult<SignerConfiguration> {
        if self.config_path.exists() {
            self.load()
        } else {
            Ok(SignerConfiguration::default())
        }
    }

    /// Load configuration from file
    pub fn load(&self) -> SigningResult<SignerConfiguration> {
        log::debug!("Loading configuration from: {}", self.config_path.display());

        let content = fs::read_to_string(&self.config_path).map_err(|e| {
            SigningError::ConfigurationError(format!(
                "Failed to read config file {}: {}",
                self.config_path.display(),
                e
            ))
        })?;

        let config: SignerConfiguration = toml::from_str(&content).map_err(|e| {
            SigningError::ConfigurationError(format!("Failed to parse config file: {e}"))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, config: &SignerConfiguration) -> SigningResult<()> {
        log::info!("Saving configuration to: {}", self.config_path.display());

        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                SigningError::ConfigurationError(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let content = toml::to_string_pretty(config).map_err(|e| {
            SigningError::ConfigurationError(format!("Failed to serialize config: {e}"))
        })?;

        fs::write(&self.config_path, content).map_err(|e| {
            SigningError::ConfigurationError(format!(
                "Failed to write config file {}: {}",
                self.config_path.display(),
                e
            ))
        })?;

        Ok(())
    }

    /// Update a specific configuration value
    pub fn update_value(&self, key: &str, value: &str) -> SigningResult<()> {
        let mut config = self.load_or_default()?;

        match key {
            "timestamp_server" => {
                TimestampUrl::new(value)?;
                config.timestamp_server = value.to_string();
            }
            "timestamp_timeout_seconds" => {
                config.timestamp_timeout_seconds = parse_number(key, value)?;
            }
            "timestamp_retry_attempts" => {
                config.timestamp_retry_attempts = parse_number(key, value)?;
            }
            "max_concurrency" => {
                config.max_concurrency = parse_number(key, value)?;
            }
            "file_hash_algorithm" | "timestamp_hash_algorithm" => {
                value.parse::<HashAlgorithm>().map_err(|_| {
                    SigningError::ConfigurationError(format!("Invalid hash algorithm: {value}"))
                })?;
                if key == "file_hash_algorithm" {
                    config.file_hash_algorithm = value.to_string();
                } else {
                    config.timestamp_hash_algorithm = value.to_string();
                }
            }
            "verbose" => {
                config.verbose = value.parse().map_err(|_| {
                    SigningError::ConfigurationError(format!("Invalid boolean value: {value}"))
                })?;
            }
            "credential.provider" => config.credential.provider = value.parse()?,
            "credential.pkcs12_path" => config.credential.pkcs12_path = Some(value.into()),
            "credential.endpoint" => config.credential.endpoint = Some(value.to_string()),
            "credential.key_name" => config.credential.key_name = Some(value.to_string()),
            "credential.account" => config.credential.account = Some(value.to_string()),
            "credential.profile" => config.credential.profile = Some(value.to_string()),
            "credential.max_polls" => config.credential.max_polls = parse_number(key, value)?,
            "credential.poll_interval_ms" => {
                config.credential.poll_interval_ms = parse_number(key, value)?;
            }
            _ => {
                return Err(SigningError::ConfigurationError(format!(
                    "Unknown configuration key: {key}"
                )));
            }
        }

        config.validate()?;
        self.save(&config)
    }

    /// Get the configuration file path
    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Export configuration as a portable format
    pub fn export_config(&self, format: ExportFormat) -> SigningResult<String> {
        let config = self.load_or_default()?;

        match format {
            ExportFormat::Toml => toml::to_string_pretty(&config)
                .map_err(|e| SigningError::ConfigurationError(format!("TOML export failed: {e}"))),
            ExportFormat::Json => serde_json::to_string_pretty(&config)
                .map_err(|e| SigningError::ConfigurationError(format!("JSON export failed: {e}"))),
            ExportFormat::Yaml => serde_yaml::to_string(&config)
                .map_err(|e| SigningError::ConfigurationError(format!("YAML export failed: {e}"))),
        }
    }

    /// Import configuration from a string
    pub fn import_config(&self, content: &str, format: ExportFormat) -> SigningResult<()> {
        let config: SignerConfiguration = match format {
            ExportFormat::Toml => toml::from_str(content).map_err(|e| {
                SigningError::ConfigurationError(format!("TOML import failed: {e}"))
            })?,
            ExportFormat::Json => serde_json::from_str(content).map_err(|e| {
                SigningError::ConfigurationError(format!("JSON import failed: {e}"))
            })?,
            ExportFormat::Yaml => serde_yaml::from_str(content).map_err(|e| {
                SigningError::ConfigurationError(format!("YAML import failed: {e}"))
            })?,
        };

        config.validate()?;
        self.save(&config)
    }
}

/// Configuration export/import formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Toml,
    Json,
    Yaml,
}

impl std::str::FromStr for ExportFormat {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "toml" => Ok(Self::Toml),
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(SigningError::ConfigurationError(format!(
                "Unknown export format: {other}"
            ))),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> SigningResult<T> {
    value.parse().map_err(|_| {
        SigningError::ConfigurationError(format!("Invalid number for {key}: {value}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_configuration() {
        let config = SignerConfiguration::default();
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.file_hash_algorithm, "sha256");
        assert_eq!(config.credential.provider, ProviderKind::Local);
        config.validate().unwrap();
    }

    #[test]
    fn test_config_serialization() {
        let mut config = SignerConfiguration::default();
        config.credential.provider = ProviderKind::Cloud;
        config.credential.account = Some("contoso".into());
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: SignerConfiguration = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: SignerConfiguration =
            toml::from_str("max_concurrency = 8\n[credential]\nprovider = \"remote\"\n").unwrap();
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.credential.provider, ProviderKind::Remote);
        assert_eq!(config.credential.max_polls, 60);
    }

    #[test]
    fn test_config_manager_with_temp_path() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.toml");
        let manager = ConfigManager::with_path(&config_path);

        let config = manager.load_or_create_default().unwrap();
        assert!(config_path.exists());

        let loaded_config = manager.load().unwrap();
        assert_eq!(config, loaded_config);
    }

    #[test]
    fn test_update_value_validates() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp_dir.path().join("c.toml"));

        manager.update_value("max_concurrency", "2").unwrap();
        assert_eq!(manager.load().unwrap().max_concurrency, 2);

        assert!(manager.update_value("max_concurrency", "0").is_err());
        assert!(manager.update_value("file_hash_algorithm", "md5").is_err());
        assert!(manager.update_value("no_such_key", "1").is_err());
        assert_eq!(manager.load().unwrap().max_concurrency, 2);
    }

    #[test]
    fn test_export_import_json_and_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp_dir.path().join("c.toml"));
        manager.update_value("credential.provider", "cloud").unwrap();

        for format in [ExportFormat::Json, ExportFormat::Yaml] {
            let text = manager.export_config(format).unwrap();
            let other = ConfigManager::with_path(temp_dir.path().join("other.toml"));
            other.import_config(&text, format).unwrap();
            assert_eq!(other.load().unwrap().credential.provider, ProviderKind::Cloud);
        }

        assert!(manager
            .import_config("{\"max_concurrency\": 0}", ExportFormat::Json)
            .is_err());
    }
}
