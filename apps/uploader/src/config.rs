//! Uploader configuration.
//!
//! Configuration is stored as TOML, read from the path given as the first
//! argument or from the platform default:
//! - Linux: `~/.config/chunkup/uploader.toml`
//! - Windows: `%APPDATA%/chunkup/uploader.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use chunkup_multipart::{RetryPolicy, UploadConfig};
use chunkup_protocol::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_TASK_LIMIT, MIN_PART_SIZE};
use chunkup_protocol::{ChecksumAlgorithm, ObjectTarget};
use chunkup_s3::{DEFAULT_MAX_CONNECTIONS, S3Settings, StaticCredentials};
use serde::{Deserialize, Serialize};

/// Uploader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Destination bucket.
    #[serde(default)]
    pub bucket: String,

    /// Destination object key.
    #[serde(default)]
    pub key: String,

    /// Local file to upload. Defaults to `key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub force_path_style: bool,

    /// Maximum part uploads in flight.
    #[serde(default = "default_task_limit")]
    pub task_limit: usize,

    /// Part size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Maximum concurrent S3 requests.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default)]
    pub checksum_algorithm: ChecksumAlgorithm,

    /// JSON file with `accessKeyId`, `secretAccessKey` and optionally
    /// `sessionToken`. Without it the ambient AWS credentials are used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<PathBuf>,

    /// Serialized last: TOML tables must follow plain values.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Per-part retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// Contents of the credentials file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsFile {
    access_key_id: String,
    secret_access_key: String,
    #[serde(default)]
    session_token: Option<String>,
}

fn default_task_limit() -> usize {
    DEFAULT_TASK_LIMIT
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            key: String::new(),
            source: None,
            region: None,
            endpoint: None,
            force_path_style: false,
            task_limit: default_task_limit(),
            chunk_size: default_chunk_size(),
            max_connections: default_max_connections(),
            checksum_algorithm: ChecksumAlgorithm::default(),
            credentials_file: None,
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or from the platform default.
    pub fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path,
            None => config_path()?,
        };
        Self::load_from(&path)
    }

    /// Reads and validates the configuration at `path`.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Rejects values that would fail before or during the upload.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bucket.trim().is_empty() {
            bail!("bucket must be set");
        }
        if self.key.trim().is_empty() {
            bail!("key must be set");
        }
        if self.task_limit == 0 {
            bail!("task_limit must be at least 1");
        }
        if self.chunk_size < MIN_PART_SIZE {
            bail!(
                "chunk_size {} is below the S3 minimum part size of {MIN_PART_SIZE} bytes",
                self.chunk_size
            );
        }
        if self.max_connections == 0 {
            bail!("max_connections must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            bail!("retry.initial_backoff_ms exceeds retry.max_backoff_ms");
        }
        if self.max_connections < self.task_limit {
            tracing::warn!(
                task_limit = self.task_limit,
                max_connections = self.max_connections,
                "max_connections below task_limit, parts will queue for a connection"
            );
        }
        Ok(())
    }

    /// Local file to upload.
    pub fn source_path(&self) -> PathBuf {
        self.source
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.key))
    }

    pub fn upload_config(&self) -> UploadConfig {
        let mut config = UploadConfig::new(
            self.source_path(),
            ObjectTarget::new(&self.bucket, &self.key),
        );
        config.task_limit = self.task_limit;
        config.chunk_size = self.chunk_size;
        config.checksum_algorithm = self.checksum_algorithm;
        config.retry = RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
        };
        config
    }

    /// Reads `credentials_file`, if one is configured.
    pub fn load_credentials(&self) -> anyhow::Result<Option<StaticCredentials>> {
        let Some(path) = &self.credentials_file else {
            return Ok(None);
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading credentials {}", path.display()))?;
        let file: CredentialsFile = serde_json::from_str(&content)
            .with_context(|| format!("parsing credentials {}", path.display()))?;
        Ok(Some(StaticCredentials {
            access_key_id: file.access_key_id,
            secret_access_key: file.secret_access_key,
            session_token: file.session_token.filter(|t| !t.is_empty()),
        }))
    }

    pub fn s3_settings(&self, credentials: Option<StaticCredentials>) -> S3Settings {
        S3Settings {
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            force_path_style: self.force_path_style,
            credentials,
            max_connections: self.max_connections,
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("chunkup")
            .join("uploader.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("chunkup").join("uploader.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/chunkup/uploader.toml"))
    }
}
