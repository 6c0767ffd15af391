use serde::Deserialize;
use std::path::PathBuf;

/// Which storage backend this process runs against. Chosen once at startup;
/// backends are never mixed within a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Gcs,
    Azure,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Storage backend selection: local | gcs | azure
    #[serde(default = "default_backend")]
    pub storage_backend: BackendKind,

    /// Root directory for the local backend (inputs, outputs, job registry)
    #[serde(default = "default_data_dir")]
    pub local_data_dir: PathBuf,

    /// GCS bucket name (required for the gcs backend)
    pub gcs_bucket: Option<String>,

    /// Path to a GCS service account JSON key file
    pub gcs_service_account: Option<PathBuf>,

    /// Azure blob container name (required for the azure backend)
    pub azure_container: Option<String>,

    /// Azure storage account name (required for the azure backend)
    pub azure_account: Option<String>,

    /// Azure storage account access key
    pub azure_access_key: Option<String>,

    /// Worker poll interval when no job is claimable
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Bounded retries for conditional registry writes that lose a race
    #[serde(default = "default_claim_max_attempts")]
    pub claim_max_attempts: u32,

    /// Upper bound on registry size; submissions are refused beyond it
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,

    /// Directory for per-job scratch files during processing
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Request body limit for uploads, in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_backend() -> BackendKind {
    BackendKind::Local
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_claim_max_attempts() -> u32 {
    5
}

fn default_max_jobs() -> usize {
    10_000
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("environment error: {0}")]
    Env(#[from] envy::Error),
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: AppConfig = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Backend location settings are checked up front so a misconfigured
    /// process refuses to start instead of failing on first use.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.storage_backend {
            BackendKind::Local => Ok(()),
            BackendKind::Gcs => {
                if self.gcs_bucket.as_deref().unwrap_or("").is_empty() {
                    return Err(ConfigError::Invalid(
                        "GCS_BUCKET is required for the gcs backend".into(),
                    ));
                }
                Ok(())
            }
            BackendKind::Azure => {
                if self.azure_container.as_deref().unwrap_or("").is_empty() {
                    return Err(ConfigError::Invalid(
                        "AZURE_CONTAINER is required for the azure backend".into(),
                    ));
                }
                if self.azure_account.as_deref().unwrap_or("").is_empty() {
                    return Err(ConfigError::Invalid(
                        "AZURE_ACCOUNT is required for the azure backend".into(),
                    ));
                }
                Ok(())
            }
        }
    }
}
