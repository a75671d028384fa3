// Explorer configuration
// JSON file under the user config directory, turned into an S3Config at connect time

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::actions::ActionSettings;
use crate::error::ExplorerError;
use crate::gateway::S3Config;

/// Upper bound for retries of idempotent requests
const MAX_RETRIES: u32 = 5;

/// Signed URLs cannot outlive seven days
const MAX_LINK_TTL_SECS: u32 = 604_800;

/// Bucket connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct S3Settings {
    /// Custom endpoint (LocalStack, MinIO); None for AWS
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub access_key_id: String,
    /// Prefer the AWS_SECRET_ACCESS_KEY environment variable over storing it here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub path_style: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: default_region(),
            bucket: String::new(),
            access_key_id: String::new(),
            secret_access_key: None,
            path_style: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExplorerConfig {
    pub connection: S3Settings,
    /// Entries per listing page
    pub page_size: u32,
    pub inline_link_ttl_secs: u32,
    pub share_link_ttl_secs: u32,
    pub request_timeout_secs: u64,
    pub transfer_timeout_secs: u64,
    pub max_retries: u32,
    pub download_dir: PathBuf,
    pub archive_name: String,
    pub tag_key: String,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            connection: S3Settings::default(),
            page_size: 10,
            inline_link_ttl_secs: 5,
            share_link_ttl_secs: 3600,
            request_timeout_secs: 30,
            transfer_timeout_secs: 600,
            max_retries: 2,
            download_dir: default_download_dir(),
            archive_name: "download".to_string(),
            tag_key: "version".to_string(),
        }
    }
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("."))
}

impl ExplorerConfig {
    pub fn action_settings(&self) -> ActionSettings {
        ActionSettings {
            inline_link_ttl_secs: self.inline_link_ttl_secs,
            share_link_ttl_secs: self.share_link_ttl_secs,
            archive_name: self.archive_name.clone(),
        }
    }

    /// Build the gateway configuration. `AWS_SECRET_ACCESS_KEY` wins over
    /// a secret stored in the file.
    pub fn to_s3_config(&self) -> Result<S3Config, ExplorerError> {
        self.s3_config_with_secret(std::env::var("AWS_SECRET_ACCESS_KEY").ok())
    }

    fn s3_config_with_secret(&self, env_secret: Option<String>) -> Result<S3Config, ExplorerError> {
        validate_config(self)?;

        let secret = env_secret
            .filter(|s| !s.is_empty())
            .or_else(|| self.connection.secret_access_key.clone())
            .ok_or_else(|| {
                ExplorerError::Config(
                    "No secret access key: set AWS_SECRET_ACCESS_KEY or connection.secret_access_key".to_string(),
                )
            })?;

        if self.max_retries > MAX_RETRIES {
            tracing::warn!("max_retries {} clamped to {}", self.max_retries, MAX_RETRIES);
        }

        Ok(S3Config {
            endpoint: self.connection.endpoint.clone().filter(|e| !e.trim().is_empty()),
            region: self.connection.region.clone(),
            access_key_id: self.connection.access_key_id.clone(),
            secret_access_key: secrecy::SecretString::from(secret),
            bucket: self.connection.bucket.clone(),
            path_style: self.connection.path_style,
            request_timeout_secs: self.request_timeout_secs,
            transfer_timeout_secs: self.transfer_timeout_secs,
            max_retries: self.max_retries.min(MAX_RETRIES),
            download_dir: self.download_dir.clone(),
            tag_key: self.tag_key.clone(),
        })
    }
}

/// Default config file location
pub fn config_path() -> PathBuf {
    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")));
    config_dir.join("s3-explorer").join("config.json")
}

/// Load configuration, falling back to defaults when the file is missing or broken
pub fn load_config() -> ExplorerConfig {
    load_config_from(&config_path())
}

pub fn load_config_from(path: &Path) -> ExplorerConfig {
    if path.exists() {
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => return config,
                Err(e) => tracing::warn!("Failed to parse explorer config {:?}: {}", path, e),
            },
            Err(e) => tracing::warn!("Failed to read explorer config {:?}: {}", path, e),
        }
    }
    ExplorerConfig::default()
}

pub fn save_config(config: &ExplorerConfig) -> Result<(), ExplorerError> {
    save_config_to(&config_path(), config)
}

pub fn save_config_to(path: &Path, config: &ExplorerConfig) -> Result<(), ExplorerError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ExplorerError::Config(format!("Failed to create config directory: {}", e)))?;
    }

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| ExplorerError::Config(format!("Failed to serialize config: {}", e)))?;

    fs::write(path, content)
        .map_err(|e| ExplorerError::Config(format!("Failed to write config: {}", e)))?;

    tracing::info!("Explorer config saved to {:?}", path);
    Ok(())
}

pub fn validate_config(config: &ExplorerConfig) -> Result<(), ExplorerError> {
    if config.connection.bucket.trim().is_empty() {
        return Err(ExplorerError::Config("Bucket cannot be empty".to_string()));
    }
    if config.connection.region.trim().is_empty() {
        return Err(ExplorerError::Config("Region cannot be empty".to_string()));
    }
    if config.page_size == 0 {
        return Err(ExplorerError::Config("Page size must be at least 1".to_string()));
    }
    for (name, ttl) in [
        ("inline_link_ttl_secs", config.inline_link_ttl_secs),
        ("share_link_ttl_secs", config.share_link_ttl_secs),
    ] {
        if ttl == 0 || ttl > MAX_LINK_TTL_SECS {
            return Err(ExplorerError::Config(format!(
                "{} must be between 1 and {}",
                name, MAX_LINK_TTL_SECS
            )));
        }
    }
    if config.archive_name.trim().is_empty() || config.archive_name.contains('/') {
        return Err(ExplorerError::Config("Archive name must be a plain file name".to_string()));
    }
    if config.tag_key.trim().is_empty() {
        return Err(ExplorerError::Config("Tag key cannot be empty".to_string()));
    }
    Ok(())
}
