//! Shared types for the object storage gateway
//!
//! This module contains the data shapes exchanged between the explorer core
//! and a storage gateway: object metadata, directory listings, recursive
//! snapshots, transfer payloads, connection configuration and the gateway
//! error type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Progress callback invoked with `(transferred_bytes, total_bytes)`
pub type ProgressCallback = Box<dyn Fn(u64, u64) + Send + Sync>;

/// One stored object as returned by a listing
///
/// Immutable once listed. A later listing may carry a newer `ObjectMeta` for
/// the same key; consumers replace the old value instead of merging fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Full object key (unique within the bucket)
    pub key: String,
    /// Base name (last key segment)
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub last_modified: Option<DateTime<Utc>>,
    /// Entity tag without surrounding quotes
    #[serde(default)]
    pub etag: Option<String>,
}

impl ObjectMeta {
    /// Create metadata for `key`, deriving the name from the last segment
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        let key = key.into();
        let name = key
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            key,
            name,
            size,
            last_modified: None,
            etag: None,
        }
    }

    pub fn with_last_modified(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = Some(at);
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// File extension, if the name has one
    pub fn extension(&self) -> Option<&str> {
        self.name.rsplit('.').next().filter(|ext| ext.len() < self.name.len())
    }
}

/// One page of a delimiter-based listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryListing {
    /// Common prefixes (absolute, or relative to the listed directory)
    pub directories: Vec<String>,
    /// Objects directly inside the listed directory
    pub files: Vec<ObjectMeta>,
    /// Whether the backend reported more entries after this page.
    /// `None` when the backend does not say; the page size decides then.
    #[serde(default)]
    pub truncated: Option<bool>,
}

impl DirectoryListing {
    /// Number of entries (directories and files) in the page
    pub fn entry_count(&self) -> usize {
        self.directories.len() + self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0
    }
}

/// Recursive directory/file structure returned by a full tree listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SnapshotEntry {
    Directory {
        /// Directory prefix (`docs/`); the bucket root is `/`
        path: String,
        children: Vec<SnapshotEntry>,
    },
    File(ObjectMeta),
}

impl SnapshotEntry {
    /// Empty snapshot of the bucket root
    pub fn empty_root() -> Self {
        SnapshotEntry::Directory {
            path: "/".to_string(),
            children: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            SnapshotEntry::Directory { path, .. } => path,
            SnapshotEntry::File(meta) => &meta.key,
        }
    }

    /// Count of file entries in the whole snapshot
    pub fn file_count(&self) -> usize {
        match self {
            SnapshotEntry::Directory { children, .. } => {
                children.iter().map(SnapshotEntry::file_count).sum()
            }
            SnapshotEntry::File(_) => 1,
        }
    }
}

/// A file to upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    /// Target file name inside the upload directory
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Result of a download: a local URL plus the suggested file name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadedFile {
    /// `file://` URL of the downloaded content
    pub url: String,
    pub filename: String,
    /// Local path behind `url`
    pub path: PathBuf,
}

/// Upload content category used to pick a content type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeHint {
    Image,
    Video,
    Audio,
    Document,
    Other,
}

impl TypeHint {
    /// Resolve the content type for `file_name` under this hint.
    ///
    /// The guess from the file extension wins when it belongs to the hinted
    /// category; otherwise a generic type of the category is used.
    pub fn content_type_for(&self, file_name: &str) -> String {
        let guessed = mime_guess::from_path(file_name).first();
        let category = match self {
            TypeHint::Image => Some("image"),
            TypeHint::Video => Some("video"),
            TypeHint::Audio => Some("audio"),
            TypeHint::Document | TypeHint::Other => None,
        };

        match (category, guessed) {
            (Some(cat), Some(mime)) if mime.type_().as_str() == cat => mime.essence_str().to_string(),
            (Some("image"), _) => "image/*".to_string(),
            (Some("video"), _) => "video/*".to_string(),
            (Some("audio"), _) => "audio/*".to_string(),
            (_, Some(mime)) => mime.essence_str().to_string(),
            _ => "application/octet-stream".to_string(),
        }
    }
}

impl fmt::Display for TypeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeHint::Image => write!(f, "image"),
            TypeHint::Video => write!(f, "video"),
            TypeHint::Audio => write!(f, "audio"),
            TypeHint::Document => write!(f, "document"),
            TypeHint::Other => write!(f, "other"),
        }
    }
}

impl FromStr for TypeHint {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "image" => Ok(TypeHint::Image),
            "video" => Ok(TypeHint::Video),
            "audio" => Ok(TypeHint::Audio),
            "document" | "doc" => Ok(TypeHint::Document),
            "other" => Ok(TypeHint::Other),
            other => Err(StorageError::InvalidConfig(format!("Unknown type hint: {}", other))),
        }
    }
}

/// S3-specific configuration
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3-compatible endpoint URL (None for AWS S3, e.g. LocalStack `http://localhost:4566`)
    pub endpoint: Option<String>,
    /// AWS region (e.g., us-east-1)
    pub region: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key (SecretString for memory zeroization)
    pub secret_access_key: secrecy::SecretString,
    /// Bucket name
    pub bucket: String,
    /// Use path-style addressing (LocalStack, MinIO)
    pub path_style: bool,
    /// Timeout for listing and metadata calls
    pub request_timeout_secs: u64,
    /// Timeout for uploads and downloads
    pub transfer_timeout_secs: u64,
    /// Retries for idempotent requests on 429/5xx
    pub max_retries: u32,
    /// Directory receiving downloaded files and archives
    pub download_dir: PathBuf,
    /// Tag key holding the object version string
    pub tag_key: String,
}

/// Gateway error type
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Not connected to storage")]
    NotConnected,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Timeout")]
    Timeout,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl StorageError {
    /// Human-readable message for notifications
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Check if this error is transient (a later attempt may succeed)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StorageError::Timeout | StorageError::NetworkError(_) | StorageError::NotConnected
        )
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StorageError::Timeout
        } else {
            StorageError::NetworkError(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_meta_name_from_key() {
        let meta = ObjectMeta::new("docs/reports/q1.pdf", 10);
        assert_eq!(meta.name, "q1.pdf");
        assert_eq!(meta.extension(), Some("pdf"));

        let root_file = ObjectMeta::new("Makefile", 1);
        assert_eq!(root_file.name, "Makefile");
        assert_eq!(root_file.extension(), None);
    }

    #[test]
    fn test_listing_entry_count() {
        let listing = DirectoryListing {
            directories: vec!["a/".to_string()],
            files: vec![ObjectMeta::new("x.txt", 1), ObjectMeta::new("y.txt", 2)],
            truncated: None,
        };
        assert_eq!(listing.entry_count(), 3);
        assert!(!listing.is_empty());
        assert!(DirectoryListing::default().is_empty());
    }

    #[test]
    fn test_snapshot_file_count() {
        let snapshot = SnapshotEntry::Directory {
            path: "/".to_string(),
            children: vec![
                SnapshotEntry::File(ObjectMeta::new("a.txt", 1)),
                SnapshotEntry::Directory {
                    path: "docs/".to_string(),
                    children: vec![SnapshotEntry::File(ObjectMeta::new("docs/b.txt", 2))],
                },
            ],
        };
        assert_eq!(snapshot.file_count(), 2);
        assert_eq!(snapshot.path(), "/");
    }

    #[test]
    fn test_type_hint_content_type() {
        assert_eq!(TypeHint::Image.content_type_for("cat.png"), "image/png");
        assert_eq!(TypeHint::Image.content_type_for("cat.bin"), "image/*");
        assert_eq!(TypeHint::Video.content_type_for("clip.mp4"), "video/mp4");
        assert_eq!(TypeHint::Document.content_type_for("notes.txt"), "text/plain");
        assert_eq!(TypeHint::Other.content_type_for("blob"), "application/octet-stream");
    }

    #[test]
    fn test_type_hint_parse() {
        assert_eq!("Image".parse::<TypeHint>().unwrap(), TypeHint::Image);
        assert_eq!("doc".parse::<TypeHint>().unwrap(), TypeHint::Document);
        assert!("spreadsheet".parse::<TypeHint>().is_err());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(StorageError::Timeout.is_recoverable());
        assert!(StorageError::NetworkError("reset".into()).is_recoverable());
        assert!(!StorageError::NotFound("k".into()).is_recoverable());
    }
}
