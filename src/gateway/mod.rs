//! Object Storage Gateway
//!
//! The explorer core never talks to S3 directly. Every storage operation goes
//! through the `ObjectStorageGateway` trait, so the tree synchronizer, the file
//! list and the action coordinator work the same against AWS S3, LocalStack or
//! a scripted test double.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ ┌──────────────┐ ┌───────────────────┐
//! │ TreeSync     │ │ FileList     │ │ ActionCoordinator │
//! └──────┬───────┘ └──────┬───────┘ └─────────┬─────────┘
//!        └────────┬───────┘                   │
//!          ListingClient                      │
//!                 └──────────────┬────────────┘
//!                                ▼
//!              ┌─────────────────────────────────┐
//!              │   ObjectStorageGateway Trait    │
//!              └─────────────────────────────────┘
//!                                │
//!                        ┌───────┴───────┐
//!                        ▼               ▼
//!                   ┌─────────┐   ┌─────────────┐
//!                   │ S3 / LS │   │ test script │
//!                   └─────────┘   └─────────────┘
//! ```

pub mod types;
pub mod http_retry;
pub mod s3;

#[cfg(test)]
pub(crate) mod testing;

pub use types::*;
pub use http_retry::{HttpRetryConfig, send_with_retry};
pub use s3::S3Gateway;

use async_trait::async_trait;

/// Unified object storage contract
///
/// Paths follow S3 prefix conventions: directories end with `/`, the bucket
/// root may be given as `""` or `"/"`. Every method fails with a
/// `StorageError` on backend failure; nothing here retries on behalf of the
/// caller except transport-level retries inside an implementation.
#[async_trait]
pub trait ObjectStorageGateway: Send + Sync {
    /// Display name for this gateway instance
    fn display_name(&self) -> String;

    /// List one page of a directory using the `/` delimiter
    async fn list_directory(
        &self,
        path: &str,
        page: u32,
        page_size: u32,
    ) -> Result<DirectoryListing, StorageError>;

    /// List the whole bucket as a nested snapshot
    async fn list_full_tree(&self) -> Result<SnapshotEntry, StorageError>;

    /// Create a directory marker
    async fn create_directory(&self, path: &str) -> Result<(), StorageError>;

    /// Delete a directory and everything below it
    async fn delete_directory(&self, path: &str) -> Result<(), StorageError>;

    /// Delete a single object
    async fn delete_object(&self, key: &str) -> Result<(), StorageError>;

    /// Upload one file into `directory`
    async fn upload_object(
        &self,
        file: UploadFile,
        directory: &str,
        type_hint: Option<TypeHint>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<ObjectMeta, StorageError>;

    /// Upload several files into `directory` as one batch
    async fn upload_batch(
        &self,
        files: Vec<UploadFile>,
        directory: &str,
        type_hint: Option<TypeHint>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Vec<ObjectMeta>, StorageError>;

    /// Create a zero-byte object without going through the binary upload path
    async fn create_empty_object(&self, path: &str) -> Result<(), StorageError>;

    /// Time-limited, credential-free URL for one object
    async fn get_signed_url(&self, key: &str, ttl_secs: u32) -> Result<String, StorageError>;

    /// Download one object
    async fn download_single(
        &self,
        key: &str,
        on_progress: Option<ProgressCallback>,
    ) -> Result<DownloadedFile, StorageError>;

    /// Download several objects packed into `<archive_name>.zip`
    async fn download_archive(
        &self,
        keys: &[String],
        archive_name: &str,
        on_progress: Option<ProgressCallback>,
    ) -> Result<DownloadedFile, StorageError>;

    /// Attach a version string to an object
    async fn tag_object(&self, key: &str, version: &str) -> Result<(), StorageError>;

    /// Read the version string of an object (empty when untagged)
    async fn get_object_tag_version(&self, key: &str) -> Result<String, StorageError>;
}
