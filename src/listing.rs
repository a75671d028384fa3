//! Object Listing Client
//!
//! Thin layer over `ObjectStorageGateway::list_directory` that fixes the page
//! size and hands back normalized pages: directory entries are materialized
//! to absolute prefixes, directory markers are dropped, and each key appears
//! at most once per page.

use std::sync::Arc;
use tracing::debug;

use crate::gateway::{DirectoryListing, ObjectMeta, ObjectStorageGateway, SnapshotEntry, StorageError};
use crate::paths;

/// One normalized listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPage {
    /// Canonical directory id the page was requested for
    pub directory: String,
    pub page: u32,
    pub listing: DirectoryListing,
    /// No further page exists after this one
    pub is_last: bool,
}

/// Paginated listing client bound to one gateway and one page size
#[derive(Clone)]
pub struct ListingClient {
    gateway: Arc<dyn ObjectStorageGateway>,
    page_size: u32,
}

impl ListingClient {
    pub fn new(gateway: Arc<dyn ObjectStorageGateway>, page_size: u32) -> Self {
        Self {
            gateway,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn gateway(&self) -> &Arc<dyn ObjectStorageGateway> {
        &self.gateway
    }

    /// Fetch and normalize page `page` of `directory`
    pub async fn list_page(&self, directory: &str, page: u32) -> Result<ListingPage, StorageError> {
        let directory = paths::normalize_directory(directory);
        let raw = self
            .gateway
            .list_directory(&directory, page, self.page_size)
            .await?;

        let is_last = match raw.truncated {
            Some(truncated) => !truncated,
            None => raw.entry_count() < self.page_size as usize,
        };
        let listing = normalize_listing(&directory, raw);

        debug!(
            "[Listing] {} page {}: {} dirs, {} files{}",
            directory,
            page,
            listing.directories.len(),
            listing.files.len(),
            if is_last { " (last)" } else { "" }
        );

        Ok(ListingPage {
            directory,
            page,
            listing,
            is_last,
        })
    }

    /// Every page of `directory` merged into one listing
    pub async fn list_all(&self, directory: &str) -> Result<DirectoryListing, StorageError> {
        let mut merged = DirectoryListing::default();
        let mut page = 0;
        loop {
            let next = self.list_page(directory, page).await?;
            for dir in next.listing.directories {
                if !merged.directories.contains(&dir) {
                    merged.directories.push(dir);
                }
            }
            merge_files(&mut merged.files, next.listing.files);
            if next.is_last {
                break;
            }
            page += 1;
        }
        merged.truncated = Some(false);
        Ok(merged)
    }

    /// Whole-bucket snapshot for initial tree hydration
    pub async fn full_tree(&self) -> Result<SnapshotEntry, StorageError> {
        self.gateway.list_full_tree().await
    }
}

/// Append `incoming` to `items`; an existing key is replaced in place
pub fn merge_files(items: &mut Vec<ObjectMeta>, incoming: Vec<ObjectMeta>) -> usize {
    let mut appended = 0;
    for meta in incoming {
        match items.iter_mut().find(|existing| existing.key == meta.key) {
            Some(existing) => *existing = meta,
            None => {
                items.push(meta);
                appended += 1;
            }
        }
    }
    appended
}

fn normalize_listing(directory: &str, raw: DirectoryListing) -> DirectoryListing {
    let prefix = paths::to_prefix(directory);

    let mut directories: Vec<String> = Vec::with_capacity(raw.directories.len());
    for entry in &raw.directories {
        if let Some(resolved) = paths::resolve_directory_entry(directory, entry) {
            if !directories.contains(&resolved) {
                directories.push(resolved);
            }
        }
    }

    let mut files: Vec<ObjectMeta> = Vec::with_capacity(raw.files.len());
    let cleaned = raw.files.into_iter().filter_map(|mut meta| {
        meta.key = paths::normalize_key(&meta.key);
        if meta.key.is_empty() || meta.key == prefix || meta.key.ends_with('/') {
            return None;
        }
        if meta.name.is_empty() {
            meta.name = paths::last_segment(&meta.key).to_string();
        }
        Some(meta)
    });
    merge_files(&mut files, cleaned.collect());

    DirectoryListing {
        directories,
        files,
        truncated: raw.truncated,
    }
}
