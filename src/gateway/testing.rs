//! Scripted in-memory gateway for controller tests.
//!
//! Holds a small bucket model, records every call, and can keep a call open
//! behind a `Gate` so tests control the order in which responses land.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::oneshot;

use super::s3::build_snapshot;
use super::{
    DirectoryListing, DownloadedFile, ObjectMeta, ObjectStorageGateway, ProgressCallback,
    SnapshotEntry, StorageError, TypeHint, UploadFile,
};
use crate::paths;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    List,
    FullTree,
    CreateDirectory,
    DeleteDirectory,
    DeleteObject,
    Upload,
    UploadBatch,
    CreateEmpty,
    SignedUrl,
    Download,
    Archive,
    Tag,
    GetTag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Call {
    pub op: Op,
    pub target: String,
    pub page: Option<u32>,
}

/// Keeps one gateway call pending until released or dropped
pub(crate) struct Gate(Option<oneshot::Sender<()>>);

impl Gate {
    pub fn release(mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Default)]
struct State {
    objects: BTreeMap<String, ObjectMeta>,
    markers: BTreeSet<String>,
    tags: HashMap<String, String>,
    scripted: HashMap<(String, u32), DirectoryListing>,
    gates: HashMap<(Op, String), oneshot::Receiver<()>>,
    failures: HashMap<Op, StorageError>,
    calls: Vec<Call>,
}

#[derive(Default)]
pub(crate) struct ScriptedGateway {
    state: Mutex<State>,
    relative_directories: bool,
}

fn list_target(path: &str, page: u32) -> String {
    format!("{}#{}", paths::normalize_directory(path), page)
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report subdirectories as bare names instead of full prefixes
    pub fn with_relative_directories(mut self) -> Self {
        self.relative_directories = true;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn put(&self, key: &str, size: u64) {
        let key = paths::normalize_key(key);
        self.lock().objects.insert(key.clone(), ObjectMeta::new(key, size));
    }

    pub fn put_marker(&self, directory: &str) {
        self.lock().markers.insert(paths::normalize_directory(directory));
    }

    /// `count` files named `file-NN.txt` inside `directory`
    pub fn fill(&self, directory: &str, count: usize) {
        for i in 0..count {
            self.put(&paths::join(directory, &format!("file-{:02}.txt", i)), i as u64 + 1);
        }
    }

    /// Answer `list_directory(path, page)` with a fixed listing
    pub fn script_listing(&self, path: &str, page: u32, listing: DirectoryListing) {
        self.lock()
            .scripted
            .insert((paths::normalize_directory(path), page), listing);
    }

    pub fn gate(&self, op: Op, target: &str) -> Gate {
        let (tx, rx) = oneshot::channel();
        self.lock().gates.insert((op, target.to_string()), rx);
        Gate(Some(tx))
    }

    pub fn gate_listing(&self, path: &str, page: u32) -> Gate {
        self.gate(Op::List, &list_target(path, page))
    }

    pub fn fail_next(&self, op: Op, error: StorageError) {
        self.lock().failures.insert(op, error);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.lock().calls.iter().filter(|c| c.op == op).count()
    }

    /// `(directory, page)` of every listing call, in order
    pub fn list_calls(&self) -> Vec<(String, u32)> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op == Op::List)
            .map(|c| (c.target.clone(), c.page.unwrap_or(0)))
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        let state = self.lock();
        state.objects.contains_key(key) || state.markers.contains(key)
    }

    pub fn tag_of(&self, key: &str) -> Option<String> {
        self.lock().tags.get(key).cloned()
    }

    /// Yield until `n` calls of `op` were made
    pub async fn wait_for_calls(&self, op: Op, n: usize) {
        for _ in 0..10_000 {
            if self.count(op) >= n {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("expected {} {:?} calls, saw {}", n, op, self.count(op));
    }

    async fn enter(&self, op: Op, target: &str, page: Option<u32>) -> Result<(), StorageError> {
        let gate_target = match page {
            Some(page) => list_target(target, page),
            None => target.to_string(),
        };
        let (gate, failure) = {
            let mut state = self.lock();
            state.calls.push(Call {
                op,
                target: target.to_string(),
                page,
            });
            (state.gates.remove(&(op, gate_target)), state.failures.remove(&op))
        };
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn model_listing(&self, path: &str, page: u32, page_size: u32) -> DirectoryListing {
        let state = self.lock();
        if let Some(listing) = state.scripted.get(&(paths::normalize_directory(path), page)) {
            return listing.clone();
        }

        let prefix = paths::to_prefix(path);
        // None marks a common prefix
        let mut entries: BTreeMap<String, Option<ObjectMeta>> = BTreeMap::new();
        let keys = state
            .objects
            .keys()
            .chain(state.markers.iter())
            .filter(|k| k.starts_with(&prefix) && k.len() > prefix.len());
        for key in keys {
            let rest = &key[prefix.len()..];
            match rest.find('/') {
                Some(idx) => {
                    entries.insert(format!("{}{}", prefix, &rest[..=idx]), None);
                }
                None => {
                    entries.insert(key.clone(), state.objects.get(key).cloned());
                }
            }
        }

        let mut listing = DirectoryListing::default();
        let start = page as usize * page_size as usize;
        for (key, entry) in entries.into_iter().skip(start).take(page_size as usize) {
            match entry {
                Some(meta) => listing.files.push(meta),
                None if self.relative_directories => {
                    listing.directories.push(format!("{}/", paths::last_segment(&key)))
                }
                None => listing.directories.push(key),
            }
        }
        listing
    }
}

#[async_trait]
impl ObjectStorageGateway for ScriptedGateway {
    fn display_name(&self) -> String {
        "scripted".to_string()
    }

    async fn list_directory(
        &self,
        path: &str,
        page: u32,
        page_size: u32,
    ) -> Result<DirectoryListing, StorageError> {
        let directory = paths::normalize_directory(path);
        self.enter(Op::List, &directory, Some(page)).await?;
        Ok(self.model_listing(&directory, page, page_size))
    }

    async fn list_full_tree(&self) -> Result<SnapshotEntry, StorageError> {
        self.enter(Op::FullTree, "/", None).await?;
        let state = self.lock();
        let mut objects: Vec<ObjectMeta> = state.objects.values().cloned().collect();
        objects.extend(state.markers.iter().map(|m| ObjectMeta::new(m.clone(), 0)));
        Ok(build_snapshot(objects))
    }

    async fn create_directory(&self, path: &str) -> Result<(), StorageError> {
        self.enter(Op::CreateDirectory, path, None).await?;
        self.put_marker(path);
        Ok(())
    }

    async fn delete_directory(&self, path: &str) -> Result<(), StorageError> {
        self.enter(Op::DeleteDirectory, path, None).await?;
        let prefix = paths::normalize_directory(path);
        let mut state = self.lock();
        state.objects.retain(|k, _| !k.starts_with(&prefix));
        state.markers.retain(|m| !m.starts_with(&prefix));
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.enter(Op::DeleteObject, key, None).await?;
        match self.lock().objects.remove(key) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(key.to_string())),
        }
    }

    async fn upload_object(
        &self,
        file: UploadFile,
        directory: &str,
        _type_hint: Option<TypeHint>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<ObjectMeta, StorageError> {
        let key = paths::join(directory, &file.name);
        let total = file.len();
        if let Some(ref cb) = on_progress {
            cb(total / 2, total);
        }
        self.enter(Op::Upload, &key, None).await?;
        if let Some(ref cb) = on_progress {
            cb(total, total);
        }
        let meta = ObjectMeta::new(key.clone(), total);
        self.lock().objects.insert(key, meta.clone());
        Ok(meta)
    }

    async fn upload_batch(
        &self,
        files: Vec<UploadFile>,
        directory: &str,
        _type_hint: Option<TypeHint>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Vec<ObjectMeta>, StorageError> {
        let total: u64 = files.iter().map(UploadFile::len).sum();
        self.enter(Op::UploadBatch, directory, None).await?;
        let metas: Vec<ObjectMeta> = files
            .iter()
            .map(|f| ObjectMeta::new(paths::join(directory, &f.name), f.len()))
            .collect();
        {
            let mut state = self.lock();
            for meta in &metas {
                state.objects.insert(meta.key.clone(), meta.clone());
            }
        }
        if let Some(ref cb) = on_progress {
            cb(total, total);
        }
        Ok(metas)
    }

    async fn create_empty_object(&self, path: &str) -> Result<(), StorageError> {
        self.enter(Op::CreateEmpty, path, None).await?;
        self.put(path, 0);
        Ok(())
    }

    async fn get_signed_url(&self, key: &str, ttl_secs: u32) -> Result<String, StorageError> {
        self.enter(Op::SignedUrl, key, None).await?;
        Ok(format!("https://signed.test/{}?ttl={}", key, ttl_secs))
    }

    async fn download_single(
        &self,
        key: &str,
        on_progress: Option<ProgressCallback>,
    ) -> Result<DownloadedFile, StorageError> {
        let size = self.lock().objects.get(key).map(|m| m.size).unwrap_or(100);
        if let Some(ref cb) = on_progress {
            cb(size / 2, size);
        }
        self.enter(Op::Download, key, None).await?;
        if let Some(ref cb) = on_progress {
            cb(size, size);
        }
        let filename = paths::last_segment(key).to_string();
        Ok(DownloadedFile {
            url: format!("file:///downloads/{}", filename),
            path: PathBuf::from("/downloads").join(&filename),
            filename,
        })
    }

    async fn download_archive(
        &self,
        keys: &[String],
        archive_name: &str,
        on_progress: Option<ProgressCallback>,
    ) -> Result<DownloadedFile, StorageError> {
        self.enter(Op::Archive, archive_name, None).await?;
        if let Some(ref cb) = on_progress {
            cb(keys.len() as u64, keys.len() as u64);
        }
        let filename = format!("{}.zip", archive_name);
        Ok(DownloadedFile {
            url: format!("file:///downloads/{}", filename),
            path: PathBuf::from("/downloads").join(&filename),
            filename,
        })
    }

    async fn tag_object(&self, key: &str, version: &str) -> Result<(), StorageError> {
        self.enter(Op::Tag, key, None).await?;
        self.lock().tags.insert(key.to_string(), version.to_string());
        Ok(())
    }

    async fn get_object_tag_version(&self, key: &str) -> Result<String, StorageError> {
        self.enter(Op::GetTag, key, None).await?;
        Ok(self.tag_of(key).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_model_listing_pages() {
        let gateway = ScriptedGateway::new();
        gateway.fill("docs/", 3);
        gateway.put("docs/sub/deep.txt", 1);
        gateway.put("readme.txt", 120);

        let root = gateway.list_directory("/", 0, 10).await.unwrap();
        assert_eq!(root.directories, vec!["docs/".to_string()]);
        assert_eq!(root.files.len(), 1);

        let first = gateway.list_directory("docs/", 0, 2).await.unwrap();
        let second = gateway.list_directory("docs/", 1, 2).await.unwrap();
        assert_eq!(first.entry_count(), 2);
        assert_eq!(second.entry_count(), 2);
        assert_eq!(second.directories, vec!["docs/sub/".to_string()]);
        assert_eq!(gateway.list_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_gate_holds_call() {
        let gateway = std::sync::Arc::new(ScriptedGateway::new());
        let gate = gateway.gate_listing("/", 0);

        let pending = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.list_directory("/", 0, 10).await })
        };
        gateway.wait_for_calls(Op::List, 1).await;
        assert!(!pending.is_finished());

        gate.release();
        assert!(pending.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_fail_next_is_one_shot() {
        let gateway = ScriptedGateway::new();
        gateway.fail_next(Op::List, StorageError::Timeout);
        assert!(gateway.list_directory("/", 0, 10).await.is_err());
        assert!(gateway.list_directory("/", 0, 10).await.is_ok());
    }
}
