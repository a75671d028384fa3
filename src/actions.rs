//! Selection & Action Coordinator
//!
//! Gates file actions on the current selection and runs them against the
//! gateway. Downloads and uploads each own one `TransferSlot`: starting a
//! transfer atomically cancels whatever the slot held before, so at most one
//! download and one upload are in flight per coordinator.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ExplorerError;
use crate::gateway::{
    DownloadedFile, ObjectMeta, ObjectStorageGateway, ProgressCallback, StorageError, TypeHint,
    UploadFile,
};
use crate::paths;
use crate::selection::SelectionSet;

/// Terminal state of a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome<T> {
    Completed(T),
    /// Cancelled by the user or replaced by a newer transfer
    Aborted,
}

impl<T> TransferOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            TransferOutcome::Completed(value) => Some(value),
            TransferOutcome::Aborted => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TransferOutcome::Aborted)
    }

    /// For callers that treat an abort as an error
    pub fn into_result(self) -> Result<T, ExplorerError> {
        match self {
            TransferOutcome::Completed(value) => Ok(value),
            TransferOutcome::Aborted => Err(ExplorerError::TransferAborted),
        }
    }
}

/// Owned cancellation slot for one class of transfers
pub struct TransferSlot {
    class: &'static str,
    current: Mutex<Option<(u64, CancellationToken)>>,
    next_id: AtomicU64,
    progress: watch::Sender<u8>,
}

impl TransferSlot {
    pub fn new(class: &'static str) -> Arc<Self> {
        let (progress, _) = watch::channel(0);
        Arc::new(Self {
            class,
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
            progress,
        })
    }

    fn current(&self) -> MutexGuard<'_, Option<(u64, CancellationToken)>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a transfer, cancelling the one in flight (if any)
    pub fn begin(self: &Arc<Self>) -> TransferTicket {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        {
            let mut current = self.current();
            if let Some((previous, previous_token)) = current.replace((id, token.clone())) {
                info!("[Actions] Starting {} #{} aborts #{}", self.class, id, previous);
                previous_token.cancel();
            }
        }
        self.progress.send_replace(0);
        TransferTicket {
            slot: Arc::clone(self),
            id,
            token,
        }
    }

    /// Cancel the transfer in flight. Returns false when there was none.
    pub fn abort(&self) -> bool {
        let previous = self.current().take();
        match previous {
            Some((id, token)) => {
                info!("[Actions] Aborting {} #{}", self.class, id);
                token.cancel();
                self.progress.send_replace(0);
                true
            }
            None => {
                debug!("[Actions] Nothing to abort for {}", self.class);
                false
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.current().is_some()
    }

    /// Progress of the current transfer in percent
    pub fn progress(&self) -> watch::Receiver<u8> {
        self.progress.subscribe()
    }

    fn owns(&self, id: u64) -> bool {
        self.current().as_ref().map(|(current, _)| *current) == Some(id)
    }

    fn publish(&self, id: u64, percent: u8) {
        if self.owns(id) {
            self.progress.send_if_modified(|value| {
                if *value != percent {
                    *value = percent;
                    true
                } else {
                    false
                }
            });
        }
    }
}

/// Handle of one running transfer; releases the slot when dropped
pub struct TransferTicket {
    slot: Arc<TransferSlot>,
    id: u64,
    token: CancellationToken,
}

impl TransferTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Callback that turns `(transferred, total)` bytes into a percentage
    /// on the slot's progress channel while this ticket owns the slot
    pub fn progress_callback(&self) -> ProgressCallback {
        let slot = Arc::clone(&self.slot);
        let id = self.id;
        let token = self.token.clone();
        Box::new(move |transferred, total| {
            if !token.is_cancelled() {
                slot.publish(id, percent(transferred, total));
            }
        })
    }

    /// Drive `work` until it finishes or the ticket is cancelled. A
    /// cancelled transfer's future is dropped, releasing what it held.
    pub async fn run<T>(&self, work: impl Future<Output = T>) -> TransferOutcome<T> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => TransferOutcome::Aborted,
            value = work => TransferOutcome::Completed(value),
        }
    }

    fn reset_progress(&self) {
        self.slot.publish(self.id, 0);
    }
}

impl Drop for TransferTicket {
    fn drop(&mut self) {
        let mut current = self.slot.current();
        if current.as_ref().map(|(id, _)| *id) == Some(self.id) {
            *current = None;
        }
    }
}

fn percent(transferred: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (transferred.min(total).saturating_mul(100) / total) as u8
}

/// Which actions the current selection allows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionAvailability {
    pub download: bool,
    pub delete: bool,
    pub tag: bool,
    pub link: bool,
}

/// Lifetime class of a signed link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Short-lived link for opening the object right away
    Inline,
    /// Long-lived link meant to be shared
    Share,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSettings {
    pub inline_link_ttl_secs: u32,
    pub share_link_ttl_secs: u32,
    /// Base name of multi-file download archives
    pub archive_name: String,
}

impl Default for ActionSettings {
    fn default() -> Self {
        Self {
            inline_link_ttl_secs: 5,
            share_link_ttl_secs: 3600,
            archive_name: "download".to_string(),
        }
    }
}

pub struct ActionCoordinator {
    gateway: Arc<dyn ObjectStorageGateway>,
    settings: ActionSettings,
    selection: Mutex<SelectionSet>,
    downloads: Arc<TransferSlot>,
    uploads: Arc<TransferSlot>,
}

impl ActionCoordinator {
    pub fn new(gateway: Arc<dyn ObjectStorageGateway>, settings: ActionSettings) -> Self {
        Self {
            gateway,
            settings,
            selection: Mutex::new(SelectionSet::new()),
            downloads: TransferSlot::new("download"),
            uploads: TransferSlot::new("upload"),
        }
    }

    fn selection_mut(&self) -> MutexGuard<'_, SelectionSet> {
        self.selection.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ============ Selection ============

    pub fn toggle(&self, key: &str) {
        self.selection_mut().toggle(key);
    }

    pub fn set_multi_select(&self, enabled: bool) {
        self.selection_mut().set_multi_select(enabled);
    }

    pub fn clear_selection(&self) {
        self.selection_mut().clear();
    }

    /// Copy of the current selection
    pub fn selection(&self) -> SelectionSet {
        self.selection_mut().clone()
    }

    pub fn availability(&self) -> ActionAvailability {
        let selection = self.selection_mut();
        let single = selection.single().is_some();
        ActionAvailability {
            download: !selection.is_empty(),
            delete: !selection.is_empty(),
            tag: single,
            link: single,
        }
    }

    fn single_selected(&self, action: &str) -> Result<String, ExplorerError> {
        let selection = self.selection_mut();
        selection.single().map(str::to_string).ok_or_else(|| {
            warn!("[Actions] {} needs exactly one selected object, have {}", action, selection.len());
            ExplorerError::Validation(format!("Select exactly one file to {}", action))
        })
    }

    // ============ Transfers ============

    pub fn download_progress(&self) -> watch::Receiver<u8> {
        self.downloads.progress()
    }

    pub fn upload_progress(&self) -> watch::Receiver<u8> {
        self.uploads.progress()
    }

    pub fn abort_download(&self) -> bool {
        self.downloads.abort()
    }

    pub fn abort_upload(&self) -> bool {
        self.uploads.abort()
    }

    /// Download the selected objects: one object directly, several as an archive
    pub async fn download_selected(&self) -> Result<TransferOutcome<DownloadedFile>, ExplorerError> {
        let keys = self.selection_mut().keys();
        self.download(keys).await
    }

    pub async fn download(&self, keys: Vec<String>) -> Result<TransferOutcome<DownloadedFile>, ExplorerError> {
        if keys.is_empty() {
            return Err(ExplorerError::Validation("Select at least one file to download".to_string()));
        }

        let ticket = self.downloads.begin();
        let on_progress = Some(ticket.progress_callback());
        info!("[Actions] Download #{} of {} object(s)", ticket.id(), keys.len());

        let outcome = if keys.len() == 1 {
            ticket
                .run(self.gateway.download_single(&keys[0], on_progress))
                .await
        } else {
            ticket
                .run(
                    self.gateway
                        .download_archive(&keys, &self.settings.archive_name, on_progress),
                )
                .await
        };

        finish_transfer(&ticket, "Download", outcome, ExplorerError::Retrieval)
    }

    /// Upload files into `directory`.
    ///
    /// Zero-byte files go through `create_empty_object`; the rest go up as a
    /// single upload or, for several files, one batch.
    pub async fn upload(
        &self,
        files: Vec<UploadFile>,
        directory: &str,
        type_hint: Option<TypeHint>,
    ) -> Result<TransferOutcome<Vec<ObjectMeta>>, ExplorerError> {
        if files.is_empty() {
            return Err(ExplorerError::Validation("Select at least one file to upload".to_string()));
        }
        if let Some(unnamed) = files.iter().find(|f| f.name.trim().is_empty()) {
            warn!("[Actions] Rejecting upload with empty file name ({} bytes)", unnamed.len());
            return Err(ExplorerError::Validation("File name cannot be empty".to_string()));
        }

        let directory = paths::normalize_directory(directory);
        let ticket = self.uploads.begin();
        let on_progress = ticket.progress_callback();
        info!("[Actions] Upload #{} of {} file(s) to {}", ticket.id(), files.len(), directory);

        let outcome = ticket
            .run(self.upload_files(files, &directory, type_hint, on_progress))
            .await;
        finish_transfer(&ticket, "Upload", outcome, ExplorerError::Mutation)
    }

    async fn upload_files(
        &self,
        files: Vec<UploadFile>,
        directory: &str,
        type_hint: Option<TypeHint>,
        on_progress: ProgressCallback,
    ) -> Result<Vec<ObjectMeta>, StorageError> {
        let (empty, mut sized): (Vec<UploadFile>, Vec<UploadFile>) =
            files.into_iter().partition(UploadFile::is_empty);

        let mut uploaded = Vec::with_capacity(empty.len() + sized.len());
        for file in empty {
            let key = paths::join(directory, &file.name);
            debug!("[Actions] {} is empty, creating it without a body", key);
            self.gateway.create_empty_object(&key).await?;
            uploaded.push(ObjectMeta::new(key, 0));
        }

        match sized.len() {
            0 => on_progress(0, 0),
            1 => {
                if let Some(file) = sized.pop() {
                    let meta = self
                        .gateway
                        .upload_object(file, directory, type_hint, Some(on_progress))
                        .await?;
                    uploaded.push(meta);
                }
            }
            _ => {
                let metas = self
                    .gateway
                    .upload_batch(sized, directory, type_hint, Some(on_progress))
                    .await?;
                uploaded.extend(metas);
            }
        }
        Ok(uploaded)
    }

    // ============ Mutations ============

    /// Delete every selected object. Deleted keys leave the selection; on
    /// failure the keys not yet deleted stay selected.
    pub async fn delete_selected(&self) -> Result<usize, ExplorerError> {
        let keys = self.selection_mut().keys();
        if keys.is_empty() {
            return Err(ExplorerError::Validation("Select at least one file to delete".to_string()));
        }

        let mut deleted = 0;
        for key in &keys {
            info!("[Actions] Deleting {}", key);
            if let Err(e) = self.gateway.delete_object(key).await {
                warn!("[Actions] Delete {} failed: {}", key, e);
                return Err(ExplorerError::Mutation(e));
            }
            self.selection_mut().retain(|k| k != key.as_str());
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Create `name` inside `parent`. Returns the new directory id.
    pub async fn create_directory(&self, parent: &str, name: &str) -> Result<String, ExplorerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ExplorerError::Validation("Folder name cannot be empty".to_string()));
        }
        if name.contains('/') {
            return Err(ExplorerError::Validation("Folder name cannot contain '/'".to_string()));
        }

        let path = paths::normalize_directory(&paths::join(parent, name));
        info!("[Actions] Creating directory {}", path);
        self.gateway
            .create_directory(&path)
            .await
            .map_err(|e| {
                warn!("[Actions] Create directory {} failed: {}", path, e);
                ExplorerError::Mutation(e)
            })?;
        Ok(path)
    }

    pub async fn delete_directory(&self, path: &str) -> Result<(), ExplorerError> {
        if paths::is_root(path) {
            return Err(ExplorerError::Validation("The bucket root cannot be deleted".to_string()));
        }
        let path = paths::normalize_directory(path);
        info!("[Actions] Deleting directory {}", path);
        self.gateway.delete_directory(&path).await.map_err(|e| {
            warn!("[Actions] Delete directory {} failed: {}", path, e);
            ExplorerError::Mutation(e)
        })?;
        self.selection_mut().retain(|k| !paths::is_within(k, &path));
        Ok(())
    }

    /// Tag the single selected object with a version string
    pub async fn tag_selected(&self, version: &str) -> Result<(), ExplorerError> {
        let key = self.single_selected("tag")?;
        let version = version.trim();
        if version.is_empty() {
            return Err(ExplorerError::Validation("Version cannot be empty".to_string()));
        }

        info!("[Actions] Tagging {} as {}", key, version);
        self.gateway.tag_object(&key, version).await.map_err(|e| {
            warn!("[Actions] Tagging {} failed: {}", key, e);
            ExplorerError::Mutation(e)
        })
    }

    pub async fn tag_version(&self, key: &str) -> Result<String, ExplorerError> {
        self.gateway
            .get_object_tag_version(key)
            .await
            .map_err(ExplorerError::Retrieval)
    }

    /// Signed URL for the single selected object
    pub async fn signed_link(&self, kind: LinkKind) -> Result<String, ExplorerError> {
        let key = self.single_selected("link")?;
        let ttl = match kind {
            LinkKind::Inline => self.settings.inline_link_ttl_secs,
            LinkKind::Share => self.settings.share_link_ttl_secs,
        };
        debug!("[Actions] Signing {} for {}s", key, ttl);
        self.gateway.get_signed_url(&key, ttl).await.map_err(|e| {
            warn!("[Actions] Signing {} failed: {}", key, e);
            ExplorerError::Retrieval(e)
        })
    }
}

/// Map a transfer's outcome; aborts are swallowed and reset progress
fn finish_transfer<T>(
    ticket: &TransferTicket,
    label: &str,
    outcome: TransferOutcome<Result<T, StorageError>>,
    wrap: fn(StorageError) -> ExplorerError,
) -> Result<TransferOutcome<T>, ExplorerError> {
    match outcome {
        TransferOutcome::Completed(Ok(value)) => {
            info!("[Actions] {} #{} completed", label, ticket.id());
            Ok(TransferOutcome::Completed(value))
        }
        TransferOutcome::Aborted | TransferOutcome::Completed(Err(StorageError::Cancelled)) => {
            info!("[Actions] {} #{} aborted", label, ticket.id());
            ticket.reset_progress();
            Ok(TransferOutcome::Aborted)
        }
        TransferOutcome::Completed(Err(e)) => {
            warn!("[Actions] {} #{} failed: {}", label, ticket.id(), e);
            ticket.reset_progress();
            Err(wrap(e))
        }
    }
}
