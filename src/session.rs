//! Explorer session
//!
//! One explicit handle per connected bucket: the gateway, the tree, the file
//! list and the action coordinator, wired together. The file list follows
//! the tree's current directory through a background task that lives as long
//! as the session.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::actions::ActionCoordinator;
use crate::config::ExplorerConfig;
use crate::error::ExplorerError;
use crate::file_list::FileListController;
use crate::gateway::{ObjectStorageGateway, S3Gateway};
use crate::listing::ListingClient;
use crate::tree::TreeSynchronizer;

pub struct ExplorerSession {
    gateway: Arc<dyn ObjectStorageGateway>,
    tree: Arc<TreeSynchronizer>,
    files: Arc<FileListController>,
    actions: Arc<ActionCoordinator>,
    follower: JoinHandle<()>,
}

impl ExplorerSession {
    /// Wire the controllers around `gateway`. Must be called inside a Tokio
    /// runtime; the file-list follower is spawned here.
    pub fn new(gateway: Arc<dyn ObjectStorageGateway>, config: &ExplorerConfig) -> Self {
        let listing = ListingClient::new(gateway.clone(), config.page_size);
        let tree = Arc::new(TreeSynchronizer::new(listing.clone()));
        let files = Arc::new(FileListController::new(listing));
        let actions = Arc::new(ActionCoordinator::new(gateway.clone(), config.action_settings()));

        let follower = tokio::spawn(files.clone().follow(tree.subscribe_directory()));
        info!("[Session] Opened on {}", gateway.display_name());

        Self {
            gateway,
            tree,
            files,
            actions,
            follower,
        }
    }

    /// Build an S3 gateway from `config` and open a session on it
    pub fn connect(config: &ExplorerConfig) -> Result<Self, ExplorerError> {
        let s3_config = config.to_s3_config()?;
        let gateway = S3Gateway::new(s3_config)
            .map_err(|e| ExplorerError::Config(e.to_string()))?;
        Ok(Self::new(Arc::new(gateway), config))
    }

    pub fn gateway(&self) -> &Arc<dyn ObjectStorageGateway> {
        &self.gateway
    }

    pub fn tree(&self) -> &Arc<TreeSynchronizer> {
        &self.tree
    }

    pub fn files(&self) -> &Arc<FileListController> {
        &self.files
    }

    pub fn actions(&self) -> &Arc<ActionCoordinator> {
        &self.actions
    }

    /// Re-list the current directory in the tree and reload the file list
    /// from page 0, after an upload, delete or create.
    pub async fn refresh_after_mutation(&self) -> Result<(), ExplorerError> {
        let directory = self.tree.current_directory();
        debug!("[Session] Refreshing {} after mutation", directory);
        self.tree.refresh(&directory).await?;
        if self.files.directory() == directory {
            self.files.reload().await?;
        } else {
            self.files.set_directory(&directory).await?;
        }
        Ok(())
    }
}

impl Drop for ExplorerSession {
    fn drop(&mut self) {
        self.follower.abort();
    }
}
