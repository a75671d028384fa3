//! Node tree synchronizer
//!
//! Owns the current tree, the selected node and the per-node load state.
//! Listing calls run without holding the state lock; when a response lands
//! it is applied only if it still belongs to the active target, so an answer
//! to an abandoned expansion never touches the tree.
//!
//! The directory derived from the selection is published on a `watch`
//! channel; the file list subscribes to it instead of being called directly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::builder::{build_siblings, build_tree};
use super::node::{NodeState, TreeNode};
use super::store::TreeStore;
use crate::error::ExplorerError;
use crate::listing::ListingClient;
use crate::paths;

/// Result of an expand or refresh request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpandOutcome {
    /// The node is an object
    NotDirectory,
    /// Page 0 was already listed; the node is only revealed
    AlreadyLoaded,
    /// A fetch for this node is already running; nothing was sent
    InFlight,
    /// The last page was already merged; nothing was sent
    Exhausted,
    /// The listing was merged into the tree
    Applied { added: usize, exhausted: bool },
    /// The response arrived after the user moved on and was discarded
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Merge {
    Replace,
    Append,
}

struct SyncState {
    store: Arc<TreeStore>,
    selected_id: Option<String>,
    /// Node the user is currently working on; responses for nodes that do
    /// not contain it are stale
    target: String,
    /// Bumped whenever the whole tree is replaced or discarded
    epoch: u64,
    /// Nodes with a listing in flight, with the epoch it was issued in
    in_flight: HashMap<String, u64>,
}

pub struct TreeSynchronizer {
    listing: ListingClient,
    state: Mutex<SyncState>,
    directory_tx: watch::Sender<String>,
}

impl TreeSynchronizer {
    pub fn new(listing: ListingClient) -> Self {
        let (directory_tx, _) = watch::channel(paths::ROOT_ID.to_string());
        Self {
            listing,
            state: Mutex::new(SyncState {
                store: Arc::new(TreeStore::new()),
                selected_id: None,
                target: paths::ROOT_ID.to_string(),
                epoch: 0,
                in_flight: HashMap::new(),
            }),
            directory_tx,
        }
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current tree. Two snapshots are the same `Arc` exactly when nothing
    /// changed in between.
    pub fn snapshot(&self) -> Arc<TreeStore> {
        Arc::clone(&self.state().store)
    }

    pub fn selected_id(&self) -> Option<String> {
        self.state().selected_id.clone()
    }

    /// Directory derived from the current selection
    pub fn current_directory(&self) -> String {
        self.directory_tx.borrow().clone()
    }

    /// Directory-change events for downstream consumers
    pub fn subscribe_directory(&self) -> watch::Receiver<String> {
        self.directory_tx.subscribe()
    }

    pub fn visible_nodes(&self) -> Vec<(usize, TreeNode)> {
        self.snapshot()
            .visible_nodes()
            .into_iter()
            .map(|(level, node)| (level, node.clone()))
            .collect()
    }

    fn publish_directory(&self, directory: &str) {
        let changed = self.directory_tx.send_if_modified(|current| {
            if current != directory {
                *current = directory.to_string();
                true
            } else {
                false
            }
        });
        if changed {
            debug!("[Tree] Current directory -> {}", directory);
        }
    }

    /// List the bucket root (page 0) and replace the whole tree with it.
    ///
    /// Subdirectories come back unloaded. On failure the previous tree is
    /// kept as it was.
    pub async fn load_root(&self) -> Result<(), ExplorerError> {
        let epoch = self.begin_rebuild();
        info!("[Tree] Loading root listing");

        let page = self
            .listing
            .list_page(paths::ROOT_ID, 0)
            .await
            .map_err(|e| {
                warn!("[Tree] Root listing failed: {}", e);
                ExplorerError::Listing(e)
            })?;

        let mut store = TreeStore::new();
        store.replace_children(paths::ROOT_ID, build_siblings(paths::ROOT_ID, &page.listing));
        if let Some(root) = store.get_mut(paths::ROOT_ID) {
            mark_loaded(root, 0, page.is_last, Merge::Replace);
        }
        self.install(epoch, store);
        Ok(())
    }

    /// Replace the whole tree with a full recursive snapshot; every
    /// directory comes back loaded.
    pub async fn hydrate_full_tree(&self) -> Result<(), ExplorerError> {
        let epoch = self.begin_rebuild();
        info!("[Tree] Hydrating full tree");

        let snapshot = self.listing.full_tree().await.map_err(|e| {
            warn!("[Tree] Full tree listing failed: {}", e);
            ExplorerError::Listing(e)
        })?;

        let store = build_tree(&snapshot);
        self.install(epoch, store);
        Ok(())
    }

    fn begin_rebuild(&self) -> u64 {
        let mut state = self.state();
        state.epoch += 1;
        state.epoch
    }

    fn install(&self, epoch: u64, store: TreeStore) {
        {
            let mut state = self.state();
            if state.epoch != epoch {
                debug!("[Tree] Discarding superseded rebuild");
                return;
            }
            info!("[Tree] Tree replaced ({} nodes)", store.len());
            state.store = Arc::new(store);
            state.in_flight.clear();
            state.selected_id = Some(paths::ROOT_ID.to_string());
            state.target = paths::ROOT_ID.to_string();
        }
        self.publish_directory(paths::ROOT_ID);
    }

    /// Expand a directory, listing `page` of it.
    ///
    /// Page 0 of an unloaded node becomes its children. Later pages are
    /// merged: siblings whose path is already a child are dropped.
    pub async fn expand(&self, id: &str, page: u32) -> Result<ExpandOutcome, ExplorerError> {
        self.fetch_children(id, page, false).await
    }

    /// Expand the next unread page of a directory
    pub async fn expand_more(&self, id: &str) -> Result<ExpandOutcome, ExplorerError> {
        let page = {
            let state = self.state();
            let id = resolve_id(&state.store, id).ok_or_else(|| ExplorerError::UnknownNode(id.to_string()))?;
            state.store.get(&id).map(|n| n.next_page).unwrap_or(0)
        };
        self.fetch_children(id, page, false).await
    }

    /// Re-list page 0 of a directory and replace its children. The previous
    /// children stay when the listing fails.
    pub async fn refresh(&self, id: &str) -> Result<ExpandOutcome, ExplorerError> {
        self.fetch_children(id, 0, true).await
    }

    async fn fetch_children(
        &self,
        id: &str,
        page: u32,
        force: bool,
    ) -> Result<ExpandOutcome, ExplorerError> {
        let (id, path, epoch) = {
            let mut state = self.state();
            let id = resolve_id(&state.store, id)
                .ok_or_else(|| ExplorerError::UnknownNode(id.to_string()))?;
            let Some(node) = state.store.get(&id) else {
                return Err(ExplorerError::UnknownNode(id));
            };

            if !node.is_directory {
                return Ok(ExpandOutcome::NotDirectory);
            }
            if state.in_flight.contains_key(&id) {
                debug!("[Tree] {} already loading, not fetching again", id);
                return Ok(ExpandOutcome::InFlight);
            }
            if !force && page == 0 && node.children_loaded {
                if !node.expanded {
                    if let Some(node) = Arc::make_mut(&mut state.store).get_mut(&id) {
                        node.expanded = true;
                    }
                }
                return Ok(ExpandOutcome::AlreadyLoaded);
            }
            if !force && page > 0 && node.exhausted {
                return Ok(ExpandOutcome::Exhausted);
            }

            let path = node.path.clone();
            let epoch = state.epoch;
            state.in_flight.insert(id.clone(), epoch);
            state.target = id.clone();
            if let Some(node) = Arc::make_mut(&mut state.store).get_mut(&id) {
                node.state = NodeState::Loading;
            }
            (id, path, epoch)
        };

        debug!("[Tree] Listing {} page {}", path, page);
        let result = self.listing.list_page(&path, page).await;

        let mut state = self.state();
        // a fetch started after a rebuild owns the node's Loading state
        let owns_flight = match state.in_flight.get(&id) {
            Some(started) => *started == epoch,
            None => true,
        };
        if owns_flight {
            state.in_flight.remove(&id);
        }

        let current = state.epoch == epoch
            && state.store.contains(&id)
            && accepts_response(&state.target, &id);

        let page_result = match result {
            Ok(listed) if current => listed,
            Ok(_) => {
                debug!("[Tree] Discarding stale listing of {} (target is {})", id, state.target);
                if owns_flight {
                    settle(&mut state.store, &id);
                }
                return Ok(ExpandOutcome::Stale);
            }
            Err(e) => {
                warn!("[Tree] Listing {} page {} failed: {}", id, page, e);
                if owns_flight {
                    settle(&mut state.store, &id);
                }
                return Err(ExplorerError::Listing(e));
            }
        };

        let merge = if page == 0 { Merge::Replace } else { Merge::Append };
        let siblings = build_siblings(&id, &page_result.listing);
        let store = Arc::make_mut(&mut state.store);
        let added = match merge {
            Merge::Replace => store.replace_children(&id, siblings),
            Merge::Append => store.append_children(&id, siblings),
        };
        if let Some(node) = store.get_mut(&id) {
            mark_loaded(node, page, page_result.is_last, merge);
        }

        debug!("[Tree] {} page {} merged: {} nodes", id, page, added);
        Ok(ExpandOutcome::Applied {
            added,
            exhausted: page_result.is_last,
        })
    }

    /// Select a node and publish the directory it stands for: the node
    /// itself for a directory, its parent for an object.
    pub fn select(&self, id: &str) -> Result<String, ExplorerError> {
        let directory = {
            let mut state = self.state();
            let id = resolve_id(&state.store, id)
                .ok_or_else(|| ExplorerError::UnknownNode(id.to_string()))?;
            let directory = state
                .store
                .get(&id)
                .map(TreeNode::directory_path)
                .ok_or_else(|| ExplorerError::UnknownNode(id.clone()))?;
            state.selected_id = Some(id.clone());
            state.target = id;
            directory
        };
        self.publish_directory(&directory);
        Ok(directory)
    }

    /// Replace the children of one directory with already built nodes.
    /// Loaded subdirectories that are still present keep their subtree.
    pub fn update_subtree(&self, id: &str, new_children: Vec<TreeNode>) -> Result<usize, ExplorerError> {
        let mut state = self.state();
        let id = resolve_id(&state.store, id)
            .ok_or_else(|| ExplorerError::UnknownNode(id.to_string()))?;
        if state.store.get(&id).map(|n| n.is_directory) != Some(true) {
            return Err(ExplorerError::Validation(format!("{} is not a directory", id)));
        }

        let store = Arc::make_mut(&mut state.store);
        let count = store.replace_children(&id, new_children);
        if let Some(node) = store.get_mut(&id) {
            node.children_loaded = true;
            if node.state != NodeState::Loading {
                node.state = NodeState::Loaded;
            }
        }
        Ok(count)
    }

    /// Hide the children of a directory without discarding them
    pub fn collapse(&self, id: &str) -> Result<(), ExplorerError> {
        let mut state = self.state();
        let id = resolve_id(&state.store, id)
            .ok_or_else(|| ExplorerError::UnknownNode(id.to_string()))?;
        let expanded = state.store.get(&id).map(|n| n.is_directory && n.expanded);
        if expanded == Some(true) && !paths::is_root(&id) {
            if let Some(node) = Arc::make_mut(&mut state.store).get_mut(&id) {
                node.expanded = false;
            }
        }
        Ok(())
    }

    /// Discard the tree (disconnect)
    pub fn clear(&self) {
        {
            let mut state = self.state();
            state.epoch += 1;
            state.store = Arc::new(TreeStore::new());
            state.in_flight.clear();
            state.selected_id = None;
            state.target = paths::ROOT_ID.to_string();
        }
        info!("[Tree] Tree cleared");
        self.publish_directory(paths::ROOT_ID);
    }
}

/// A response for `id` is still wanted when the active target is `id` or
/// lies below it. Root listings always apply.
fn accepts_response(target: &str, id: &str) -> bool {
    paths::is_root(id) || paths::is_within(target, id)
}

/// Map a user-supplied path to a node id present in the store
fn resolve_id(store: &TreeStore, id: &str) -> Option<String> {
    if store.contains(id) {
        return Some(id.to_string());
    }
    [paths::normalize_key(id), paths::normalize_directory(id)]
        .into_iter()
        .find(|candidate| store.contains(candidate))
}

fn settle(store: &mut Arc<TreeStore>, id: &str) {
    let loading = store.get(id).map(TreeNode::is_loading).unwrap_or(false);
    if loading {
        if let Some(node) = Arc::make_mut(store).get_mut(id) {
            node.state = node.settled_state();
        }
    }
}

fn mark_loaded(node: &mut TreeNode, page: u32, is_last: bool, merge: Merge) {
    node.state = NodeState::Loaded;
    node.children_loaded = true;
    node.expanded = true;
    node.exhausted = is_last;
    node.next_page = match merge {
        Merge::Replace => page + 1,
        Merge::Append => node.next_page.max(page + 1),
    };
}
