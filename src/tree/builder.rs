//! Pure conversions from listings and snapshots into tree nodes.

use std::collections::HashSet;
use tracing::warn;

use super::node::{NodeState, TreeNode};
use super::store::TreeStore;
use crate::gateway::{DirectoryListing, SnapshotEntry};
use crate::paths;

/// Sibling nodes for one listing page of `base_path`.
///
/// Directories come first, then files, each in listing order. Entries
/// resolving to a path already produced are skipped, as are entries naming
/// `base_path` itself.
pub fn build_siblings(base_path: &str, listing: &DirectoryListing) -> Vec<TreeNode> {
    let parent_id = paths::normalize_directory(base_path);
    let mut seen: HashSet<String> = HashSet::new();
    let mut siblings = Vec::with_capacity(listing.entry_count());

    for entry in &listing.directories {
        let Some(path) = paths::resolve_directory_entry(&parent_id, entry) else {
            continue;
        };
        if seen.insert(path.clone()) {
            siblings.push(TreeNode::directory(&path, Some(parent_id.clone())));
        }
    }

    for meta in &listing.files {
        let node = TreeNode::file(meta.clone(), Some(parent_id.clone()));
        if node.id.is_empty() || node.id.ends_with('/') {
            continue;
        }
        if seen.insert(node.id.clone()) {
            siblings.push(node);
        }
    }

    siblings
}

/// Complete tree from a recursive snapshot; every directory is `Loaded`.
pub fn build_tree(snapshot: &SnapshotEntry) -> TreeStore {
    let mut store = TreeStore::new();
    let root_children = match snapshot {
        SnapshotEntry::Directory { children, .. } => children.as_slice(),
        SnapshotEntry::File(meta) => {
            warn!("[Tree] Snapshot root is an object ({}), ignoring it", meta.key);
            &[]
        }
    };
    attach(&mut store, paths::ROOT_ID, root_children);
    store
}

fn attach(store: &mut TreeStore, parent_id: &str, entries: &[SnapshotEntry]) {
    let listing = DirectoryListing {
        directories: entries
            .iter()
            .filter(|e| matches!(e, SnapshotEntry::Directory { .. }))
            .map(|e| e.path().to_string())
            .collect(),
        files: entries
            .iter()
            .filter_map(|e| match e {
                SnapshotEntry::File(meta) => Some(meta.clone()),
                SnapshotEntry::Directory { .. } => None,
            })
            .collect(),
        truncated: Some(false),
    };

    let siblings = build_siblings(parent_id, &listing);
    store.replace_children(parent_id, siblings);
    if let Some(parent) = store.get_mut(parent_id) {
        parent.state = NodeState::Loaded;
        parent.children_loaded = true;
        parent.exhausted = true;
        parent.next_page = 1;
    }

    for entry in entries {
        if let SnapshotEntry::Directory { path, children } = entry {
            let id = paths::normalize_directory(path);
            if store.get(&id).map(|n| n.parent_id.as_deref() == Some(parent_id)) == Some(true) {
                attach(store, &id, children);
            }
        }
    }
}
