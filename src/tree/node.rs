use crate::gateway::ObjectMeta;
use crate::paths;

/// Represents a node in the bucket tree
///
/// The id is the canonical path: `/` for the root, `docs/` for a directory,
/// `docs/a.txt` for an object. Children are referenced by id; the nodes
/// themselves live in the `TreeStore` arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    /// Canonical path, unique across the tree
    pub id: String,
    /// Parent node id (None for root)
    pub parent_id: Option<String>,
    pub path: String,
    /// Display name (last path segment)
    pub name: String,
    pub is_directory: bool,
    /// Object size; None for directories
    pub size: Option<u64>,
    /// Listing metadata for objects
    pub meta: Option<ObjectMeta>,
    /// Child node ids in display order
    pub children: Vec<String>,
    /// At least one listing of this directory succeeded
    pub children_loaded: bool,
    /// Current state of the node
    pub state: NodeState,
    /// Children shown (display only)
    pub expanded: bool,
    /// Cosmetic nesting level, root is 0
    pub depth: usize,
    /// Next listing page to request when continuing this directory
    pub next_page: u32,
    /// The last listing page of this directory has been merged
    pub exhausted: bool,
}

impl TreeNode {
    /// The bucket root
    pub fn root() -> Self {
        let mut node = Self::directory(paths::ROOT_ID, None);
        node.name = paths::ROOT_ID.to_string();
        node.expanded = true;
        node
    }

    /// A directory node that has not been listed yet
    pub fn directory(path: &str, parent_id: Option<String>) -> Self {
        let id = paths::normalize_directory(path);
        Self {
            name: paths::last_segment(&id).to_string(),
            depth: paths::depth(&id),
            path: id.clone(),
            id,
            parent_id,
            is_directory: true,
            size: None,
            meta: None,
            children: Vec::new(),
            children_loaded: false,
            state: NodeState::Unloaded,
            expanded: false,
            next_page: 0,
            exhausted: false,
        }
    }

    /// A leaf node for one object
    pub fn file(meta: ObjectMeta, parent_id: Option<String>) -> Self {
        let id = paths::normalize_key(&meta.key);
        let name = if meta.name.is_empty() {
            paths::last_segment(&id).to_string()
        } else {
            meta.name.clone()
        };
        Self {
            depth: paths::depth(&id),
            path: id.clone(),
            id,
            parent_id,
            name,
            is_directory: false,
            size: Some(meta.size),
            meta: Some(meta),
            children: Vec::new(),
            children_loaded: false,
            state: NodeState::Leaf,
            expanded: false,
            next_page: 0,
            exhausted: true,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_loading(&self) -> bool {
        self.state == NodeState::Loading
    }

    /// Directory the node stands for when selected: itself for a
    /// directory, the containing directory for an object
    pub fn directory_path(&self) -> String {
        if self.is_directory {
            self.id.clone()
        } else {
            paths::parent_directory(&self.id)
        }
    }

    /// State to return to when a fetch is abandoned or fails
    pub(crate) fn settled_state(&self) -> NodeState {
        if !self.is_directory {
            NodeState::Leaf
        } else if self.children_loaded {
            NodeState::Loaded
        } else {
            NodeState::Unloaded
        }
    }
}

/// Load state of a tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Directory never listed
    Unloaded,
    /// A listing for this directory is in flight
    Loading,
    /// Directory listed at least once, children populated (possibly empty)
    Loaded,
    /// Object (leaf node, cannot be expanded)
    Leaf,
}
